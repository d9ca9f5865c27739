use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use sd_storage_sync::config::SyncConfig;
use sd_storage_sync::domain::IngestEvent;
use sd_storage_sync::logging;
use sd_storage_sync::service::ScanOrchestrator;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
	name = "sd-storage-sync",
	about = "Watch storage roots and print their file events as JSON lines"
)]
struct Args {
	/// Path to the TOML configuration
	#[arg(long, short)]
	config: PathBuf,

	/// Write daily-rotated logs here as well
	#[arg(long)]
	log_dir: Option<PathBuf>,

	/// Seconds between status summaries in the log, 0 to disable
	#[arg(long, default_value_t = 60)]
	status_interval: u64,
}

/// SIGHUP asks for a configuration reload
struct ReloadSignal {
	#[cfg(unix)]
	inner: Option<signal::unix::Signal>,
}

impl ReloadSignal {
	fn new() -> Self {
		Self {
			#[cfg(unix)]
			inner: signal::unix::signal(signal::unix::SignalKind::hangup())
				.map_err(|e| warn!("Failed to install SIGHUP handler: {}", e))
				.ok(),
		}
	}

	async fn recv(&mut self) {
		#[cfg(unix)]
		if let Some(inner) = &mut self.inner {
			inner.recv().await;
			return;
		}
		std::future::pending::<()>().await
	}
}

fn write_line(line: &str) -> std::io::Result<()> {
	let mut stdout = std::io::stdout().lock();
	writeln!(stdout, "{line}")?;
	stdout.flush()
}

async fn log_status(orchestrator: &ScanOrchestrator) {
	for status in orchestrator.status().await {
		info!(
			root_id = %status.root_id,
			protocol = %status.protocol,
			health = %status.health,
			pending_moves = status.pending_moves,
			queue_depth = status.queue_depth,
			last_error = status.last_error.as_deref().unwrap_or("-"),
			"Root status"
		);
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let mut config = SyncConfig::load(&args.config)
		.with_context(|| format!("loading {}", args.config.display()))?;
	if let Some(log_dir) = &args.log_dir {
		config.logging.directory = Some(log_dir.clone());
	}

	let _log_guard = logging::init(&config.logging);
	info!(roots = config.roots.len(), "Starting sd-storage-sync");

	let orchestrator = ScanOrchestrator::start(config)
		.await
		.context("starting orchestrator")?;

	let mut events = orchestrator
		.take_event_stream()
		.context("event stream already taken")?;

	let printer = tokio::spawn(async move {
		while let Some(event) = events.next().await {
			let line = match serde_json::to_string(&IngestEvent::from(&event)) {
				Ok(line) => line,
				Err(e) => {
					error!("Failed to serialize event: {}", e);
					continue;
				}
			};

			if let Err(e) = write_line(&line) {
				error!("Failed to write event, stopping output: {}", e);
				break;
			}
		}
	});

	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};
	tokio::pin!(ctrl_c);

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::pin!(terminate);

	let mut reload = ReloadSignal::new();

	let status_every = Duration::from_secs(args.status_interval.max(1));
	let mut status_tick = tokio::time::interval(status_every);
	status_tick.tick().await;

	loop {
		tokio::select! {
			() = &mut ctrl_c => {
				info!("Received Ctrl+C, shutting down gracefully...");
				break;
			}
			() = &mut terminate => {
				info!("Received SIGTERM, shutting down gracefully...");
				break;
			}
			() = reload.recv() => {
				info!("Received SIGHUP, reloading configuration");
				match SyncConfig::load(&args.config) {
					Ok(config) => {
						if let Err(e) = orchestrator.apply_config(config).await {
							error!("Failed to apply configuration: {}", e);
						}
					}
					Err(e) => error!("Keeping current configuration: {}", e),
				}
			}
			_ = status_tick.tick(), if args.status_interval > 0 => {
				log_status(&orchestrator).await;
			}
		}
	}

	orchestrator.shutdown().await;
	// The output channel closes with the orchestrator
	drop(orchestrator);
	if tokio::time::timeout(Duration::from_secs(5), printer)
		.await
		.is_err()
	{
		warn!("Timed out writing the remaining events");
	}

	info!("Shutdown complete");
	Ok(())
}
