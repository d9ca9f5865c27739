//! Tracing setup for the daemon and anything embedding the crate

use tracing::debug;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global subscriber: console output, plus a daily-rotated file
/// when `config.directory` is set. `RUST_LOG` overrides `config.level`.
///
/// Keep the returned guard alive for as long as file output should be
/// flushed. Calling this twice leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
	};

	let (file_layer, guard) = match &config.directory {
		Some(directory) => {
			let (non_blocking, guard) =
				tracing_appender::non_blocking(rolling::daily(directory, &config.file_name));
			let layer = Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(filter());
			(Some(layer), Some(guard))
		}
		None => (None, None),
	};

	let result = tracing_subscriber::registry()
		.with(
			fmt::layer()
				.with_writer(std::io::stderr)
				.with_filter(filter()),
		)
		.with(file_layer)
		.try_init();

	if let Err(e) = result {
		debug!("Tracing already initialised: {}", e);
	}

	guard
}
