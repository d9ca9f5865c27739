//! In-memory storage backend with failure injection

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::Protocol;
use crate::domain::FileInfo;
use crate::volume::{path, Listing, StorageBackend, StorageError, StorageResult};

#[derive(Debug, Clone)]
enum Node {
	File { data: Bytes, mod_time: i64 },
	Dir { mod_time: i64 },
}

impl Node {
	fn info(&self, target: &str) -> FileInfo {
		match self {
			Self::File { data, mod_time } => {
				FileInfo::file(target, data.len() as u64, timestamp(*mod_time))
			}
			Self::Dir { mod_time } => FileInfo::directory(target, timestamp(*mod_time)),
		}
	}
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
	Utc.timestamp_opt(secs, 0).single()
}

#[derive(Debug, Default)]
struct MemoryState {
	nodes: BTreeMap<String, Node>,
	/// Logical clock used for modification times
	clock: i64,
	failure: Option<StorageError>,
	path_failures: HashMap<String, StorageError>,
	delay: Option<Duration>,
}

impl MemoryState {
	fn tick(&mut self) -> i64 {
		self.clock += 1;
		self.clock
	}

	fn ensure_parents(&mut self, target: &str) {
		let mut current = path::parent(target);
		while let Some(dir) = current {
			if dir == path::ROOT {
				break;
			}
			if !self.nodes.contains_key(dir) {
				let mod_time = self.tick();
				self.nodes.insert(dir.to_string(), Node::Dir { mod_time });
			}
			current = path::parent(dir);
		}
	}

	fn remove_subtree(&mut self, target: &str) -> Vec<(String, Node)> {
		let doomed: Vec<String> = self
			.nodes
			.keys()
			.filter(|key| key.as_str() == target || path::is_descendant(key, target))
			.cloned()
			.collect();
		doomed
			.into_iter()
			.filter_map(|key| self.nodes.remove(&key).map(|node| (key, node)))
			.collect()
	}
}

/// A [`StorageBackend`] holding its tree in memory.
///
/// Every trait call is counted. Failures can be injected for the whole
/// backend ([`Self::set_failure`]) or for single paths
/// ([`Self::fail_path`]); a failing path still shows up in its parent's
/// listing, like an unreadable directory on a real share.
#[derive(Debug)]
pub struct MemoryBackend {
	protocol: Protocol,
	state: Mutex<MemoryState>,
	connected: AtomicBool,
	calls: AtomicU64,
}

impl MemoryBackend {
	pub fn new(protocol: Protocol) -> Self {
		Self {
			protocol,
			state: Mutex::new(MemoryState::default()),
			connected: AtomicBool::new(false),
			calls: AtomicU64::new(0),
		}
	}

	/// Create or overwrite a file, creating missing parents
	pub fn add_file(&self, target: &str, data: &[u8]) {
		let mut state = self.state.lock();
		state.ensure_parents(target);
		let mod_time = state.tick();
		state.nodes.insert(
			target.to_string(),
			Node::File {
				data: Bytes::copy_from_slice(data),
				mod_time,
			},
		);
	}

	pub fn add_dir(&self, target: &str) {
		let mut state = self.state.lock();
		state.ensure_parents(target);
		let mod_time = state.tick();
		state
			.nodes
			.entry(target.to_string())
			.or_insert(Node::Dir { mod_time });
	}

	/// Remove an entry and everything below it
	pub fn remove(&self, target: &str) {
		self.state.lock().remove_subtree(target);
	}

	/// Move an entry and everything below it, keeping modification times
	pub fn rename(&self, from: &str, to: &str) {
		let mut state = self.state.lock();
		let moved = state.remove_subtree(from);
		state.ensure_parents(to);
		for (key, node) in moved {
			if let Some(new_key) = path::rebase(&key, from, to) {
				state.nodes.insert(new_key, node);
			}
		}
	}

	/// Bump a file's modification time without changing its content
	pub fn touch(&self, target: &str) {
		let mut state = self.state.lock();
		let now = state.tick();
		if let Some(Node::File { mod_time, .. } | Node::Dir { mod_time }) =
			state.nodes.get_mut(target)
		{
			*mod_time = now;
		}
	}

	/// Fail every call, `connect` included, until cleared with `None`
	pub fn set_failure(&self, failure: Option<StorageError>) {
		self.state.lock().failure = failure;
	}

	/// Fail listing, stat and reads of one path
	pub fn fail_path(&self, target: &str, err: StorageError) {
		self.state
			.lock()
			.path_failures
			.insert(target.to_string(), err);
	}

	pub fn clear_path_failure(&self, target: &str) {
		self.state.lock().path_failures.remove(target);
	}

	/// Make every call take this long before answering
	pub fn set_delay(&self, delay: Option<Duration>) {
		self.state.lock().delay = delay;
	}

	/// Trait calls made so far
	pub fn calls(&self) -> u64 {
		self.calls.load(Ordering::Relaxed)
	}

	pub fn reset_calls(&self) {
		self.calls.store(0, Ordering::Relaxed);
	}

	/// Count the call, apply the configured delay and global failure
	async fn enter(&self) -> StorageResult<()> {
		self.calls.fetch_add(1, Ordering::Relaxed);

		let delay = self.state.lock().delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		if let Some(err) = self.state.lock().failure.clone() {
			return Err(err);
		}
		Ok(())
	}

	async fn enter_connected(&self, target: Option<&str>) -> StorageResult<()> {
		self.enter().await?;
		if !self.is_connected() {
			return Err(StorageError::NotConnected);
		}
		if let Some(target) = target {
			if let Some(err) = self.state.lock().path_failures.get(target).cloned() {
				return Err(err);
			}
		}
		Ok(())
	}
}

#[async_trait]
impl StorageBackend for MemoryBackend {
	async fn connect(&self) -> StorageResult<()> {
		self.enter().await?;
		self.connected.store(true, Ordering::Release);
		Ok(())
	}

	async fn disconnect(&self) -> StorageResult<()> {
		self.connected.store(false, Ordering::Release);
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	async fn list(&self, target: &str) -> StorageResult<Listing> {
		self.enter_connected(Some(target)).await?;
		let state = self.state.lock();

		if target != path::ROOT {
			match state.nodes.get(target) {
				Some(Node::Dir { .. }) => {}
				Some(Node::File { .. }) => {
					return Err(StorageError::Protocol(format!("{target} is not a directory")))
				}
				None => return Err(StorageError::NotFound(target.to_string())),
			}
		}

		let entries = state
			.nodes
			.iter()
			.filter(|(key, _)| path::parent(key) == Some(target))
			.map(|(key, node)| node.info(key))
			.collect();

		Ok(Listing {
			entries,
			skipped: Vec::new(),
		})
	}

	async fn read(&self, target: &str) -> StorageResult<Bytes> {
		self.enter_connected(Some(target)).await?;
		match self.state.lock().nodes.get(target) {
			Some(Node::File { data, .. }) => Ok(data.clone()),
			Some(Node::Dir { .. }) => Err(StorageError::Protocol(format!("{target} is a directory"))),
			None => Err(StorageError::NotFound(target.to_string())),
		}
	}

	async fn write(&self, target: &str, data: Bytes) -> StorageResult<()> {
		self.enter_connected(None).await?;
		let mut state = self.state.lock();
		state.ensure_parents(target);
		let mod_time = state.tick();
		state
			.nodes
			.insert(target.to_string(), Node::File { data, mod_time });
		Ok(())
	}

	async fn delete(&self, target: &str) -> StorageResult<()> {
		self.enter_connected(None).await?;
		if self.state.lock().remove_subtree(target).is_empty() {
			return Err(StorageError::NotFound(target.to_string()));
		}
		Ok(())
	}

	async fn stat(&self, target: &str) -> StorageResult<FileInfo> {
		self.enter_connected(Some(target)).await?;
		if target == path::ROOT {
			return Ok(FileInfo::directory(path::ROOT, None));
		}
		self.state
			.lock()
			.nodes
			.get(target)
			.map(|node| node.info(target))
			.ok_or_else(|| StorageError::NotFound(target.to_string()))
	}

	async fn create_dir(&self, target: &str) -> StorageResult<()> {
		self.enter_connected(None).await?;
		self.add_dir(target);
		Ok(())
	}

	fn protocol(&self) -> Protocol {
		self.protocol
	}
}
