//! The DecSync facade: version routing, maintenance and online upgrade
//!
//! A [`Decsync`] instance is the public entry point for one app on one
//! subtree. It owns the registered listeners, the per-app local metadata
//! and the storage engine for the format version currently in use, and it
//! swaps that engine during an online upgrade.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::DecsyncError;
use crate::fs::{DecsyncFs, LocalFs, NodeKind};
use crate::listeners::{dispatch, Listener};
use crate::logging::*;
use crate::queries;
use crate::state::LocalInfo;
use crate::stored::Snapshot;
use crate::types::{
	active_cutoff, today, DecsyncInfo, Entry, EntryWithPath, StoredEntry, DEFAULT_VERSION,
	SUPPORTED_VERSION,
};
use crate::v1::DecsyncV1;
use crate::v2::DecsyncV2;

/// Subtree root for a sync type and optional collection
pub fn sub_dir(decsync_dir: &Path, sync_type: &str, collection: Option<&str>) -> PathBuf {
	match collection {
		Some(collection) => decsync_dir.join(sync_type).join(collection),
		None => decsync_dir.join(sync_type),
	}
}

pub(crate) fn info_path() -> Vec<String> {
	vec!["info".to_string()]
}

/// The storage engine for one format version
///
/// Both engines expose the same surface; the facade holds whichever one
/// the directory currently uses.
pub(crate) enum VersionedEngine {
	V1(DecsyncV1),
	V2(DecsyncV2),
}

impl VersionedEngine {
	pub(crate) fn build(
		version: u8,
		fs: Arc<dyn DecsyncFs>,
		sub: PathBuf,
		own_app_id: String,
	) -> Self {
		if version >= 2 {
			VersionedEngine::V2(DecsyncV2::new(fs, sub, own_app_id))
		} else {
			VersionedEngine::V1(DecsyncV1::new(fs, sub, own_app_id))
		}
	}

	pub(crate) fn version(&self) -> u8 {
		match self {
			VersionedEngine::V1(_) => 1,
			VersionedEngine::V2(_) => 2,
		}
	}

	pub(crate) fn snapshot(&self) -> &Snapshot {
		match self {
			VersionedEngine::V1(engine) => engine.snapshot(),
			VersionedEngine::V2(engine) => engine.snapshot(),
		}
	}

	pub(crate) fn own_subtree(&self) -> Vec<PathBuf> {
		match self {
			VersionedEngine::V1(engine) => engine.own_subtree(),
			VersionedEngine::V2(engine) => engine.own_subtree(),
		}
	}

	pub(crate) async fn set_entries(&self, entries: Vec<EntryWithPath>) -> Result<(), DecsyncError> {
		match self {
			VersionedEngine::V1(engine) => engine.set_entries(entries).await,
			VersionedEngine::V2(engine) => engine.set_entries(entries).await,
		}
	}

	pub(crate) async fn set_entries_for_path(
		&self,
		path: &[String],
		entries: &[Entry],
	) -> Result<(), DecsyncError> {
		match self {
			VersionedEngine::V1(engine) => engine.set_entries_for_path(path, entries).await,
			VersionedEngine::V2(engine) => engine.set_entries_for_path(path, entries).await,
		}
	}

	pub(crate) async fn execute_all_new_entries<T>(
		&self,
		listeners: &[Listener<T>],
		extra: Option<&T>,
	) -> Result<(), DecsyncError> {
		match self {
			VersionedEngine::V1(engine) => engine.execute_all_new_entries(listeners, extra).await,
			VersionedEngine::V2(engine) => engine.execute_all_new_entries(listeners, extra).await,
		}
	}

	/// Everything the own snapshot holds, for migration into another engine
	pub(crate) async fn collect_stored_entries(
		&self,
		fs: &dyn DecsyncFs,
	) -> Result<Vec<EntryWithPath>, DecsyncError> {
		let snapshot = self.snapshot();
		let mut out = Vec::new();
		let mut paths = snapshot.list_paths(fs).await?;
		paths.sort();
		for path in paths {
			let map = snapshot.read_path(fs, &path).await?;
			let mut entries: Vec<(String, Entry)> = map.into_iter().collect();
			entries.sort_by(|a, b| a.0.cmp(&b.0));
			for (_, entry) in entries {
				out.push(EntryWithPath::new(path.clone(), entry));
			}
		}
		Ok(out)
	}
}

/// One app's handle on one synchronized subtree
///
/// `T` is the host-defined context passed through to listeners on every
/// delivery. The instance must be driven by one caller task at a time.
pub struct Decsync<T> {
	fs: Arc<dyn DecsyncFs>,
	decsync_dir: PathBuf,
	sub: PathBuf,
	own_app_id: String,
	local_info: LocalInfo,
	listeners: Vec<Listener<T>>,
	engine: VersionedEngine,
	in_init: bool,
}

impl<T> Decsync<T> {
	/// Open or initialize a DecSync subtree on the local filesystem
	pub async fn new(
		decsync_dir: &Path,
		local_dir: &Path,
		sync_type: &str,
		collection: Option<&str>,
		own_app_id: &str,
	) -> Result<Self, DecsyncError> {
		Decsync::with_fs(Arc::new(LocalFs::new()), decsync_dir, local_dir, sync_type, collection, own_app_id)
			.await
	}

	/// Like [`new`](Decsync::new) with a caller-supplied filesystem capability
	pub async fn with_fs(
		fs: Arc<dyn DecsyncFs>,
		decsync_dir: &Path,
		local_dir: &Path,
		sync_type: &str,
		collection: Option<&str>,
		own_app_id: &str,
	) -> Result<Self, DecsyncError> {
		let info = DecsyncInfo::load_or_create(&*fs, decsync_dir).await?;
		let sub = sub_dir(decsync_dir, sync_type, collection);
		let mut local_info = LocalInfo::load(&*fs, local_dir).await?;

		let version = match local_info.version() {
			Some(version) => version,
			None => {
				// prefer an own V2 subtree, then the highest peer version,
				// then whatever the root info declares
				if fs.node_kind(&sub.join("v2").join(own_app_id)).await? == NodeKind::Directory {
					2
				} else if !fs.list_directories(&sub.join("v2")).await?.is_empty() {
					2
				} else if !fs.list_directories(&sub.join("new-entries")).await?.is_empty() {
					1
				} else {
					info.version()
				}
			}
		};
		if version > SUPPORTED_VERSION {
			return Err(DecsyncError::UnsupportedVersion {
				required: version,
				supported: SUPPORTED_VERSION,
			});
		}
		if local_info.version() != Some(version) {
			local_info.set_version(&*fs, version).await?;
		}

		let engine =
			VersionedEngine::build(version, fs.clone(), sub.clone(), own_app_id.to_string());
		debug!("Opened {:?} as {} at version {}", sub, own_app_id, version);

		Ok(Decsync {
			fs,
			decsync_dir: decsync_dir.to_path_buf(),
			sub,
			own_app_id: own_app_id.to_string(),
			local_info,
			listeners: Vec::new(),
			engine,
			in_init: false,
		})
	}

	/// Format version this instance currently writes
	pub fn version(&self) -> u8 {
		self.engine.version()
	}

	pub fn own_app_id(&self) -> &str {
		&self.own_app_id
	}

	/// Register a callback for every path under `subpath`
	pub fn add_listener<F>(&mut self, subpath: Vec<String>, on_entry: F)
	where
		F: Fn(&[String], &Entry, &T) + Send + Sync + 'static,
	{
		self.listeners.push(Listener::on_entry(subpath, on_entry));
	}

	/// Like [`add_listener`](Decsync::add_listener), with the callback
	/// reporting success; `false` requests re-delivery later
	pub fn add_listener_with_success<F>(&mut self, subpath: Vec<String>, on_entry: F)
	where
		F: Fn(&[String], &Entry, &T) -> bool + Send + Sync + 'static,
	{
		self.listeners.push(Listener::on_entry_with_success(subpath, on_entry));
	}

	/// Register a callback receiving the whole batch of entries per path;
	/// `false` requests re-delivery of the whole batch
	pub fn add_multi_listener<F>(&mut self, subpath: Vec<String>, on_entries: F)
	where
		F: Fn(&[String], &[Entry], &T) -> bool + Send + Sync + 'static,
	{
		self.listeners.push(Listener::on_entries(subpath, on_entries));
	}

	/// Write one key/value pair, stamped with the current datetime
	pub async fn set_entry(
		&self,
		path: &[String],
		key: Value,
		value: Value,
	) -> Result<(), DecsyncError> {
		self.engine.set_entries_for_path(path, &[Entry::now(key, value)]).await
	}

	/// Write a batch of entries across paths
	pub async fn set_entries(&self, entries: Vec<EntryWithPath>) -> Result<(), DecsyncError> {
		self.engine.set_entries(entries).await
	}

	/// Write a batch of entries for one path
	pub async fn set_entries_for_path(
		&self,
		path: &[String],
		entries: &[Entry],
	) -> Result<(), DecsyncError> {
		self.engine.set_entries_for_path(path, entries).await
	}

	/// Process everything peers wrote since the last pass, then run
	/// directory maintenance (activity markers, auto-upgrade) unless
	/// disabled
	pub async fn execute_all_new_entries(
		&mut self,
		extra: &T,
		disable_maintenance: bool,
	) -> Result<(), DecsyncError> {
		if self.in_init {
			return Ok(());
		}
		self.execute_inner(Some(extra), disable_maintenance).await
	}

	/// Advance cursors and populate the own snapshot without invoking any
	/// listener; used once right after install
	pub async fn init_stored_entries(&mut self) -> Result<(), DecsyncError> {
		self.in_init = true;
		let result = self.execute_inner(None, false).await;
		self.in_init = false;
		result
	}

	async fn execute_inner(
		&mut self,
		extra: Option<&T>,
		disable_maintenance: bool,
	) -> Result<(), DecsyncError> {
		// fresh listings so new peers and their appends are visible
		self.fs.reset_cache();
		self.engine.execute_all_new_entries(&self.listeners, extra).await?;
		if !disable_maintenance {
			self.maintenance(extra).await?;
		}
		Ok(())
	}

	/// Replay the merged value of one cell through the listeners
	pub async fn execute_stored_entry(
		&self,
		path: &[String],
		key: Value,
		extra: &T,
	) -> Result<(), DecsyncError> {
		self.execute_stored_entries_for_path_exact(path, extra, Some(&[key])).await
	}

	/// Replay the merged values of the given cells through the listeners
	pub async fn execute_stored_entries(
		&self,
		stored: &[StoredEntry],
		extra: &T,
	) -> Result<(), DecsyncError> {
		let mut groups: Vec<(&[String], Vec<Value>)> = Vec::new();
		for cell in stored {
			match groups.iter_mut().find(|(path, _)| *path == cell.path.as_slice()) {
				Some((_, keys)) => keys.push(cell.key.clone()),
				None => groups.push((cell.path.as_slice(), vec![cell.key.clone()])),
			}
		}
		for (path, keys) in groups {
			self.execute_stored_entries_for_path_exact(path, extra, Some(&keys)).await?;
		}
		Ok(())
	}

	/// Replay all merged values at exactly `path`; `keys = None` means all
	pub async fn execute_stored_entries_for_path_exact(
		&self,
		path: &[String],
		extra: &T,
		keys: Option<&[Value]>,
	) -> Result<(), DecsyncError> {
		let map = self.engine.snapshot().read_path(&*self.fs, path).await?;
		let mut entries: Vec<Entry> = map
			.into_iter()
			.filter(|(id, _)| match keys {
				Some(keys) => keys.iter().any(|key| key.to_string() == *id),
				None => true,
			})
			.map(|(_, entry)| entry)
			.collect();
		entries.sort_by(|a, b| a.key_id().cmp(&b.key_id()));
		dispatch(&self.listeners, path, &entries, Some(extra));
		Ok(())
	}

	/// Replay all merged values at paths under `prefix`
	pub async fn execute_stored_entries_for_path_prefix(
		&self,
		prefix: &[String],
		extra: &T,
		keys: Option<&[Value]>,
	) -> Result<(), DecsyncError> {
		let mut paths = self.engine.snapshot().list_paths(&*self.fs).await?;
		paths.sort();
		for path in paths {
			if path.starts_with(prefix) {
				self.execute_stored_entries_for_path_exact(&path, extra, keys).await?;
			}
		}
		Ok(())
	}

	async fn maintenance(&mut self, extra: Option<&T>) -> Result<(), DecsyncError> {
		let mut info = DecsyncInfo::load_or_create(&*self.fs, &self.decsync_dir).await?;
		let preferred = self.preferred_version(&info).await?;
		if preferred > self.engine.version() {
			self.upgrade(preferred, &mut info, extra).await?;
		}

		let today = today();
		if self.local_info.last_active().as_deref() != Some(today.as_str()) {
			let key = Value::from(format!("last-active-{}", self.own_app_id));
			self.engine
				.set_entries_for_path(&info_path(), &[Entry::now(key, Value::from(today.clone()))])
				.await?;
			self.local_info.set_last_active(&*self.fs, &today).await?;
		}

		if self.local_info.supported_version().map_or(true, |v| v < SUPPORTED_VERSION) {
			let key = Value::from(format!("supported-version-{}", self.own_app_id));
			self.engine
				.set_entries_for_path(&info_path(), &[Entry::now(key, Value::from(SUPPORTED_VERSION))])
				.await?;
			self.local_info.set_supported_version(&*self.fs, SUPPORTED_VERSION).await?;
		}
		Ok(())
	}

	/// Version this directory should be at, honouring `fixed` and apps
	/// that still depend on an older format
	async fn preferred_version(&self, info: &DecsyncInfo) -> Result<u8, DecsyncError> {
		if info.fixed() {
			return Ok(info.version());
		}
		let apps = queries::active_apps_in(&*self.fs, &self.sub).await?;
		let cutoff = active_cutoff();
		if apps.iter().any(|app| app.is_legacy(&cutoff, DEFAULT_VERSION)) {
			Ok(self.engine.version())
		} else {
			Ok(std::cmp::max(DEFAULT_VERSION, info.version()))
		}
	}

	async fn upgrade(
		&mut self,
		target: u8,
		info: &mut DecsyncInfo,
		extra: Option<&T>,
	) -> Result<(), DecsyncError> {
		info!("Upgrading {:?} from version {} to {}", self.sub, self.engine.version(), target);
		self.fs.reset_cache();

		let collected = self.engine.collect_stored_entries(&*self.fs).await?;
		let next = VersionedEngine::build(
			target,
			self.fs.clone(),
			self.sub.clone(),
			self.own_app_id.clone(),
		);
		next.set_entries(collected).await?;
		let old = std::mem::replace(&mut self.engine, next);

		self.local_info.set_version(&*self.fs, target).await?;
		if info.version() < target {
			info.set_version(target);
			info.save(&*self.fs, &self.decsync_dir).await?;
		}

		// the old own entries disappear in the background; failure only
		// costs disk space
		let fs = self.fs.clone();
		let doomed = old.own_subtree();
		tokio::spawn(async move {
			for path in doomed {
				if let Err(e) = fs.delete(&path).await {
					warn!("Could not delete {:?} after upgrade: {}", path, e);
				}
			}
		});

		// catch entries written while the migration ran
		self.fs.reset_cache();
		self.engine.execute_all_new_entries(&self.listeners, extra).await?;
		Ok(())
	}
}


// vim: ts=4
