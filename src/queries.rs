//! Directory-level queries that work without a [`Decsync`] instance
//!
//! These scan whatever format versions are present on disk. Remote apps'
//! snapshots are advisory input here; the append logs stay the source of
//! truth for the engines.
//!
//! [`Decsync`]: crate::decsync::Decsync

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde_json::Value;

use crate::decsync::{info_path, sub_dir};
use crate::encode::encode_path;
use crate::error::DecsyncError;
use crate::fs::{DecsyncFs, NodeKind};
use crate::stored::{fold_newest, Snapshot};
use crate::types::{AppData, DecsyncInfo, Entry, SUPPORTED_VERSION};

/// Newest entry per key ever written to the `["info"]` path
///
/// Unions V1 and V2 sources; on exact datetime ties the newer format
/// wins. The result is keyed by the canonical JSON of the entry key.
pub async fn get_static_info(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
	collection: Option<&str>,
) -> Result<HashMap<String, Entry>, DecsyncError> {
	DecsyncInfo::load(fs, decsync_dir).await?;
	static_info_in(fs, &sub_dir(decsync_dir, sync_type, collection)).await
}

pub(crate) async fn static_info_in(
	fs: &dyn DecsyncFs,
	sub: &Path,
) -> Result<HashMap<String, Entry>, DecsyncError> {
	let mut acc: HashMap<String, Entry> = HashMap::new();
	let mut apps = fs.list_directories(&sub.join("stored-entries")).await?;
	apps.sort();
	for app in apps {
		let snapshot = Snapshot::new(sub.join("stored-entries").join(&app));
		fold_newest(&mut acc, snapshot.read_path(fs, &info_path()).await?, false);
	}

	let mut v2_acc: HashMap<String, Entry> = HashMap::new();
	let mut apps = fs.list_directories(&sub.join("v2")).await?;
	apps.sort();
	for app in apps {
		let snapshot = Snapshot::new(sub.join("v2").join(&app).join("stored-entries"));
		fold_newest(&mut v2_acc, snapshot.read_path(fs, &info_path()).await?, false);
	}

	// the newer format wins exact ties against the older one
	fold_newest(&mut acc, v2_acc, true);
	Ok(acc)
}

/// Number of cells under `prefix` whose merged value is not null
///
/// Queries the latest format version present in the directory.
pub async fn get_entries_count(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
	collection: Option<&str>,
	prefix: &[String],
) -> Result<usize, DecsyncError> {
	DecsyncInfo::load(fs, decsync_dir).await?;
	let sub = sub_dir(decsync_dir, sync_type, collection);

	let mut v2_apps = fs.list_directories(&sub.join("v2")).await?;
	v2_apps.sort();
	let snapshots: Vec<Snapshot> = if v2_apps.is_empty() {
		let mut apps = fs.list_directories(&sub.join("stored-entries")).await?;
		apps.sort();
		apps.into_iter()
			.map(|app| Snapshot::new(sub.join("stored-entries").join(app)))
			.collect()
	} else {
		v2_apps
			.into_iter()
			.map(|app| Snapshot::new(sub.join("v2").join(app).join("stored-entries")))
			.collect()
	};

	let mut cells: HashMap<(String, String), Entry> = HashMap::new();
	for snapshot in &snapshots {
		for path in snapshot.list_paths(fs).await? {
			if !path.starts_with(prefix) {
				continue;
			}
			let name = encode_path(&path);
			for (id, entry) in snapshot.read_path(fs, &path).await? {
				let cell = (name.clone(), id);
				let newer = match cells.get(&cell) {
					Some(held) => entry.datetime > held.datetime,
					None => true,
				};
				if newer {
					cells.insert(cell, entry);
				}
			}
		}
	}
	Ok(cells.values().filter(|entry| entry.value != Value::Null).count())
}

/// Every app that has written to this subtree, with its published
/// activity and version information
///
/// Sorted by last activity, then version, then appId.
pub async fn get_active_apps(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
	collection: Option<&str>,
) -> Result<Vec<AppData>, DecsyncError> {
	DecsyncInfo::load(fs, decsync_dir).await?;
	active_apps_in(fs, &sub_dir(decsync_dir, sync_type, collection)).await
}

pub(crate) async fn active_apps_in(
	fs: &dyn DecsyncFs,
	sub: &Path,
) -> Result<Vec<AppData>, DecsyncError> {
	let info = static_info_in(fs, sub).await?;

	let mut v1: BTreeSet<String> = BTreeSet::new();
	for dir in &["new-entries", "stored-entries"] {
		for app in fs.list_directories(&sub.join(dir)).await? {
			v1.insert(app);
		}
	}
	let v2: BTreeSet<String> =
		fs.list_directories(&sub.join("v2")).await?.into_iter().collect();

	let mut all = v1;
	all.extend(v2.iter().cloned());

	let mut apps = Vec::new();
	for app_id in all {
		let version = if v2.contains(&app_id) { 2 } else { 1 };
		let last_active = info
			.get(&Value::from(format!("last-active-{}", app_id)).to_string())
			.and_then(|entry| entry.value.as_str().map(|s| s.to_string()));
		let supported_version = info
			.get(&Value::from(format!("supported-version-{}", app_id)).to_string())
			.and_then(|entry| entry.value.as_u64())
			.map(|v| v as u8);
		apps.push(AppData { app_id, last_active, version, supported_version });
	}
	apps.sort_by(|a, b| {
		(&a.last_active, a.version, &a.app_id).cmp(&(&b.last_active, b.version, &b.app_id))
	});
	Ok(apps)
}

/// Delete one app's writer subtree for the given format version
///
/// V1 logs are still consumed by V1 readers, so they are only removed
/// once the directory has moved past V1. Cursor files other readers point
/// at the deleted writer become orphans, which is harmless.
pub async fn delete_app_data(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
	collection: Option<&str>,
	app_id: &str,
	version: u8,
	current_version: u8,
) -> Result<(), DecsyncError> {
	let sub = sub_dir(decsync_dir, sync_type, collection);
	match version {
		1 => {
			fs.delete(&sub.join("stored-entries").join(app_id)).await?;
			fs.delete(&sub.join("read").join(app_id)).await?;
			if current_version > 1 {
				fs.delete(&sub.join("new-entries").join(app_id)).await?;
			}
			Ok(())
		}
		2 => fs.delete(&sub.join("v2").join(app_id)).await,
		other => Err(DecsyncError::UnsupportedVersion {
			required: other,
			supported: SUPPORTED_VERSION,
		}),
	}
}

/// Delete a whole collection subtree, all versions included
pub async fn perm_delete_collection(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
	collection: Option<&str>,
) -> Result<(), DecsyncError> {
	fs.delete(&sub_dir(decsync_dir, sync_type, collection)).await
}

/// Names of collections under a sync type that carry a recognized layout
pub async fn list_collections(
	fs: &dyn DecsyncFs,
	decsync_dir: &Path,
	sync_type: &str,
) -> Result<Vec<String>, DecsyncError> {
	let mut names = Vec::new();
	for name in fs.list_directories(&decsync_dir.join(sync_type)).await? {
		let sub = decsync_dir.join(sync_type).join(&name);
		for marker in &["v2", "new-entries", "stored-entries"] {
			if fs.node_kind(&sub.join(marker)).await? == NodeKind::Directory {
				names.push(name);
				break;
			}
		}
	}
	Ok(names)
}

// vim: ts=4
