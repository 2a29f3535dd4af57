//! Per-app local metadata, persisted outside the synced directory
//!
//! Each app instance keeps a small JSON map in its private local
//! directory. It is never synced and never read by peers. Every change is
//! persisted eagerly with a full rewrite of the file.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::DecsyncError;
use crate::fs::DecsyncFs;
use crate::logging::*;

const VERSION_KEY: &str = "version";
const LAST_ACTIVE_KEY: &str = "last-active";
const SUPPORTED_VERSION_KEY: &str = "supported-version";

/// Mutable local metadata for one app instance
pub struct LocalInfo {
	path: PathBuf,
	map: Map<String, Value>,
}

impl LocalInfo {
	/// Load `localDir/info`, starting fresh when absent or unreadable
	pub async fn load(fs: &dyn DecsyncFs, local_dir: &Path) -> Result<Self, DecsyncError> {
		let path = local_dir.join("info");
		let map = match fs.read(&path).await? {
			Some(bytes) => match serde_json::from_slice::<Value>(&bytes) {
				Ok(Value::Object(map)) => map,
				other => {
					warn!("Local info at {:?} is unusable ({:?}), starting fresh", path, other);
					Map::new()
				}
			},
			None => Map::new(),
		};
		Ok(LocalInfo { path, map })
	}

	/// Format version this app last used, if it ever chose one
	pub fn version(&self) -> Option<u8> {
		self.map.get(VERSION_KEY).and_then(Value::as_u64).map(|v| v as u8)
	}

	/// `YYYY-MM-DD` of the most recently published activity marker
	pub fn last_active(&self) -> Option<String> {
		self.map.get(LAST_ACTIVE_KEY).and_then(Value::as_str).map(|s| s.to_string())
	}

	/// Highest supported version this app has published so far
	pub fn supported_version(&self) -> Option<u8> {
		self.map.get(SUPPORTED_VERSION_KEY).and_then(Value::as_u64).map(|v| v as u8)
	}

	pub async fn set_version(&mut self, fs: &dyn DecsyncFs, version: u8) -> Result<(), DecsyncError> {
		self.map.insert(VERSION_KEY.to_string(), Value::from(version));
		self.save(fs).await
	}

	pub async fn set_last_active(
		&mut self,
		fs: &dyn DecsyncFs,
		date: &str,
	) -> Result<(), DecsyncError> {
		self.map.insert(LAST_ACTIVE_KEY.to_string(), Value::from(date));
		self.save(fs).await
	}

	pub async fn set_supported_version(
		&mut self,
		fs: &dyn DecsyncFs,
		version: u8,
	) -> Result<(), DecsyncError> {
		self.map.insert(SUPPORTED_VERSION_KEY.to_string(), Value::from(version));
		self.save(fs).await
	}

	async fn save(&self, fs: &dyn DecsyncFs) -> Result<(), DecsyncError> {
		fs.write(&self.path, Value::Object(self.map.clone()).to_string().as_bytes()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::LocalFs;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_fresh_local_info_is_empty() {
		let tmp = TempDir::new().unwrap();
		let fs = LocalFs::new();
		let info = LocalInfo::load(&fs, tmp.path()).await.unwrap();
		assert_eq!(info.version(), None);
		assert_eq!(info.last_active(), None);
		assert_eq!(info.supported_version(), None);
	}

	#[tokio::test]
	async fn test_changes_persist_eagerly() {
		let tmp = TempDir::new().unwrap();
		let fs = LocalFs::new();

		let mut info = LocalInfo::load(&fs, tmp.path()).await.unwrap();
		info.set_version(&fs, 2).await.unwrap();
		info.set_last_active(&fs, "2024-05-01").await.unwrap();
		info.set_supported_version(&fs, 2).await.unwrap();

		let reloaded = LocalInfo::load(&fs, tmp.path()).await.unwrap();
		assert_eq!(reloaded.version(), Some(2));
		assert_eq!(reloaded.last_active(), Some("2024-05-01".to_string()));
		assert_eq!(reloaded.supported_version(), Some(2));
	}

	#[tokio::test]
	async fn test_corrupt_local_info_starts_fresh() {
		let tmp = TempDir::new().unwrap();
		let fs = LocalFs::new();
		fs.write(&tmp.path().join("info"), b"[not, an, object").await.unwrap();

		let info = LocalInfo::load(&fs, tmp.path()).await.unwrap();
		assert_eq!(info.version(), None);
	}
}

// vim: ts=4
