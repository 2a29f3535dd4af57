//! Core data types for DecSync entries and directory metadata

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::DecsyncError;
use crate::fs::DecsyncFs;
use crate::logging::*;

/// Format version written into fresh directories
pub const DEFAULT_VERSION: u8 = 2;

/// Highest format version this build can read and write
pub const SUPPORTED_VERSION: u8 = 2;

/// Root metadata filename inside the DecSync directory
pub const INFO_FILE: &str = ".decsync-info";

/// Days since its `last-active` date during which an app counts as active
const ACTIVE_WINDOW_DAYS: i64 = 30;

/// Current time as an ISO-8601 UTC string
///
/// Fixed width, so lexicographic order equals chronological order. The
/// first ten characters form the `YYYY-MM-DD` date.
pub fn current_datetime() -> String {
	chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Today's date, `YYYY-MM-DD`
pub fn today() -> String {
	current_datetime()[..10].to_string()
}

/// Date before which a `last-active` value no longer counts as active
pub fn active_cutoff() -> String {
	(chrono::Utc::now() - chrono::Duration::days(ACTIVE_WINDOW_DAYS))
		.format("%Y-%m-%d")
		.to_string()
}

/// A single immutable update record
///
/// On disk an entry is one JSON line `[datetime, key, value]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
	pub datetime: String,
	pub key: Value,
	pub value: Value,
}

impl Entry {
	pub fn new(datetime: String, key: Value, value: Value) -> Self {
		Entry { datetime, key, value }
	}

	/// Entry stamped with the current datetime
	pub fn now(key: Value, value: Value) -> Self {
		Entry::new(current_datetime(), key, value)
	}

	/// Serialize as one JSON line (no trailing newline)
	pub fn to_line(&self) -> String {
		serde_json::json!([self.datetime, self.key, self.value]).to_string()
	}

	/// Parse one JSON line; malformed lines are logged and dropped
	pub fn from_line(line: &str) -> Option<Entry> {
		let parsed: Value = match serde_json::from_str(line) {
			Ok(v) => v,
			Err(e) => {
				warn!("Skipping malformed entry line {:?}: {}", line, e);
				return None;
			}
		};
		match parsed {
			Value::Array(mut items) if items.len() == 3 => {
				let value = items.pop().unwrap_or(Value::Null);
				let key = items.pop().unwrap_or(Value::Null);
				match items.pop() {
					Some(Value::String(datetime)) => Some(Entry { datetime, key, value }),
					other => {
						warn!("Skipping entry line with non-string datetime: {:?}", other);
						None
					}
				}
			}
			other => {
				warn!("Skipping entry line with wrong shape: {}", other);
				None
			}
		}
	}

	/// Canonical map key for this entry's `key` value
	pub fn key_id(&self) -> String {
		self.key.to_string()
	}
}

/// An entry together with the path it applies to
///
/// Serialized as `[[segment, ...], datetime, key, value]` in V2 logs.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWithPath {
	pub path: Vec<String>,
	pub entry: Entry,
}

impl EntryWithPath {
	pub fn new(path: Vec<String>, entry: Entry) -> Self {
		EntryWithPath { path, entry }
	}

	pub fn to_line(&self) -> String {
		serde_json::json!([self.path, self.entry.datetime, self.entry.key, self.entry.value])
			.to_string()
	}

	pub fn from_line(line: &str) -> Option<EntryWithPath> {
		let parsed: Value = match serde_json::from_str(line) {
			Ok(v) => v,
			Err(e) => {
				warn!("Skipping malformed entry line {:?}: {}", line, e);
				return None;
			}
		};
		match parsed {
			Value::Array(mut items) if items.len() == 4 => {
				let value = items.pop().unwrap_or(Value::Null);
				let key = items.pop().unwrap_or(Value::Null);
				let datetime = match items.pop() {
					Some(Value::String(datetime)) => datetime,
					other => {
						warn!("Skipping entry line with non-string datetime: {:?}", other);
						return None;
					}
				};
				let path = match items.pop() {
					Some(Value::Array(segments)) => {
						let mut path = Vec::with_capacity(segments.len());
						for segment in segments {
							match segment {
								Value::String(s) => path.push(s),
								other => {
									warn!("Skipping entry line with non-string path segment: {}", other);
									return None;
								}
							}
						}
						path
					}
					other => {
						warn!("Skipping entry line with non-array path: {:?}", other);
						return None;
					}
				};
				Some(EntryWithPath::new(path, Entry { datetime, key, value }))
			}
			other => {
				warn!("Skipping entry line with wrong shape: {}", other);
				None
			}
		}
	}
}

/// Identifies one merged cell of the logical map
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
	pub path: Vec<String>,
	pub key: Value,
}

impl StoredEntry {
	pub fn new(path: Vec<String>, key: Value) -> Self {
		StoredEntry { path, key }
	}
}

/// Parsed `.decsync-info` root metadata
///
/// Unknown members are preserved across rewrites; only `version` and
/// `fixed` are interpreted.
#[derive(Debug, Clone)]
pub struct DecsyncInfo {
	map: Map<String, Value>,
}

impl DecsyncInfo {
	/// The info written into a fresh directory
	pub fn new_default() -> Self {
		let mut map = Map::new();
		map.insert("version".to_string(), Value::from(DEFAULT_VERSION));
		DecsyncInfo { map }
	}

	/// Parse and validate raw info bytes
	pub fn parse(bytes: &[u8]) -> Result<Self, DecsyncError> {
		let parsed: Value = serde_json::from_slice(bytes).map_err(|e| {
			DecsyncError::InvalidInfo { message: format!("not valid JSON: {}", e) }
		})?;
		let map = match parsed {
			Value::Object(map) => map,
			other => {
				return Err(DecsyncError::InvalidInfo {
					message: format!("expected a JSON object, got {}", other),
				})
			}
		};
		let version = match map.get("version").and_then(Value::as_u64) {
			Some(v) if v >= 1 && v <= u8::MAX as u64 => v as u8,
			_ => {
				return Err(DecsyncError::InvalidInfo {
					message: "missing or invalid \"version\" member".to_string(),
				})
			}
		};
		if version > SUPPORTED_VERSION {
			return Err(DecsyncError::UnsupportedVersion {
				required: version,
				supported: SUPPORTED_VERSION,
			});
		}
		Ok(DecsyncInfo { map })
	}

	pub fn version(&self) -> u8 {
		// validated in parse(), always present
		self.map.get("version").and_then(Value::as_u64).unwrap_or(DEFAULT_VERSION as u64) as u8
	}

	/// True when auto-upgrade of the directory is disabled
	pub fn fixed(&self) -> bool {
		self.map.get("fixed").and_then(Value::as_bool).unwrap_or(false)
	}

	pub fn set_version(&mut self, version: u8) {
		self.map.insert("version".to_string(), Value::from(version));
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		Value::Object(self.map.clone()).to_string().into_bytes()
	}

	/// Load and validate the info file without creating it
	pub async fn load(
		fs: &dyn DecsyncFs,
		decsync_dir: &Path,
	) -> Result<Option<Self>, DecsyncError> {
		match fs.read(&decsync_dir.join(INFO_FILE)).await? {
			Some(bytes) => DecsyncInfo::parse(&bytes).map(Some),
			None => Ok(None),
		}
	}

	/// Load the info file, creating it with defaults when absent
	pub async fn load_or_create(
		fs: &dyn DecsyncFs,
		decsync_dir: &Path,
	) -> Result<Self, DecsyncError> {
		let path = decsync_dir.join(INFO_FILE);
		match fs.read(&path).await? {
			Some(bytes) => DecsyncInfo::parse(&bytes),
			None => {
				let info = DecsyncInfo::new_default();
				fs.write(&path, &info.to_bytes()).await?;
				Ok(info)
			}
		}
	}

	pub async fn save(&self, fs: &dyn DecsyncFs, decsync_dir: &Path) -> Result<(), DecsyncError> {
		fs.write(&decsync_dir.join(INFO_FILE), &self.to_bytes()).await
	}
}

/// Summary of one participating app, derived from the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
	pub app_id: String,
	/// `YYYY-MM-DD` of the app's most recent activity, when published
	pub last_active: Option<String>,
	/// Format version the app currently writes
	pub version: u8,
	/// Highest format version the app has declared support for
	pub supported_version: Option<u8>,
}

impl AppData {
	/// True when this app pins the directory to an old format version
	///
	/// An app without a declared supported-version predates the
	/// declaration and is treated as forward-compatible.
	pub fn is_legacy(&self, cutoff: &str, default_version: u8) -> bool {
		match (&self.last_active, self.supported_version) {
			(Some(active), Some(supported)) => {
				active.as_str() >= cutoff && supported < default_version
			}
			_ => false,
		}
	}
}


// vim: ts=4
