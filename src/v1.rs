//! Version 1 storage engine: one append log per writer and path
//!
//! Layout under the subtree root:
//!
//! - `new-entries/<appId>/<encoded-path>` — per-path append log,
//! - `stored-entries/<appId>/<encoded-path>` — that app's merged snapshot,
//! - `read/<readerAppId>/<writerAppId>` — JSON object mapping encoded
//!   path name to the reader's byte offset in that writer's path file.
//!
//! The per-path sharding keeps individual files small but produces one
//! file per path, which is what the V2 layout fixes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::encode::{decode_path, encode_path};
use crate::error::DecsyncError;
use crate::fs::DecsyncFs;
use crate::listeners::{dispatch, Listener};
use crate::logging::*;
use crate::stored::{collapse_by_key, group_by_path, split_lines, Snapshot};
use crate::types::{Entry, EntryWithPath};

pub struct DecsyncV1 {
	fs: Arc<dyn DecsyncFs>,
	sub: PathBuf,
	own_app_id: String,
	own_snapshot: Snapshot,
}

impl DecsyncV1 {
	pub fn new(fs: Arc<dyn DecsyncFs>, sub: PathBuf, own_app_id: String) -> Self {
		let own_snapshot = Snapshot::new(sub.join("stored-entries").join(&own_app_id));
		DecsyncV1 { fs, sub, own_app_id, own_snapshot }
	}

	pub fn snapshot(&self) -> &Snapshot {
		&self.own_snapshot
	}

	fn new_entries_dir(&self) -> PathBuf {
		self.sub.join("new-entries")
	}

	fn cursor_file(&self, writer: &str) -> PathBuf {
		self.sub.join("read").join(&self.own_app_id).join(writer)
	}

	/// Directories this app owns in the V1 layout
	pub fn own_subtree(&self) -> Vec<PathBuf> {
		vec![
			self.new_entries_dir().join(&self.own_app_id),
			self.sub.join("stored-entries").join(&self.own_app_id),
			self.sub.join("read").join(&self.own_app_id),
		]
	}

	/// Append entries for one path and fold them into the own snapshot
	pub async fn set_entries_for_path(
		&self,
		path: &[String],
		entries: &[Entry],
	) -> Result<(), DecsyncError> {
		if path.is_empty() {
			return Err(DecsyncError::InvalidPath {
				message: "entry paths must not be empty".to_string(),
			});
		}
		let file = self.new_entries_dir().join(&self.own_app_id).join(encode_path(path));
		let mut buf = String::new();
		for entry in entries {
			buf.push_str(&entry.to_line());
			buf.push('\n');
		}
		self.fs.append(&file, buf.as_bytes()).await?;
		self.own_snapshot.insert(&*self.fs, path, &collapse_by_key(entries.to_vec())).await?;
		Ok(())
	}

	pub async fn set_entries(&self, entries: Vec<EntryWithPath>) -> Result<(), DecsyncError> {
		for (path, list) in group_by_path(entries) {
			self.set_entries_for_path(&path, &list).await?;
		}
		Ok(())
	}

	/// Process all entries peers appended since the last successful pass
	pub async fn execute_all_new_entries<T>(
		&self,
		listeners: &[Listener<T>],
		extra: Option<&T>,
	) -> Result<(), DecsyncError> {
		// ascending appId order; exact-datetime ties resolve to the
		// writer scanned first
		let mut writers = self.fs.list_directories(&self.new_entries_dir()).await?;
		writers.sort();
		for writer in writers {
			self.execute_writer(&writer, listeners, extra).await?;
		}
		Ok(())
	}

	async fn execute_writer<T>(
		&self,
		writer: &str,
		listeners: &[Listener<T>],
		extra: Option<&T>,
	) -> Result<(), DecsyncError> {
		let cursor_file = self.cursor_file(writer);
		let mut cursors: HashMap<String, u64> = match self.fs.read(&cursor_file).await? {
			Some(bytes) => match serde_json::from_slice(&bytes) {
				Ok(map) => map,
				Err(e) => {
					warn!("Unreadable cursors {:?} ({}), rescanning writer {}", cursor_file, e, writer);
					HashMap::new()
				}
			},
			None => HashMap::new(),
		};

		let writer_dir = self.new_entries_dir().join(writer);
		for name in self.fs.list_files(&writer_dir).await? {
			let path = match decode_path(&name) {
				Some(path) => path,
				None => {
					warn!("Skipping foreign file {:?} under writer {}", name, writer);
					continue;
				}
			};
			let offset = cursors.get(&name).copied().unwrap_or(0);
			let (bytes, _) = self.fs.read_from(&writer_dir.join(&name), offset).await?;
			let (lines, consumed) = split_lines(&bytes);
			if consumed == 0 {
				continue;
			}
			let parsed: Vec<Entry> = lines.iter().filter_map(|line| Entry::from_line(line)).collect();
			let batch = collapse_by_key(parsed);
			let (survivors, stored) = self.own_snapshot.classify(&*self.fs, &path, &batch).await?;
			debug!(
				"Writer {} path {:?}: {} new lines, {} survive the merge",
				writer,
				path,
				lines.len(),
				survivors.len()
			);
			if dispatch(listeners, &path, &survivors, extra) {
				self.own_snapshot.commit(&*self.fs, &path, stored, survivors).await?;
				// cursor advance is the last act for this path
				cursors.insert(name, offset + consumed);
				self.fs.write(&cursor_file, &cursors_to_bytes(&cursors)).await?;
			}
		}
		Ok(())
	}
}

fn cursors_to_bytes(cursors: &HashMap<String, u64>) -> Vec<u8> {
	let mut map = serde_json::Map::new();
	for (name, offset) in cursors {
		map.insert(name.clone(), Value::from(*offset));
	}
	Value::Object(map).to_string().into_bytes()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::LocalFs;
	use serde_json::json;
	use std::sync::Mutex;
	use tempfile::TempDir;

	fn engine(fs: &Arc<dyn DecsyncFs>, sub: &std::path::Path, app: &str) -> DecsyncV1 {
		DecsyncV1::new(fs.clone(), sub.to_path_buf(), app.to_string())
	}

	fn collector() -> (Mutex<Vec<(Vec<String>, Entry)>>, Vec<Listener<Mutex<Vec<(Vec<String>, Entry)>>>>) {
		let seen = Mutex::new(Vec::new());
		let listeners = vec![Listener::on_entry(
			vec![],
			|path: &[String], entry: &Entry, extra: &Mutex<Vec<(Vec<String>, Entry)>>| {
				extra.lock().unwrap().push((path.to_vec(), entry.clone()));
			},
		)];
		(seen, listeners)
	}

	fn path(segments: &[&str]) -> Vec<String> {
		segments.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn test_own_writes_do_not_echo() {
		let tmp = TempDir::new().unwrap();
		let fs: Arc<dyn DecsyncFs> = Arc::new(LocalFs::new());
		let v1 = engine(&fs, tmp.path(), "dev1-app");

		v1.set_entries_for_path(&path(&["cats"]), &[Entry::now(json!("name"), json!("Mittens"))])
			.await
			.unwrap();

		let (seen, listeners) = collector();
		v1.execute_all_new_entries(&listeners, Some(&seen)).await.unwrap();
		assert!(seen.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_peer_entries_are_delivered_once() {
		let tmp = TempDir::new().unwrap();
		let fs: Arc<dyn DecsyncFs> = Arc::new(LocalFs::new());
		let writer = engine(&fs, tmp.path(), "dev1-writer");
		let reader = engine(&fs, tmp.path(), "dev2-reader");

		writer
			.set_entries_for_path(&path(&["cats"]), &[Entry::now(json!("name"), json!("Mittens"))])
			.await
			.unwrap();

		let (seen, listeners) = collector();
		reader.execute_all_new_entries(&listeners, Some(&seen)).await.unwrap();
		assert_eq!(seen.lock().unwrap().len(), 1);

		// idempotent: nothing new on a second pass
		reader.execute_all_new_entries(&listeners, Some(&seen)).await.unwrap();
		assert_eq!(seen.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_empty_path_is_rejected() {
		let tmp = TempDir::new().unwrap();
		let fs: Arc<dyn DecsyncFs> = Arc::new(LocalFs::new());
		let v1 = engine(&fs, tmp.path(), "dev1-app");
		let result = v1.set_entries_for_path(&[], &[Entry::now(json!("k"), json!("v"))]).await;
		assert!(matches!(result, Err(DecsyncError::InvalidPath { .. })));
	}

	#[tokio::test]
	async fn test_malformed_lines_are_skipped() {
		let tmp = TempDir::new().unwrap();
		let fs: Arc<dyn DecsyncFs> = Arc::new(LocalFs::new());
		let writer = engine(&fs, tmp.path(), "dev1-writer");
		let reader = engine(&fs, tmp.path(), "dev2-reader");

		writer
			.set_entries_for_path(&path(&["cats"]), &[Entry::now(json!("name"), json!("Mittens"))])
			.await
			.unwrap();
		// hand-corrupt the log with a bad line
		let file = tmp.path().join("new-entries/dev1-writer").join(encode_path(&path(&["cats"])));
		fs.append(&file, b"garbage line\n").await.unwrap();

		let (seen, listeners) = collector();
		reader.execute_all_new_entries(&listeners, Some(&seen)).await.unwrap();
		assert_eq!(seen.lock().unwrap().len(), 1);
	}
}

// vim: ts=4
