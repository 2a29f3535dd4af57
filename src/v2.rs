//! Version 2 storage engine: one append log per writer
//!
//! Layout under the subtree root:
//!
//! - `v2/<writerAppId>/entries/<sequence>` — the writer's append log;
//!   this engine writes a single segment `0`, the sequence namespace is
//!   reserved for sharding,
//! - `v2/<writerAppId>/sequences/<readerAppId>` — the reader's byte
//!   offset into the log, a bare JSON number,
//! - `v2/<writerAppId>/stored-entries/<encoded-path>` — that app's merged
//!   snapshot.
//!
//! Collapsing V1's per-path sharding into one log per writer cuts the
//! file count by orders of magnitude on directories with many paths,
//! which is what consumer file-sync tools choke on.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::DecsyncError;
use crate::fs::DecsyncFs;
use crate::listeners::{dispatch, Listener};
use crate::logging::*;
use crate::stored::{collapse_by_key, group_by_path, Snapshot};
use crate::types::{Entry, EntryWithPath};

const SEGMENT: &str = "0";

pub struct DecsyncV2 {
	fs: Arc<dyn DecsyncFs>,
	sub: PathBuf,
	own_app_id: String,
	own_snapshot: Snapshot,
}

impl DecsyncV2 {
	pub fn new(fs: Arc<dyn DecsyncFs>, sub: PathBuf, own_app_id: String) -> Self {
		let own_snapshot = Snapshot::new(sub.join("v2").join(&own_app_id).join("stored-entries"));
		DecsyncV2 { fs, sub, own_app_id, own_snapshot }
	}

	pub fn snapshot(&self) -> &Snapshot {
		&self.own_snapshot
	}

	fn v2_dir(&self) -> PathBuf {
		self.sub.join("v2")
	}

	fn log_file(&self, writer: &str) -> PathBuf {
		self.v2_dir().join(writer).join("entries").join(SEGMENT)
	}

	fn cursor_file(&self, writer: &str) -> PathBuf {
		self.v2_dir().join(writer).join("sequences").join(&self.own_app_id)
	}

	/// Directories this app owns in the V2 layout
	///
	/// Cursor files this app planted under other writers are not listed;
	/// orphaned cursors are harmless.
	pub fn own_subtree(&self) -> Vec<PathBuf> {
		vec![self.v2_dir().join(&self.own_app_id)]
	}

	/// Append a batch to the own log and fold it into the own snapshot
	pub async fn set_entries(&self, entries: Vec<EntryWithPath>) -> Result<(), DecsyncError> {
		for ewp in &entries {
			if ewp.path.is_empty() {
				return Err(DecsyncError::InvalidPath {
					message: "entry paths must not be empty".to_string(),
				});
			}
		}
		let mut buf = String::new();
		for ewp in &entries {
			buf.push_str(&ewp.to_line());
			buf.push('\n');
		}
		self.fs.append(&self.log_file(&self.own_app_id), buf.as_bytes()).await?;
		for (path, list) in group_by_path(entries) {
			self.own_snapshot.insert(&*self.fs, &path, &collapse_by_key(list)).await?;
		}
		Ok(())
	}

	pub async fn set_entries_for_path(
		&self,
		path: &[String],
		entries: &[Entry],
	) -> Result<(), DecsyncError> {
		let entries = entries
			.iter()
			.map(|entry| EntryWithPath::new(path.to_vec(), entry.clone()))
			.collect();
		self.set_entries(entries).await
	}

	/// Process all entries peers appended since the last successful pass
	pub async fn execute_all_new_entries<T>(
		&self,
		listeners: &[Listener<T>],
		extra: Option<&T>,
	) -> Result<(), DecsyncError> {
		// ascending appId order; exact-datetime ties resolve to the
		// writer scanned first
		let mut writers = self.fs.list_directories(&self.v2_dir()).await?;
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
		let cursor: u64 = match self.fs.read(&cursor_file).await? {
			Some(bytes) => match serde_json::from_slice(&bytes) {
				Ok(offset) => offset,
				Err(e) => {
					warn!("Unreadable cursor {:?} ({}), rescanning writer {}", cursor_file, e, writer);
					0
				}
			},
			None => 0,
		};

		let (bytes, _) = self.fs.read_from(&self.log_file(writer), cursor).await?;
		// only complete lines; a trailing fragment waits for the next pass
		let complete = match bytes.iter().rposition(|&b| b == b'\n') {
			Some(i) => i + 1,
			None => 0,
		};
		if complete == 0 {
			return Ok(());
		}

		let mut parsed: Vec<(u64, EntryWithPath)> = Vec::new();
		let mut offset = cursor;
		for raw in bytes[..complete].split(|&b| b == b'\n') {
			let start = offset;
			offset += raw.len() as u64 + 1;
			if raw.is_empty() {
				continue;
			}
			match std::str::from_utf8(raw) {
				Ok(line) => {
					if let Some(ewp) = EntryWithPath::from_line(line) {
						parsed.push((start, ewp));
					}
				}
				Err(e) => warn!("Skipping non-UTF-8 log line from writer {}: {}", writer, e),
			}
		}

		// group by path, remembering where each group starts in the log
		let mut groups: Vec<(Vec<String>, Vec<Entry>, u64)> = Vec::new();
		for (start, ewp) in parsed {
			match groups.iter_mut().find(|(path, _, _)| *path == ewp.path) {
				Some((_, list, _)) => list.push(ewp.entry),
				None => groups.push((ewp.path, vec![ewp.entry], start)),
			}
		}

		let end = cursor + complete as u64;
		let mut advance_to = end;
		for (path, list, first_offset) in groups {
			let batch = collapse_by_key(list);
			let (survivors, stored) = self.own_snapshot.classify(&*self.fs, &path, &batch).await?;
			debug!(
				"Writer {} path {:?}: {} entries, {} survive the merge",
				writer,
				path,
				batch.len(),
				survivors.len()
			);
			if dispatch(listeners, &path, &survivors, extra) {
				self.own_snapshot.commit(&*self.fs, &path, stored, survivors).await?;
			} else {
				// stop at the failed path; entries already applied before
				// this offset are filtered out on the re-read
				advance_to = first_offset;
				break;
			}
		}
		if advance_to > cursor {
			self.fs.write(&cursor_file, advance_to.to_string().as_bytes()).await?;
		}
		Ok(())
	}
}


// vim: ts=4
