//! Merged per-writer snapshots ("stored entries") and the merge rules
//!
//! Every app folds the entries it has observed into its own snapshot: one
//! file per encoded path, one `[datetime, key, value]` line per key. The
//! snapshot is what makes `execute_stored_*` answerable without rescanning
//! logs, and it is the reference the read pass filters incoming entries
//! against.
//!
//! Merge rule: last writer wins on the lexicographically greatest
//! datetime. Replacement requires a strictly greater datetime, so on exact
//! ties the entry already in the snapshot stays. A writer folds its own
//! writes in at write time and writers are scanned in ascending appId
//! order, which makes tie-breaking deterministic: own entry first, then
//! the smallest appId.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::encode::{decode_path, encode_path};
use crate::error::DecsyncError;
use crate::fs::DecsyncFs;
use crate::logging::*;
use crate::types::{Entry, EntryWithPath};

/// Group a mixed batch by path, preserving first-seen order
pub fn group_by_path(entries: Vec<EntryWithPath>) -> Vec<(Vec<String>, Vec<Entry>)> {
	let mut groups: Vec<(Vec<String>, Vec<Entry>)> = Vec::new();
	for ewp in entries {
		match groups.iter_mut().find(|(path, _)| *path == ewp.path) {
			Some((_, list)) => list.push(ewp.entry),
			None => groups.push((ewp.path, vec![ewp.entry])),
		}
	}
	groups
}

/// Keep only the newest entry per key, preserving first-seen order
///
/// Within one batch a later occurrence wins ties, matching file order in
/// append-only logs.
pub fn collapse_by_key(entries: Vec<Entry>) -> Vec<Entry> {
	let mut out: Vec<Entry> = Vec::new();
	let mut index: HashMap<String, usize> = HashMap::new();
	for entry in entries {
		let id = entry.key_id();
		match index.get(&id) {
			Some(&i) => {
				if entry.datetime >= out[i].datetime {
					out[i] = entry;
				}
			}
			None => {
				index.insert(id, out.len());
				out.push(entry);
			}
		}
	}
	out
}

/// Split a byte region into complete text lines
///
/// Returns the lines and the number of bytes they cover. A trailing
/// fragment without a newline is left for the next read, so a log observed
/// mid-append is never misparsed. Non-UTF-8 lines are logged and skipped
/// but still count as consumed.
pub fn split_lines(bytes: &[u8]) -> (Vec<String>, u64) {
	let complete = match bytes.iter().rposition(|&b| b == b'\n') {
		Some(i) => i + 1,
		None => 0,
	};
	let mut lines = Vec::new();
	for raw in bytes[..complete].split(|&b| b == b'\n') {
		if raw.is_empty() {
			continue;
		}
		match std::str::from_utf8(raw) {
			Ok(line) => lines.push(line.to_string()),
			Err(e) => warn!("Skipping non-UTF-8 log line: {}", e),
		}
	}
	(lines, complete as u64)
}

/// Fold one snapshot map into an accumulator
///
/// `replace_ties` controls whether equal datetimes replace the held entry;
/// the cross-version queries use it to let the newer format win.
pub fn fold_newest(
	acc: &mut HashMap<String, Entry>,
	incoming: HashMap<String, Entry>,
	replace_ties: bool,
) {
	for (id, entry) in incoming {
		match acc.get(&id) {
			Some(held) => {
				let newer = if replace_ties {
					entry.datetime >= held.datetime
				} else {
					entry.datetime > held.datetime
				};
				if newer {
					acc.insert(id, entry);
				}
			}
			None => {
				acc.insert(id, entry);
			}
		}
	}
}

/// One writer's snapshot directory
pub struct Snapshot {
	dir: PathBuf,
}

impl Snapshot {
	pub fn new(dir: PathBuf) -> Self {
		Snapshot { dir }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn file(&self, path: &[String]) -> PathBuf {
		self.dir.join(encode_path(path))
	}

	/// Load the merged entries for one path, keyed by canonical key
	pub async fn read_path(
		&self,
		fs: &dyn DecsyncFs,
		path: &[String],
	) -> Result<HashMap<String, Entry>, DecsyncError> {
		let mut map: HashMap<String, Entry> = HashMap::new();
		if let Some(bytes) = fs.read(&self.file(path)).await? {
			let (lines, _) = split_lines(&bytes);
			for line in &lines {
				if let Some(entry) = Entry::from_line(line) {
					let id = entry.key_id();
					let newer = match map.get(&id) {
						Some(held) => entry.datetime >= held.datetime,
						None => true,
					};
					if newer {
						map.insert(id, entry);
					}
				}
			}
		}
		Ok(map)
	}

	/// Split a batch into entries newer than the snapshot and the rest
	///
	/// Returns the survivors plus the current snapshot state for a later
	/// [`commit`](Snapshot::commit). The batch should already be collapsed
	/// by key.
	pub async fn classify(
		&self,
		fs: &dyn DecsyncFs,
		path: &[String],
		batch: &[Entry],
	) -> Result<(Vec<Entry>, HashMap<String, Entry>), DecsyncError> {
		let stored = self.read_path(fs, path).await?;
		let survivors = batch
			.iter()
			.filter(|entry| match stored.get(&entry.key_id()) {
				Some(held) => entry.datetime > held.datetime,
				None => true,
			})
			.cloned()
			.collect();
		Ok((survivors, stored))
	}

	/// Fold survivors into the snapshot and rewrite its file
	pub async fn commit(
		&self,
		fs: &dyn DecsyncFs,
		path: &[String],
		mut stored: HashMap<String, Entry>,
		survivors: Vec<Entry>,
	) -> Result<(), DecsyncError> {
		if survivors.is_empty() {
			return Ok(());
		}
		for entry in survivors {
			stored.insert(entry.key_id(), entry);
		}
		let mut ids: Vec<&String> = stored.keys().collect();
		ids.sort();
		let mut buf = String::new();
		for id in ids {
			buf.push_str(&stored[id].to_line());
			buf.push('\n');
		}
		fs.write(&self.file(path), buf.as_bytes()).await
	}

	/// Classify and commit in one step; returns the survivors
	pub async fn insert(
		&self,
		fs: &dyn DecsyncFs,
		path: &[String],
		batch: &[Entry],
	) -> Result<Vec<Entry>, DecsyncError> {
		let (survivors, stored) = self.classify(fs, path, batch).await?;
		self.commit(fs, path, stored, survivors.clone()).await?;
		Ok(survivors)
	}

	/// All paths this snapshot holds entries for
	pub async fn list_paths(&self, fs: &dyn DecsyncFs) -> Result<Vec<Vec<String>>, DecsyncError> {
		let mut paths = Vec::new();
		for name in fs.list_files(&self.dir).await? {
			match decode_path(&name) {
				Some(path) => paths.push(path),
				None => warn!("Skipping foreign file {:?} in snapshot {:?}", name, self.dir),
			}
		}
		Ok(paths)
	}
}


// vim: ts=4
