//! Filesystem capability consumed by the engines
//!
//! DecSync has no server and no network protocol: the shared directory is
//! the protocol. Everything the core needs from the platform sits behind
//! the [`DecsyncFs`] trait so hosts can substitute their own storage layer
//! and tests can run against scratch directories.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::DecsyncError;

/// What a path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Absent,
	File,
	Directory,
}

/// Abstract hierarchical byte store
///
/// Any ordered byte-oriented hierarchical store suffices. Contract notes:
///
/// - `write` is create-or-replace and atomic per file,
/// - `append` is create-if-absent and atomic per call,
/// - listings never include names starting with `.`,
/// - listing or reading something absent yields empty results, not errors.
#[async_trait]
pub trait DecsyncFs: Send + Sync {
	/// Read a whole file, `None` when absent
	async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DecsyncError>;

	/// Create or replace a file, creating parent directories as needed
	async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), DecsyncError>;

	/// Append to a file, creating it (and parents) when absent
	async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DecsyncError>;

	/// Read from a byte offset to the end; returns the bytes and the
	/// offset just past them
	async fn read_from(&self, path: &Path, offset: u64) -> Result<(Vec<u8>, u64), DecsyncError>;

	/// Names of subdirectories, empty when the directory is absent
	async fn list_directories(&self, path: &Path) -> Result<Vec<String>, DecsyncError>;

	/// Names of plain files, empty when the directory is absent
	async fn list_files(&self, path: &Path) -> Result<Vec<String>, DecsyncError>;

	async fn node_kind(&self, path: &Path) -> Result<NodeKind, DecsyncError>;

	/// Delete a file or a whole directory tree; absent paths are fine
	async fn delete(&self, path: &Path) -> Result<(), DecsyncError>;

	/// Drop any host-side caching
	fn reset_cache(&self);
}

/// Local-disk implementation over `tokio::fs`
///
/// Directory listings are cached per instance so one read pass does not
/// re-scan the same directories over and over. The cache is dropped via
/// `reset_cache`, which the facade calls before every read pass and around
/// version upgrades. Own writes invalidate affected listings directly.
pub struct LocalFs {
	listings: Mutex<HashMap<PathBuf, Vec<(String, NodeKind)>>>,
}

impl LocalFs {
	pub fn new() -> Self {
		LocalFs { listings: Mutex::new(HashMap::new()) }
	}

	fn invalidate(&self, path: &Path) {
		let mut listings = self.listings.lock().unwrap();
		listings.retain(|dir, _| !path.starts_with(dir) && !dir.starts_with(path));
	}

	async fn scan_dir(&self, path: &Path) -> Result<Vec<(String, NodeKind)>, DecsyncError> {
		if let Some(cached) = self.listings.lock().unwrap().get(path) {
			return Ok(cached.clone());
		}

		let mut entries = Vec::new();
		let mut dir = match tokio::fs::read_dir(path).await {
			Ok(dir) => dir,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Ok(entries);
			}
			Err(e) => return Err(e.into()),
		};
		while let Some(item) = dir.next_entry().await? {
			let name = item.file_name().to_string_lossy().into_owned();
			if name.starts_with('.') {
				continue;
			}
			let kind =
				if item.file_type().await?.is_dir() { NodeKind::Directory } else { NodeKind::File };
			entries.push((name, kind));
		}
		entries.sort_by(|a, b| a.0.cmp(&b.0));

		self.listings.lock().unwrap().insert(path.to_path_buf(), entries.clone());
		Ok(entries)
	}
}

impl Default for LocalFs {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl DecsyncFs for LocalFs {
	async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DecsyncError> {
		match tokio::fs::read(path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), DecsyncError> {
		let parent = match path.parent() {
			Some(parent) => parent,
			None => Path::new("."),
		};
		tokio::fs::create_dir_all(parent).await?;

		// write-then-rename so readers never observe a half-written file
		let name = match path.file_name() {
			Some(name) => name.to_string_lossy().into_owned(),
			None => {
				return Err(DecsyncError::Io(io::Error::new(
					io::ErrorKind::InvalidInput,
					format!("cannot write to {:?}", path),
				)))
			}
		};
		let tmp = parent.join(format!(".{}.tmp", name));
		tokio::fs::write(&tmp, bytes).await?;
		tokio::fs::rename(&tmp, path).await?;

		self.invalidate(path);
		Ok(())
	}

	async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DecsyncError> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut file =
			tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
		file.write_all(bytes).await?;
		file.flush().await?;

		self.invalidate(path);
		Ok(())
	}

	async fn read_from(&self, path: &Path, offset: u64) -> Result<(Vec<u8>, u64), DecsyncError> {
		let mut file = match tokio::fs::File::open(path).await {
			Ok(file) => file,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
			Err(e) => return Err(e.into()),
		};
		file.seek(io::SeekFrom::Start(offset)).await?;
		let mut buf = Vec::new();
		let n = file.read_to_end(&mut buf).await?;
		Ok((buf, offset + n as u64))
	}

	async fn list_directories(&self, path: &Path) -> Result<Vec<String>, DecsyncError> {
		let entries = self.scan_dir(path).await?;
		Ok(entries
			.into_iter()
			.filter(|(_, kind)| *kind == NodeKind::Directory)
			.map(|(name, _)| name)
			.collect())
	}

	async fn list_files(&self, path: &Path) -> Result<Vec<String>, DecsyncError> {
		let entries = self.scan_dir(path).await?;
		Ok(entries
			.into_iter()
			.filter(|(_, kind)| *kind == NodeKind::File)
			.map(|(name, _)| name)
			.collect())
	}

	async fn node_kind(&self, path: &Path) -> Result<NodeKind, DecsyncError> {
		match tokio::fs::metadata(path).await {
			Ok(meta) => {
				Ok(if meta.is_dir() { NodeKind::Directory } else { NodeKind::File })
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(NodeKind::Absent),
			Err(e) => Err(e.into()),
		}
	}

	async fn delete(&self, path: &Path) -> Result<(), DecsyncError> {
		match self.node_kind(path).await? {
			NodeKind::Absent => Ok(()),
			NodeKind::File => {
				tokio::fs::remove_file(path).await?;
				self.invalidate(path);
				Ok(())
			}
			NodeKind::Directory => {
				tokio::fs::remove_dir_all(path).await?;
				self.invalidate(path);
				Ok(())
			}
		}
	}

	fn reset_cache(&self) {
		self.listings.lock().unwrap().clear();
	}
}


// vim: ts=4
