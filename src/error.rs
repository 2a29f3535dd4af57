//! Error types for DecSync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for DecSync operations
///
/// Only conditions the caller can act on are surfaced here. Malformed
/// on-disk lines and listener failures are handled locally (logged and
/// retried respectively) and never appear as errors.
#[derive(Debug)]
pub enum DecsyncError {
	/// The `.decsync-info` file exists but cannot be parsed or is
	/// structurally wrong
	InvalidInfo { message: String },

	/// The `.decsync-info` file declares a format version this build does
	/// not know
	UnsupportedVersion { required: u8, supported: u8 },

	/// An entry path is unusable (e.g. empty)
	InvalidPath { message: String },

	/// I/O error from the filesystem capability
	Io(io::Error),
}

impl fmt::Display for DecsyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DecsyncError::InvalidInfo { message } => {
				write!(f, "Invalid .decsync-info: {}", message)
			}
			DecsyncError::UnsupportedVersion { required, supported } => {
				write!(
					f,
					"Unsupported DecSync version: directory requires {}, this build supports up to {}",
					required, supported
				)
			}
			DecsyncError::InvalidPath { message } => {
				write!(f, "Invalid entry path: {}", message)
			}
			DecsyncError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for DecsyncError {}

impl From<io::Error> for DecsyncError {
	fn from(e: io::Error) -> Self {
		DecsyncError::Io(e)
	}
}


// vim: ts=4
