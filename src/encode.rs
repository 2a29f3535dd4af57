//! Filename codec for entry paths
//!
//! Arbitrary Unicode path segments have to become legal, collision-free
//! filename components on every filesystem a sync tool may put underneath
//! us. The scheme below is part of the wire format and must never change:
//!
//! - each segment is the lowercase hex encoding of its UTF-8 bytes,
//! - a whole path is its encoded segments joined by `-`.
//!
//! Hex never produces uppercase letters, so names survive case-insensitive
//! filesystems, and `-` cannot appear inside a segment encoding, so the
//! joined form is unambiguous. Expansion is bounded at 2x per segment plus
//! one separator byte per join.

use crate::logging::*;

/// Encode a single path segment as a filename component
pub fn encode_segment(segment: &str) -> String {
	hex::encode(segment.as_bytes())
}

/// Decode a single filename component back to a path segment
///
/// Returns `None` for names not produced by [`encode_segment`].
pub fn decode_segment(name: &str) -> Option<String> {
	// reject uppercase so every path has exactly one on-disk spelling
	if name.bytes().any(|b| b.is_ascii_uppercase()) {
		return None;
	}
	let bytes = hex::decode(name).ok()?;
	String::from_utf8(bytes).ok()
}

/// Encode a whole entry path as a single filename
///
/// The empty path has no filename; writers reject it before getting here.
pub fn encode_path(path: &[String]) -> String {
	path.iter().map(|segment| encode_segment(segment)).collect::<Vec<_>>().join("-")
}

/// Decode a filename back to an entry path
///
/// Returns `None` for foreign filenames, which scanners skip with a warning.
pub fn decode_path(name: &str) -> Option<Vec<String>> {
	if name.is_empty() {
		return None;
	}
	let mut path = Vec::new();
	for part in name.split('-') {
		match decode_segment(part) {
			Some(segment) => path.push(segment),
			None => {
				debug!("Undecodable filename component {:?} in {:?}", part, name);
				return None;
			}
		}
	}
	Some(path)
}


// vim: ts=4
