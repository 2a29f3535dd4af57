//! Listener registration and dispatch for entry updates

use crate::types::Entry;
use crate::logging::*;

// Type aliases to reduce complexity
type EntryFn<T> = dyn Fn(&[String], &Entry, &T) -> bool + Send + Sync;
type EntriesFn<T> = dyn Fn(&[String], &[Entry], &T) -> bool + Send + Sync;

enum Handler<T> {
	/// Invoked once per entry
	Single(Box<EntryFn<T>>),
	/// Invoked once per path with the whole batch
	Multi(Box<EntriesFn<T>>),
}

/// A registered callback for one path prefix
///
/// A listener matches every path that has its `subpath` as a prefix. The
/// callback returns `true` when the host has durably applied the update;
/// `false` requests re-delivery of the batch on a later read pass.
pub struct Listener<T> {
	subpath: Vec<String>,
	handler: Handler<T>,
}

impl<T> Listener<T> {
	/// Listener whose callback cannot fail
	pub fn on_entry<F>(subpath: Vec<String>, on_entry: F) -> Self
	where
		F: Fn(&[String], &Entry, &T) + Send + Sync + 'static,
	{
		Listener {
			subpath,
			handler: Handler::Single(Box::new(move |path, entry, extra| {
				on_entry(path, entry, extra);
				true
			})),
		}
	}

	/// Listener whose callback reports success per entry
	pub fn on_entry_with_success<F>(subpath: Vec<String>, on_entry: F) -> Self
	where
		F: Fn(&[String], &Entry, &T) -> bool + Send + Sync + 'static,
	{
		Listener { subpath, handler: Handler::Single(Box::new(on_entry)) }
	}

	/// Listener receiving the whole batch of entries for one path
	pub fn on_entries<F>(subpath: Vec<String>, on_entries: F) -> Self
	where
		F: Fn(&[String], &[Entry], &T) -> bool + Send + Sync + 'static,
	{
		Listener { subpath, handler: Handler::Multi(Box::new(on_entries)) }
	}

	pub fn matches(&self, path: &[String]) -> bool {
		path.starts_with(&self.subpath)
	}

	/// Deliver a batch; any per-entry failure fails the whole batch
	pub fn notify(&self, path: &[String], entries: &[Entry], extra: &T) -> bool {
		match &self.handler {
			Handler::Single(f) => {
				let mut ok = true;
				for entry in entries {
					if !f(path, entry, extra) {
						ok = false;
					}
				}
				ok
			}
			Handler::Multi(f) => f(path, entries, extra),
		}
	}
}

/// True for entries the library consumes itself and never shows to hosts
pub fn is_internal_info_entry(path: &[String], key: &serde_json::Value) -> bool {
	if !(path.len() == 1 && path[0] == "info") {
		return false;
	}
	match key.as_str() {
		Some(key) => key.starts_with("last-active-") || key.starts_with("supported-version-"),
		None => false,
	}
}

/// Deliver a batch of entries for one path to the matching listener
///
/// Returns `true` when the batch counts as delivered and cursors may
/// advance. `extra = None` is the silent initialization mode: nothing is
/// invoked and everything counts as delivered. Entries with no matching
/// listener are logged and count as delivered so they never block the log.
pub fn dispatch<T>(
	listeners: &[Listener<T>],
	path: &[String],
	entries: &[Entry],
	extra: Option<&T>,
) -> bool {
	let extra = match extra {
		Some(extra) => extra,
		None => return true,
	};
	let visible: Vec<Entry> = entries
		.iter()
		.filter(|entry| !is_internal_info_entry(path, &entry.key))
		.cloned()
		.collect();
	if visible.is_empty() {
		return true;
	}
	match listeners.iter().find(|listener| listener.matches(path)) {
		Some(listener) => listener.notify(path, &visible, extra),
		None => {
			warn!("No listener matches path {:?}, dropping {} entries", path, visible.len());
			true
		}
	}
}


// vim: ts=4
