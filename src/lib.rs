//! # DecSync - Serverless Key/Value Synchronization
//!
//! DecSync keeps hierarchical key/value mappings in sync across devices
//! using nothing but a shared directory (Syncthing, a mounted cloud
//! drive, a USB stick). There is no server and no network protocol: every
//! app appends update records to its own subtree and merges what its
//! peers wrote, last writer wins on an ISO-8601 timestamp.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use decsync::{Decsync, get_app_id};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), decsync::DecsyncError> {
//!     let app_id = get_app_id("notes");
//!     let mut decsync: Decsync<MyStore> =
//!         Decsync::new(&decsync_dir, &local_dir, "notes", None, &app_id).await?;
//!     decsync.add_listener(vec![], |path, entry, store: &MyStore| {
//!         store.apply(path, entry);
//!     });
//!     decsync.init_stored_entries().await?;
//!     decsync.set_entry(&path, json!("content"), json!("hello")).await?;
//!     decsync.execute_all_new_entries(&store, false).await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod appid;
pub mod decsync;
pub mod encode;
pub mod error;
pub mod fs;
pub mod listeners;
pub mod logging;
pub mod queries;
pub mod state;
pub mod stored;
pub mod types;
pub mod v1;
pub mod v2;

// Re-export commonly used types and functions
pub use appid::{generate_app_id, get_app_id};
pub use decsync::{sub_dir, Decsync};
pub use error::DecsyncError;
pub use fs::{DecsyncFs, LocalFs, NodeKind};
pub use listeners::Listener;
pub use queries::{
	delete_app_data, get_active_apps, get_entries_count, get_static_info, list_collections,
	perm_delete_collection,
};
pub use types::{
	AppData, DecsyncInfo, Entry, EntryWithPath, StoredEntry, DEFAULT_VERSION, SUPPORTED_VERSION,
};

// vim: ts=4
