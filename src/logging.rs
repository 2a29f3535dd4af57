//! Tracing macros and subscriber setup
//!
//! The library only emits `tracing` events and never installs a
//! subscriber on its own: embedding hosts usually bring one. For hosts
//! and test binaries that do not, [`init_tracing`] installs a stderr
//! subscriber that keeps foreign crates at `warn` and this crate at
//! `info`. `RUST_LOG` overrides the whole directive set, so
//! `RUST_LOG=decsync::v2=trace` narrows in on one engine.

pub use tracing::{debug, error, info, trace, warn};

/// Directive set used when `RUST_LOG` is unset
const DEFAULT_DIRECTIVES: &str = "warn,decsync=info";

/// Install a stderr subscriber for a host process without one
pub fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_DIRECTIVES));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

// vim: ts=4
