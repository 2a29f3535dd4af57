//! Application instance identifiers
//!
//! Every app instance owns a writer subtree named by its appId. The id
//! combines the device name with the application name, so one device can
//! run several apps and one app can run on several devices. The optional
//! random tail distinguishes multiple instances of the same app on the
//! same device.

use rand::Rng;

/// Build an appId for this device
///
/// With `is_random` the id gets a uniform 5-digit zero-padded suffix.
pub fn generate_app_id(app_name: &str, is_random: bool) -> String {
	let device = device_name();
	if is_random {
		let tail: u32 = rand::thread_rng().gen_range(0..100_000);
		format!("{}-{}-{:05}", device, app_name, tail)
	} else {
		format!("{}-{}", device, app_name)
	}
}

/// The deterministic appId for this device and app
pub fn get_app_id(app_name: &str) -> String {
	generate_app_id(app_name, false)
}

fn device_name() -> String {
	match sysinfo::System::host_name() {
		Some(name) => name,
		None => "device".to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deterministic_id_shape() {
		let id = get_app_id("app");
		assert!(id.ends_with("-app"));
		assert_eq!(id, get_app_id("app"));
	}

	#[test]
	fn test_random_id_shape() {
		let id = generate_app_id("app", true);
		let tail = id.rsplit('-').next().unwrap();
		assert_eq!(tail.len(), 5);
		assert!(tail.bytes().all(|b| b.is_ascii_digit()));
		assert!(id.starts_with(&format!("{}-app-", device_name())));
	}

	#[test]
	fn test_random_ids_differ() {
		// 20 draws from 100000 values collide with negligible probability
		let ids: std::collections::HashSet<String> =
			(0..20).map(|_| generate_app_id("app", true)).collect();
		assert!(ids.len() > 1);
	}
}

// vim: ts=4
