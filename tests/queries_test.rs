/// Cross-version directory queries: static info, app enumeration,
/// entry counts and deletion.
use decsync::{
	delete_app_data, get_active_apps, get_entries_count, get_static_info, list_collections,
	perm_delete_collection, Decsync, DecsyncFs, Entry, LocalFs,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

type Store = Mutex<HashMap<String, Value>>;

fn path(segments: &[&str]) -> Vec<String> {
	segments.iter().map(|s| s.to_string()).collect()
}

fn entry(datetime: &str, key: &str, value: Value) -> Entry {
	Entry::new(datetime.to_string(), json!(key), value)
}

fn shared_dir(tmp: &TempDir, version: u8) -> PathBuf {
	let shared = tmp.path().join("shared");
	std::fs::create_dir_all(&shared).unwrap();
	std::fs::write(shared.join(".decsync-info"), format!("{{\"version\": {}}}", version)).unwrap();
	shared
}

async fn open(tmp: &TempDir, local: &str, app: &str) -> Decsync<Store> {
	Decsync::new(&tmp.path().join("shared"), &tmp.path().join(local), "contacts", Some("work"), app)
		.await
		.unwrap()
}

/// One V1 writer and one V2 writer with hand-set activity markers
async fn mixed_version_dir(tmp: &TempDir) -> PathBuf {
	let shared = shared_dir(tmp, 1);

	let foo = open(tmp, "local-foo", "dev1-foo").await;
	assert_eq!(foo.version(), 1);
	foo.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-05-01T00:00:00.000", "last-active-dev1-foo", json!("2024-05-01"))],
	)
	.await
	.unwrap();
	foo.set_entries_for_path(
		&path(&["cats"]),
		&[entry("2024-05-01T00:00:01.000", "name", json!("Mittens"))],
	)
	.await
	.unwrap();

	// the second writer already uses V2
	std::fs::create_dir_all(shared.join("contacts/work/v2/dev2-bar/entries")).unwrap();
	let bar = open(tmp, "local-bar", "dev2-bar").await;
	assert_eq!(bar.version(), 2);
	bar.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-05-02T00:00:00.000", "last-active-dev2-bar", json!("2024-05-02"))],
	)
	.await
	.unwrap();

	shared
}

#[tokio::test]
async fn test_active_apps_are_sorted_by_activity() {
	let tmp = TempDir::new().unwrap();
	let shared = mixed_version_dir(&tmp).await;

	let fs = LocalFs::new();
	let apps = get_active_apps(&fs, &shared, "contacts", Some("work")).await.unwrap();
	assert_eq!(apps.len(), 2);

	assert_eq!(apps[0].app_id, "dev1-foo");
	assert_eq!(apps[0].version, 1);
	assert_eq!(apps[0].last_active.as_deref(), Some("2024-05-01"));

	assert_eq!(apps[1].app_id, "dev2-bar");
	assert_eq!(apps[1].version, 2);
	assert_eq!(apps[1].last_active.as_deref(), Some("2024-05-02"));
}

#[tokio::test]
async fn test_delete_app_data_removes_legacy_logs() {
	let tmp = TempDir::new().unwrap();
	let shared = mixed_version_dir(&tmp).await;
	let sub = shared.join("contacts/work");

	assert!(sub.join("new-entries/dev1-foo").is_dir());
	assert!(sub.join("stored-entries/dev1-foo").is_dir());

	let fs = LocalFs::new();
	delete_app_data(&fs, &shared, "contacts", Some("work"), "dev1-foo", 1, 2).await.unwrap();

	assert!(!sub.join("new-entries/dev1-foo").exists());
	assert!(!sub.join("stored-entries/dev1-foo").exists());

	// the remaining app keeps working; dangling cursors are harmless
	let mut bar = open(&tmp, "local-bar", "dev2-bar").await;
	let store: Store = Mutex::new(HashMap::new());
	bar.execute_all_new_entries(&store, false).await.unwrap();

	let apps = get_active_apps(&fs, &shared, "contacts", Some("work")).await.unwrap();
	assert_eq!(apps.len(), 1);
	assert_eq!(apps[0].app_id, "dev2-bar");
}

#[tokio::test]
async fn test_delete_app_data_keeps_logs_while_v1_is_current() {
	let tmp = TempDir::new().unwrap();
	let shared = mixed_version_dir(&tmp).await;
	let sub = shared.join("contacts/work");

	let fs = LocalFs::new();
	delete_app_data(&fs, &shared, "contacts", Some("work"), "dev1-foo", 1, 1).await.unwrap();

	// V1 readers still consume the log, only the merged state goes
	assert!(sub.join("new-entries/dev1-foo").is_dir());
	assert!(!sub.join("stored-entries/dev1-foo").exists());
}

#[tokio::test]
async fn test_static_info_newest_wins_and_v2_breaks_ties() {
	let tmp = TempDir::new().unwrap();
	let shared = mixed_version_dir(&tmp).await;

	let foo = open(&tmp, "local-foo", "dev1-foo").await;
	let bar = open(&tmp, "local-bar", "dev2-bar").await;

	// same instant, different formats: the newer format wins
	foo.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-06-01T00:00:00.000", "color-scheme", json!("light"))],
	)
	.await
	.unwrap();
	bar.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-06-01T00:00:00.000", "color-scheme", json!("dark"))],
	)
	.await
	.unwrap();

	let fs = LocalFs::new();
	let info = get_static_info(&fs, &shared, "contacts", Some("work")).await.unwrap();
	assert_eq!(info[&json!("color-scheme").to_string()].value, json!("dark"));

	// a strictly newer V1 entry still beats it
	foo.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-06-02T00:00:00.000", "color-scheme", json!("sepia"))],
	)
	.await
	.unwrap();
	let info = get_static_info(&fs, &shared, "contacts", Some("work")).await.unwrap();
	assert_eq!(info[&json!("color-scheme").to_string()].value, json!("sepia"));
}

#[tokio::test]
async fn test_entries_count_ignores_null_values() {
	let tmp = TempDir::new().unwrap();
	let shared = tmp.path().join("shared");

	let a = open(&tmp, "local-a", "dev1-a").await;
	a.set_entries_for_path(
		&path(&["cats", "persian"]),
		&[
			entry("2024-05-01T00:00:00.000", "name", json!("Mittens")),
			entry("2024-05-01T00:00:01.000", "color", json!("grey")),
		],
	)
	.await
	.unwrap();
	a.set_entries_for_path(
		&path(&["cats", "siamese"]),
		&[entry("2024-05-01T00:00:02.000", "name", json!("Felix"))],
	)
	.await
	.unwrap();
	// a deletion marker
	a.set_entries_for_path(
		&path(&["cats", "siamese"]),
		&[entry("2024-05-02T00:00:00.000", "name", Value::Null)],
	)
	.await
	.unwrap();

	let fs = LocalFs::new();
	let count = get_entries_count(&fs, &shared, "contacts", Some("work"), &path(&["cats"])).await.unwrap();
	assert_eq!(count, 2);

	let count =
		get_entries_count(&fs, &shared, "contacts", Some("work"), &path(&["cats", "siamese"]))
			.await
			.unwrap();
	assert_eq!(count, 0);

	let count = get_entries_count(&fs, &shared, "contacts", Some("work"), &path(&["dogs"])).await.unwrap();
	assert_eq!(count, 0);
}

#[tokio::test]
async fn test_list_and_delete_collections() {
	let tmp = TempDir::new().unwrap();

	for collection in &["work", "home"] {
		let decsync: Decsync<Store> = Decsync::new(
			&tmp.path().join("shared"),
			&tmp.path().join(format!("local-{}", collection)),
			"contacts",
			Some(collection),
			"dev1-a",
		)
		.await
		.unwrap();
		decsync
			.set_entries_for_path(
				&path(&["cats"]),
				&[entry("2024-05-01T00:00:00.000", "name", json!("Mittens"))],
			)
			.await
			.unwrap();
	}
	// a stray directory without DecSync layout is not a collection
	std::fs::create_dir_all(tmp.path().join("shared/contacts/stray")).unwrap();

	let fs = LocalFs::new();
	let mut collections = list_collections(&fs, &tmp.path().join("shared"), "contacts").await.unwrap();
	collections.sort();
	assert_eq!(collections, vec!["home".to_string(), "work".to_string()]);

	perm_delete_collection(&fs, &tmp.path().join("shared"), "contacts", Some("home")).await.unwrap();
	fs.reset_cache();
	let collections = list_collections(&fs, &tmp.path().join("shared"), "contacts").await.unwrap();
	assert_eq!(collections, vec!["work".to_string()]);
}

// vim: ts=4
