/// Online V1 to V2 upgrade scenarios.
///
/// Tests verify that:
/// 1. A V1 directory upgrades once no active app depends on V1
/// 2. Apps that recently declared an old supported-version block the
///    upgrade until they catch up
/// 3. A `fixed` info file disables auto-upgrade entirely
/// 4. The merged view survives the upgrade unchanged
use decsync::{get_entries_count, queries, Decsync, Entry, LocalFs};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

type Store = Mutex<HashMap<String, Value>>;

fn path(segments: &[&str]) -> Vec<String> {
	segments.iter().map(|s| s.to_string()).collect()
}

fn cell_id(path: &[String], key: &Value) -> String {
	format!("{}/{}", path.join("/"), key)
}

fn entry(datetime: &str, key: &str, value: Value) -> Entry {
	Entry::new(datetime.to_string(), json!(key), value)
}

fn v1_shared_dir(tmp: &TempDir) -> PathBuf {
	let shared = tmp.path().join("shared");
	std::fs::create_dir_all(&shared).unwrap();
	std::fs::write(shared.join(".decsync-info"), b"{\"version\": 1}").unwrap();
	shared
}

async fn open_with_store(tmp: &TempDir, local: &str, app: &str) -> Decsync<Store> {
	let mut decsync: Decsync<Store> = Decsync::new(
		&tmp.path().join("shared"),
		&tmp.path().join(local),
		"contacts",
		None,
		app,
	)
	.await
	.unwrap();
	decsync.add_listener(vec![], |path, entry: &Entry, store: &Store| {
		store.lock().unwrap().insert(cell_id(path, &entry.key), entry.value.clone());
	});
	decsync
}

#[tokio::test]
async fn test_v1_directory_upgrades_without_loss() {
	let tmp = TempDir::new().unwrap();
	let shared = v1_shared_dir(&tmp);

	let a = open_with_store(&tmp, "local-a", "dev1-a").await;
	assert_eq!(a.version(), 1);
	a.set_entries_for_path(
		&path(&["cats", "persian"]),
		&[
			entry("2024-05-01T10:00:00.000", "name", json!("Mittens")),
			entry("2024-05-01T10:00:01.000", "color", json!("grey")),
		],
	)
	.await
	.unwrap();

	// B joins at V1, sees A's entries, and upgrades the directory
	let mut b = open_with_store(&tmp, "local-b", "dev2-b").await;
	assert_eq!(b.version(), 1);
	let store_b: Store = Mutex::new(HashMap::new());
	b.execute_all_new_entries(&store_b, false).await.unwrap();
	assert_eq!(b.version(), 2);
	assert_eq!(
		store_b.lock().unwrap().get(&cell_id(&path(&["cats", "persian"]), &json!("name"))),
		Some(&json!("Mittens"))
	);

	let info = std::fs::read(shared.join(".decsync-info")).unwrap();
	let info: Value = serde_json::from_slice(&info).unwrap();
	assert_eq!(info["version"], json!(2));

	// a fresh reader joins at V2 and sees the identical merged view
	let mut c = open_with_store(&tmp, "local-c", "dev3-c").await;
	assert_eq!(c.version(), 2);
	c.init_stored_entries().await.unwrap();
	let replay: Store = Mutex::new(HashMap::new());
	c.execute_stored_entries_for_path_prefix(&path(&["cats"]), &replay, None).await.unwrap();
	let replay = replay.into_inner().unwrap();
	assert_eq!(replay.get(&cell_id(&path(&["cats", "persian"]), &json!("name"))), Some(&json!("Mittens")));
	assert_eq!(replay.get(&cell_id(&path(&["cats", "persian"]), &json!("color"))), Some(&json!("grey")));

	let fs = LocalFs::new();
	let count = get_entries_count(&fs, &shared, "contacts", None, &path(&["cats"])).await.unwrap();
	assert_eq!(count, 2);
}

#[tokio::test]
async fn test_recently_active_legacy_app_blocks_upgrade() {
	let tmp = TempDir::new().unwrap();
	let shared = v1_shared_dir(&tmp);

	// A behaves like an old client: recently active, V1 only
	let a = open_with_store(&tmp, "local-a", "dev1-a").await;
	let today = decsync::types::today();
	a.set_entries_for_path(
		&path(&["info"]),
		&[
			entry("2024-05-01T10:00:00.000", "last-active-dev1-a", json!(today)),
			entry("2024-05-01T10:00:01.000", "supported-version-dev1-a", json!(1)),
		],
	)
	.await
	.unwrap();
	a.set_entries_for_path(
		&path(&["cats"]),
		&[entry("2024-05-01T10:00:02.000", "name", json!("Mittens"))],
	)
	.await
	.unwrap();

	let mut b = open_with_store(&tmp, "local-b", "dev2-b").await;
	let store_b: Store = Mutex::new(HashMap::new());
	b.execute_all_new_entries(&store_b, false).await.unwrap();

	// the legacy app pins the directory to V1
	assert_eq!(b.version(), 1);
	let info: Value =
		serde_json::from_slice(&std::fs::read(shared.join(".decsync-info")).unwrap()).unwrap();
	assert_eq!(info["version"], json!(1));

	// once A declares V2 support, the next pass upgrades
	a.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-05-02T10:00:00.000", "supported-version-dev1-a", json!(2))],
	)
	.await
	.unwrap();
	b.execute_all_new_entries(&store_b, false).await.unwrap();
	assert_eq!(b.version(), 2);

	// nothing was lost on the way
	let replay: Store = Mutex::new(HashMap::new());
	b.execute_stored_entries_for_path_exact(&path(&["cats"]), &replay, None).await.unwrap();
	assert_eq!(
		replay.lock().unwrap().get(&cell_id(&path(&["cats"]), &json!("name"))),
		Some(&json!("Mittens"))
	);
}

#[tokio::test]
async fn test_fixed_info_disables_auto_upgrade() {
	let tmp = TempDir::new().unwrap();
	let shared = tmp.path().join("shared");
	std::fs::create_dir_all(&shared).unwrap();
	std::fs::write(shared.join(".decsync-info"), b"{\"version\": 1, \"fixed\": true}").unwrap();

	let mut a = open_with_store(&tmp, "local-a", "dev1-a").await;
	assert_eq!(a.version(), 1);
	let store: Store = Mutex::new(HashMap::new());
	a.execute_all_new_entries(&store, false).await.unwrap();
	a.execute_all_new_entries(&store, false).await.unwrap();
	assert_eq!(a.version(), 1);
}

#[tokio::test]
async fn test_upgrade_preserves_static_info() {
	let tmp = TempDir::new().unwrap();
	let shared = v1_shared_dir(&tmp);

	let a = open_with_store(&tmp, "local-a", "dev1-a").await;
	a.set_entries_for_path(
		&path(&["info"]),
		&[entry("2024-05-01T10:00:00.000", "color-scheme", json!("dark"))],
	)
	.await
	.unwrap();

	let mut b = open_with_store(&tmp, "local-b", "dev2-b").await;
	let store: Store = Mutex::new(HashMap::new());
	b.execute_all_new_entries(&store, false).await.unwrap();
	assert_eq!(b.version(), 2);

	let fs = LocalFs::new();
	let info = queries::get_static_info(&fs, &shared, "contacts", None).await.unwrap();
	let color = info.get(&json!("color-scheme").to_string()).unwrap();
	assert_eq!(color.value, json!("dark"));
	assert_eq!(color.datetime, "2024-05-01T10:00:00.000");
}

// vim: ts=4
