//! Export, import and on-disk persistence

use dpo_memory::{ExecutionRecord, MemoryConfig, RecordStatus, SessionStore, Turn};
use dpo_types::SessionId;
use pretty_assertions::assert_eq;

fn populated(id: &SessionId) -> SessionStore {
    let store = SessionStore::default();
    store.record(id, Turn::new("load sales", "loaded 12 rows"));
    store.record(id, Turn::new("profile it", "12 rows, 4 columns"));
    store.set_scratch(id, "active_dataset", serde_json::json!("sales"));
    store.log_execution(
        id,
        ExecutionRecord::new("workflow", RecordStatus::Success).with_details(serde_json::json!({"tasks": 2})),
    );
    store
}

#[test]
fn export_import_preserves_the_session() {
    let id = SessionId::new("s-1");
    let source = populated(&id);
    let snapshot = source.export(&id).unwrap();

    let json = serde_json::to_string(&snapshot).unwrap();
    let restored = SessionStore::default();
    restored.import(serde_json::from_str(&json).unwrap()).unwrap();

    assert_eq!(restored.get_context(&id), source.get_context(&id));
    assert_eq!(restored.execution_log(&id, None, None).len(), 1);
}

#[test]
fn import_into_a_smaller_store_keeps_the_newest_turns() {
    let id = SessionId::new("s-2");
    let snapshot = populated(&id).export(&id).unwrap();
    let small = SessionStore::new(MemoryConfig::default().with_max_history(1));
    small.import(snapshot).unwrap();
    let turns = small.get_context(&id).turns;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].prompt, "profile it");
}

#[tokio::test]
async fn save_and_load_directory() {
    let dir = tempfile::tempdir().unwrap();
    let a = SessionId::new("alpha");
    let b = SessionId::new("beta/with:odd chars");
    let store = populated(&a);
    store.record(&b, Turn::new("hello", "hi"));
    assert_eq!(store.save_to(dir.path()).await.unwrap(), 2);

    // junk next to the snapshots is skipped
    std::fs::write(dir.path().join("junk.json"), b"[]").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let loaded = SessionStore::default();
    assert_eq!(loaded.load_from(dir.path()).await.unwrap(), 2);
    assert_eq!(loaded.get_context(&a), store.get_context(&a));
    assert_eq!(loaded.get_context(&b).turns[0].prompt, "hello");
}

#[tokio::test]
async fn loading_a_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::default();
    assert_eq!(store.load_from(&dir.path().join("absent")).await.unwrap(), 0);
}
