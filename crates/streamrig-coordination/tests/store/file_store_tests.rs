use streamrig_coordination::{ANY_VERSION, FileZNodeStore, ZNodeStore};
use tempfile::tempdir;

#[test]
fn test_snapshot_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = FileZNodeStore::new(dir.path()).unwrap();
        store.create("/brokers/topics/t", b"assignment".to_vec(), true).unwrap();
        store.set_data("/brokers/topics/t", b"updated".to_vec(), 0).unwrap();
        store.create("/scratch", Vec::new(), false).unwrap();
        store.delete("/scratch", ANY_VERSION).unwrap();
    }

    let reopened = FileZNodeStore::new(dir.path()).unwrap();
    let (data, stat) = reopened.get_data("/brokers/topics/t").unwrap();
    assert_eq!(data, b"updated");
    assert_eq!(stat.version, 1);
    assert!(reopened.exists("/scratch").unwrap().is_none());
    assert_eq!(reopened.node_count(), 4);
}

#[test]
fn test_failed_mutation_is_not_persisted() {
    let dir = tempdir().unwrap();
    let store = FileZNodeStore::new(dir.path()).unwrap();
    let before = std::fs::read(store.snapshot_path()).unwrap();

    assert!(store.create("/a/b", Vec::new(), false).is_err());

    let after = std::fs::read(store.snapshot_path()).unwrap();
    assert_eq!(before, after);
    assert_eq!(store.node_count(), 1);
}

#[test]
fn test_empty_snapshot_starts_fresh() {
    let dir = tempdir().unwrap();
    let snapshot_dir = dir.path().join("version-2");
    std::fs::create_dir_all(&snapshot_dir).unwrap();
    std::fs::write(snapshot_dir.join("snapshot.json"), "").unwrap();

    let store = FileZNodeStore::new(dir.path()).unwrap();
    assert_eq!(store.node_count(), 1);
}

#[test]
fn test_corrupt_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let snapshot_dir = dir.path().join("version-2");
    std::fs::create_dir_all(&snapshot_dir).unwrap();
    std::fs::write(snapshot_dir.join("snapshot.json"), "{not json").unwrap();

    assert!(FileZNodeStore::new(dir.path()).is_err());
}
