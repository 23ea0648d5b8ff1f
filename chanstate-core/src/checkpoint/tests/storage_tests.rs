use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "chanstate-{prefix}-{}-{nanos}",
        std::process::id()
    ))
}

fn manifest(checkpoint_id: CheckpointId, task: &TaskInfo, delegate: StreamStateHandle) -> ChannelStateManifest {
    ChannelStateManifest {
        checkpoint_id,
        task: task.clone(),
        location: CheckpointStorageLocationReference::Default,
        input_channels: vec![ChannelStateHandle {
            info: InputChannelInfo::new(0, 0),
            delegate,
            offsets: vec![4],
            state_size: 7,
        }],
        result_subpartitions: Vec::new(),
    }
}

fn roundtrip(storage: &dyn ChannelStateStorage) {
    let task = TaskInfo::new("window agg", 2);
    let handle = storage
        .save_channel_state(7, &task, vec![0, 0, 0, 1, 0, 0, 0, 3, 1, 2, 3])
        .unwrap();
    assert_eq!(handle.size, 11);
    assert_eq!(
        storage.load_channel_state(&handle).unwrap(),
        vec![0, 0, 0, 1, 0, 0, 0, 3, 1, 2, 3]
    );

    let saved = manifest(7, &task, handle);
    storage.save_manifest(&saved).unwrap();
    assert_eq!(storage.load_manifest(7, &task).unwrap(), saved);
    assert!(storage.load_manifest(7, &TaskInfo::new("other", 0)).is_err());
    assert_eq!(storage.list_checkpoints().unwrap(), vec![7]);
}

fn purge_keeps_latest(storage: &dyn ChannelStateStorage) {
    let task = TaskInfo::new("map", 0);
    for id in 1..=4 {
        let handle = storage.save_channel_state(id, &task, vec![0, 0, 0, 1]).unwrap();
        storage.save_manifest(&manifest(id, &task, handle)).unwrap();
    }
    storage.purge(2).unwrap();
    assert_eq!(storage.list_checkpoints().unwrap(), vec![3, 4]);
    assert!(storage.load_manifest(1, &task).is_err());
    assert!(storage.load_manifest(4, &task).is_ok());
}

#[test]
fn test_in_memory_storage_roundtrip() {
    roundtrip(&InMemoryChannelStateStorage::new());
}

#[test]
fn test_in_memory_storage_purge_keeps_latest_n() {
    let storage = InMemoryChannelStateStorage::new();
    purge_keeps_latest(&storage);
    assert_eq!(storage.manifests(4).unwrap().len(), 1);
    assert!(storage.manifests(1).unwrap().is_empty());
}

#[test]
fn test_fs_storage_roundtrip() {
    let path = unique_temp_dir("storage");
    let storage = FsChannelStateStorage::new(&path).unwrap();
    roundtrip(&storage);

    let manifests = storage.manifests(7).unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].task, TaskInfo::new("window agg", 2));
    assert!(path.join("chk-7").join("window_20agg-2.state").exists());

    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_storage_keeps_tasks_with_similar_names_apart() {
    let path = unique_temp_dir("similar-names");
    let storage = FsChannelStateStorage::new(&path).unwrap();
    let dotted = TaskInfo::new("a.b", 0);
    let underscored = TaskInfo::new("a_b", 0);

    let first = storage
        .save_channel_state(1, &dotted, b"dotted".to_vec())
        .unwrap();
    let second = storage
        .save_channel_state(1, &underscored, b"underscored".to_vec())
        .unwrap();

    assert_ne!(first.key, second.key);
    assert_eq!(storage.load_channel_state(&first).unwrap(), b"dotted");
    assert_eq!(storage.load_channel_state(&second).unwrap(), b"underscored");

    fs::remove_dir_all(&path).unwrap();
}

#[test]
fn test_fs_storage_purge_keeps_latest_n() {
    let path = unique_temp_dir("purge");
    let storage = FsChannelStateStorage::new(&path).unwrap();
    purge_keeps_latest(&storage);
    assert!(!path.join("chk-1").exists());
    fs::remove_dir_all(&path).unwrap();
}
