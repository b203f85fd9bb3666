use ferry_core::{
    Cancel, ConflictPolicy, ConflictRecord, EngineConfig, InodeInfo, SortColumn, SortOrder,
    SortSpec, SourceItem, TransferError, TransferKind, TransferOptions, TransferRequest,
};
use serde_json::json;

#[test]
fn test_inode_info() {
    let inode1 = InodeInfo::new(12345, 67890);
    assert_eq!(inode1.inode, 12345);
    assert_eq!(inode1.device, 67890);
    assert_eq!(inode1, InodeInfo::new(12345, 67890));
}

#[test]
fn test_error_wire_shape() {
    let err = TransferError::DestinationInsideSource {
        source_path: "/a".into(),
        destination: "/a/sub".into(),
    };
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(
        value,
        json!({"type": "destination_inside_source", "source": "/a", "destination": "/a/sub"})
    );

    let err = TransferError::InsufficientSpace {
        required: 10,
        available: 5,
        volume_name: "/mnt".into(),
    };
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(value["type"], "insufficient_space");
    assert_eq!(value["volumeName"], "/mnt");

    let err = TransferError::other("/x", "boom");
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(value["type"], "io_error");

    let back: TransferError = serde_json::from_value(value).unwrap();
    assert_eq!(back, err);
}

#[test]
fn test_conflict_record_serializes_camel_case() {
    let item = SourceItem::new("a.txt", 3, None);
    let record = ConflictRecord::new(&item, None, "/d/a.txt".into(), 7, None, false);
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["destinationSize"], 7);
    assert_eq!(value["isLarger"], false);
    assert_eq!(record.size_difference(), 4);
}

#[test]
fn test_request_deserializes_with_defaults() {
    let request: TransferRequest = serde_json::from_value(json!({
        "sources": ["/src/a"],
        "destination": "/dst",
        "kind": "copy",
    }))
    .unwrap();

    assert_eq!(request.kind, TransferKind::Copy);
    assert_eq!(request.options, TransferOptions::default());
    assert_eq!(request.options.conflict_policy, ConflictPolicy::Ask);
    assert_eq!(request.options.sort, SortSpec::default());
}

#[test]
fn test_options_serde() {
    let options: TransferOptions = serde_json::from_value(json!({
        "conflictPolicy": "skip",
        "progressIntervalMs": 0,
        "sort": {"column": "modified", "order": "descending"},
    }))
    .unwrap();

    assert_eq!(options.conflict_policy, ConflictPolicy::Skip);
    assert_eq!(options.progress_interval_ms, Some(0));
    assert_eq!(
        options.sort,
        SortSpec::new(SortColumn::Modified, SortOrder::Descending)
    );
}

#[test]
fn test_engine_config_partial_toml_shape() {
    let config: EngineConfig = serde_json::from_value(json!({
        "progress_interval_ms": 50,
        "check_disk_space": false,
    }))
    .unwrap();

    assert_eq!(config.progress_interval_ms, 50);
    assert!(!config.check_disk_space);
    assert_eq!(config.event_capacity, 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn test_cancel_modes() {
    assert!(Cancel::Rollback.rolls_back());
    assert!(!Cancel::KeepPartial.rolls_back());
}
