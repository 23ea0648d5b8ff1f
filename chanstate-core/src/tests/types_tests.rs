use super::*;

#[test]
fn test_channel_info_display() {
    assert_eq!(InputChannelInfo::new(1, 3).to_string(), "input_1_3");
    assert_eq!(ResultSubpartitionInfo::new(0, 2).to_string(), "output_0_2");
}

#[test]
fn test_channel_info_ordering_is_gate_major() {
    let mut infos = vec![
        InputChannelInfo::new(1, 0),
        InputChannelInfo::new(0, 5),
        InputChannelInfo::new(0, 1),
    ];
    infos.sort();
    assert_eq!(
        infos,
        vec![
            InputChannelInfo::new(0, 1),
            InputChannelInfo::new(0, 5),
            InputChannelInfo::new(1, 0),
        ]
    );
}

#[test]
fn test_task_info_file_stem_escapes_separators() {
    let task = TaskInfo::new("Map -> Sink: out", 3);
    assert_eq!(task.file_stem(), "Map_20_2d_3e_20Sink_3a_20out-3");
    assert_eq!(task.to_string(), "Map -> Sink: out (3)");
}

#[test]
fn test_task_info_file_stems_are_distinct() {
    let stems: Vec<String> = ["a.b", "a_b", "a-b", "a_2eb", "ab"]
        .into_iter()
        .map(|name| TaskInfo::new(name, 0).file_stem())
        .collect();
    for (i, stem) in stems.iter().enumerate() {
        assert!(!stems[i + 1..].contains(stem), "{stem} is not unique");
    }
    assert_ne!(
        TaskInfo::new("a-1", 2).file_stem(),
        TaskInfo::new("a", 12).file_stem()
    );
}

#[test]
fn test_location_reference_default() {
    assert!(CheckpointStorageLocationReference::default().is_default());
    assert!(!CheckpointStorageLocationReference::Encoded(vec![1]).is_default());
}
