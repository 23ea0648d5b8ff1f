use serde::{Deserialize, Serialize};

/// Unique identifier for checkpoints; monotonically increasing per job.
pub type CheckpointId = u64;

/// Identifies one input channel of a task: `(input gate, channel within the gate)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputChannelInfo {
    pub gate_idx: u32,
    pub input_channel_idx: u32,
}

impl InputChannelInfo {
    pub fn new(gate_idx: u32, input_channel_idx: u32) -> Self {
        Self {
            gate_idx,
            input_channel_idx,
        }
    }
}

impl std::fmt::Display for InputChannelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "input_{}_{}", self.gate_idx, self.input_channel_idx)
    }
}

/// Identifies one output subpartition of a task: `(result partition, subpartition)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultSubpartitionInfo {
    pub partition_idx: u32,
    pub subpartition_idx: u32,
}

impl ResultSubpartitionInfo {
    pub fn new(partition_idx: u32, subpartition_idx: u32) -> Self {
        Self {
            partition_idx,
            subpartition_idx,
        }
    }
}

impl std::fmt::Display for ResultSubpartitionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output_{}_{}", self.partition_idx, self.subpartition_idx)
    }
}

/// Identity of the task whose channel state is written.
///
/// Format: `{task_name} ({subtask_index})`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_name: String,
    pub subtask_index: usize,
}

impl TaskInfo {
    pub fn new(task_name: impl Into<String>, subtask_index: usize) -> Self {
        Self {
            task_name: task_name.into(),
            subtask_index,
        }
    }

    /// File-system friendly form, used as the per-task object name in storage.
    ///
    /// ASCII letters and digits are kept; every other byte of the name becomes `_` plus two hex
    /// digits, so distinct tasks never share a stem.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.task_name.len() + 4);
        for byte in self.task_name.bytes() {
            if byte.is_ascii_alphanumeric() {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("_{byte:02x}"));
            }
        }
        format!("{stem}-{}", self.subtask_index)
    }
}

impl std::fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.task_name, self.subtask_index)
    }
}

/// Where the checkpoint should be stored, as handed down by checkpoint coordination.
///
/// Resolution of the reference is left to the storage; the pipeline only carries it into the
/// persisted manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStorageLocationReference {
    #[default]
    Default,
    Encoded(Vec<u8>),
}

impl CheckpointStorageLocationReference {
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
