use super::*;

pub const DEFAULT_MAX_CHECKPOINTS: usize = 1000;

/// Configuration of a [`ChannelStateWriterImpl`].
#[derive(Debug, Clone)]
pub struct ChannelStateWriterConfig {
    pub task_name: String,
    pub subtask_index: usize,
    /// Upper bound on result handles kept for checkpoints not yet collected.
    pub max_checkpoints: usize,
}

impl Default for ChannelStateWriterConfig {
    fn default() -> Self {
        Self {
            task_name: "task".to_string(),
            subtask_index: 0,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
        }
    }
}

impl ChannelStateWriterConfig {
    pub fn new(task_name: impl Into<String>, subtask_index: usize) -> Self {
        Self {
            task_name: task_name.into(),
            subtask_index,
            ..Self::default()
        }
    }

    pub fn with_max_checkpoints(mut self, max_checkpoints: usize) -> Self {
        self.max_checkpoints = max_checkpoints.max(1);
        self
    }

    pub fn task_info(&self) -> TaskInfo {
        TaskInfo::new(self.task_name.clone(), self.subtask_index)
    }
}
