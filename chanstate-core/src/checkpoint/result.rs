use super::*;

/// Persisted stream of serialized channel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStateHandle {
    /// Storage-specific locator (file path, in-memory key).
    pub key: String,
    pub size: u64,
}

/// State of one channel inside a persisted stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStateHandle<I> {
    pub info: I,
    pub delegate: StreamStateHandle,
    /// Start offset of every chunk of this channel within the stream, in write order.
    pub offsets: Vec<u64>,
    /// Serialized bytes of this channel, length prefixes included.
    pub state_size: u64,
}

pub type InputChannelStateHandle = ChannelStateHandle<InputChannelInfo>;
pub type ResultSubpartitionStateHandle = ChannelStateHandle<ResultSubpartitionInfo>;

/// Everything persisted for one task in one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStateManifest {
    pub checkpoint_id: CheckpointId,
    pub task: TaskInfo,
    pub location: CheckpointStorageLocationReference,
    pub input_channels: Vec<InputChannelStateHandle>,
    pub result_subpartitions: Vec<ResultSubpartitionStateHandle>,
}

/// Result handle of one checkpoint: one cell per side, resolved by the checkpoint writer.
///
/// Failing is idempotent; once a side is resolved later outcomes are ignored.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateWriteResult {
    input_channel_state_handles: Completable<Vec<InputChannelStateHandle>>,
    result_subpartition_state_handles: Completable<Vec<ResultSubpartitionStateHandle>>,
}

impl ChannelStateWriteResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_channel_state_handles(&self) -> &Completable<Vec<InputChannelStateHandle>> {
        &self.input_channel_state_handles
    }

    pub fn result_subpartition_state_handles(
        &self,
    ) -> &Completable<Vec<ResultSubpartitionStateHandle>> {
        &self.result_subpartition_state_handles
    }

    pub(crate) fn complete(
        &self,
        input_channels: Vec<InputChannelStateHandle>,
        result_subpartitions: Vec<ResultSubpartitionStateHandle>,
    ) {
        self.input_channel_state_handles.complete(input_channels);
        self.result_subpartition_state_handles
            .complete(result_subpartitions);
    }

    pub fn fail(&self, cause: FailureCause) {
        self.input_channel_state_handles.fail(cause.clone());
        self.result_subpartition_state_handles.fail(cause);
    }

    pub fn is_done(&self) -> bool {
        self.input_channel_state_handles.is_done()
            && self.result_subpartition_state_handles.is_done()
    }

    pub fn is_failed(&self) -> bool {
        self.input_channel_state_handles.is_failed()
            || self.result_subpartition_state_handles.is_failed()
    }

    /// Block until both sides resolve.
    pub fn wait(
        &self,
    ) -> Result<(Vec<InputChannelStateHandle>, Vec<ResultSubpartitionStateHandle>), FailureCause>
    {
        let input_channels = self.input_channel_state_handles.wait()?;
        let result_subpartitions = self.result_subpartition_state_handles.wait()?;
        Ok((input_channels, result_subpartitions))
    }
}
