use super::*;

/// Receives the channel state of one checkpoint. Owned and driven by the writer thread.
///
/// Every `append_*` takes ownership of the buffer and recycles it, also when it returns an
/// error.
pub trait CheckpointWriter: Send {
    fn append_input(&mut self, info: InputChannelInfo, buffer: Buffer) -> Result<()>;
    fn append_output(&mut self, info: ResultSubpartitionInfo, buffer: Buffer) -> Result<()>;
    fn complete_input(&mut self) -> Result<()>;
    fn complete_output(&mut self) -> Result<()>;
    /// Fail the checkpoint's result. No-op once done.
    fn fail(&mut self, cause: &FailureCause);
    /// Completed or failed; no further requests are accepted.
    fn is_done(&self) -> bool;
}

#[derive(Debug, Default)]
struct ChannelOffsets {
    offsets: Vec<u64>,
    size: u64,
}

/// Serializes one checkpoint's buffers into a single stream and persists it once both sides are
/// complete.
pub struct ChannelStateCheckpointWriter {
    task: TaskInfo,
    checkpoint_id: CheckpointId,
    result: ChannelStateWriteResult,
    location: CheckpointStorageLocationReference,
    storage: Arc<dyn ChannelStateStorage>,
    serializer: ChannelStateSerializer,
    stream: Vec<u8>,
    input_channels: BTreeMap<InputChannelInfo, ChannelOffsets>,
    result_subpartitions: BTreeMap<ResultSubpartitionInfo, ChannelOffsets>,
    all_inputs_received: bool,
    all_outputs_received: bool,
    done: bool,
}

impl ChannelStateCheckpointWriter {
    pub fn new(
        task: TaskInfo,
        checkpoint_id: CheckpointId,
        result: ChannelStateWriteResult,
        location: CheckpointStorageLocationReference,
        storage: Arc<dyn ChannelStateStorage>,
        serializer: ChannelStateSerializer,
    ) -> Self {
        let mut stream = Vec::new();
        serializer.write_header(&mut stream);
        Self {
            task,
            checkpoint_id,
            result,
            location,
            storage,
            serializer,
            stream,
            input_channels: BTreeMap::new(),
            result_subpartitions: BTreeMap::new(),
            all_inputs_received: false,
            all_outputs_received: false,
            done: false,
        }
    }

    pub fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    fn already_complete(&self, side: &'static str) -> anyhow::Error {
        ChannelStateError::ChannelAlreadyComplete {
            checkpoint_id: self.checkpoint_id,
            side,
        }
        .into()
    }

    fn try_finish(&mut self) {
        if !(self.all_inputs_received && self.all_outputs_received) {
            return;
        }
        self.done = true;
        match self.persist() {
            Ok((input_channels, result_subpartitions)) => {
                debug!(
                    task = %self.task,
                    checkpoint_id = self.checkpoint_id,
                    input_channels = input_channels.len(),
                    result_subpartitions = result_subpartitions.len(),
                    "channel state persisted"
                );
                self.result.complete(input_channels, result_subpartitions);
            }
            Err(error) => {
                warn!(
                    task = %self.task,
                    checkpoint_id = self.checkpoint_id,
                    error = %format!("{error:#}"),
                    "failed to persist channel state"
                );
                self.result.fail(FailureCause::new(error));
            }
        }
    }

    fn persist(
        &mut self,
    ) -> Result<(Vec<InputChannelStateHandle>, Vec<ResultSubpartitionStateHandle>)> {
        if self.input_channels.is_empty() && self.result_subpartitions.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let stream = std::mem::take(&mut self.stream);
        let delegate = self
            .storage
            .save_channel_state(self.checkpoint_id, &self.task, stream)
            .with_context(|| {
                format!(
                    "failed to store channel state of checkpoint {}",
                    self.checkpoint_id
                )
            })?;
        let manifest = ChannelStateManifest {
            checkpoint_id: self.checkpoint_id,
            task: self.task.clone(),
            location: self.location.clone(),
            input_channels: state_handles(&self.input_channels, &delegate),
            result_subpartitions: state_handles(&self.result_subpartitions, &delegate),
        };
        self.storage.save_manifest(&manifest).with_context(|| {
            format!(
                "failed to store channel state manifest of checkpoint {}",
                self.checkpoint_id
            )
        })?;
        Ok((manifest.input_channels, manifest.result_subpartitions))
    }
}

fn append_buffer<K: Ord>(
    serializer: ChannelStateSerializer,
    stream: &mut Vec<u8>,
    channels: &mut BTreeMap<K, ChannelOffsets>,
    key: K,
    buffer: Buffer,
) {
    if !buffer.is_empty() {
        let channel = channels.entry(key).or_default();
        channel.offsets.push(stream.len() as u64);
        channel.size += serializer.write_data(stream, buffer.readable_bytes()) as u64;
    }
    buffer.recycle();
}

fn state_handles<I: Copy>(
    channels: &BTreeMap<I, ChannelOffsets>,
    delegate: &StreamStateHandle,
) -> Vec<ChannelStateHandle<I>> {
    channels
        .iter()
        .map(|(info, channel)| ChannelStateHandle {
            info: *info,
            delegate: delegate.clone(),
            offsets: channel.offsets.clone(),
            state_size: channel.size,
        })
        .collect()
}

impl CheckpointWriter for ChannelStateCheckpointWriter {
    fn append_input(&mut self, info: InputChannelInfo, buffer: Buffer) -> Result<()> {
        if self.done || self.all_inputs_received {
            buffer.recycle();
            return Err(self.already_complete("input"));
        }
        append_buffer(
            self.serializer,
            &mut self.stream,
            &mut self.input_channels,
            info,
            buffer,
        );
        Ok(())
    }

    fn append_output(&mut self, info: ResultSubpartitionInfo, buffer: Buffer) -> Result<()> {
        if self.done || self.all_outputs_received {
            buffer.recycle();
            return Err(self.already_complete("output"));
        }
        append_buffer(
            self.serializer,
            &mut self.stream,
            &mut self.result_subpartitions,
            info,
            buffer,
        );
        Ok(())
    }

    fn complete_input(&mut self) -> Result<()> {
        if self.done || self.all_inputs_received {
            return Err(self.already_complete("input"));
        }
        self.all_inputs_received = true;
        self.try_finish();
        Ok(())
    }

    fn complete_output(&mut self) -> Result<()> {
        if self.done || self.all_outputs_received {
            return Err(self.already_complete("output"));
        }
        self.all_outputs_received = true;
        self.try_finish();
        Ok(())
    }

    fn fail(&mut self, cause: &FailureCause) {
        // a persist that never returned leaves the writer done but its result pending
        if self.done && self.result.is_done() {
            return;
        }
        self.done = true;
        self.stream = Vec::new();
        self.input_channels.clear();
        self.result_subpartitions.clear();
        self.result.fail(cause.clone());
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
#[path = "tests/checkpoint_writer_tests.rs"]
mod tests;
