use super::*;

/// Handles requests on the writer thread. Called by exactly one thread at a time.
pub trait ChannelStateWriteRequestDispatcher: Send {
    /// An error stops the executor.
    fn dispatch(&mut self, request: &ChannelStateWriteRequest) -> Result<()>;

    /// Fail all in-progress checkpoints. Called once when the executor's loop ends.
    fn fail(&mut self, cause: &FailureCause);
}

/// Accepts every request and does nothing with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDispatcher;

impl ChannelStateWriteRequestDispatcher for NoOpDispatcher {
    fn dispatch(&mut self, _request: &ChannelStateWriteRequest) -> Result<()> {
        Ok(())
    }

    fn fail(&mut self, _cause: &FailureCause) {}
}

/// Routes requests to one [`ChannelStateCheckpointWriter`] per in-progress checkpoint.
pub struct ChannelStateWriteRequestDispatcherImpl {
    task: TaskInfo,
    storage: Arc<dyn ChannelStateStorage>,
    serializer: ChannelStateSerializer,
    writers: AHashMap<CheckpointId, ChannelStateCheckpointWriter>,
    max_started_checkpoint_id: Option<CheckpointId>,
    /// Aborts that overtook their start request.
    aborted_before_start: AHashMap<CheckpointId, FailureCause>,
}

impl ChannelStateWriteRequestDispatcherImpl {
    pub fn new(task: TaskInfo, storage: Arc<dyn ChannelStateStorage>) -> Self {
        Self {
            task,
            storage,
            serializer: ChannelStateSerializer,
            writers: AHashMap::new(),
            max_started_checkpoint_id: None,
            aborted_before_start: AHashMap::new(),
        }
    }

    /// Checkpoints with a live writer, ascending.
    pub fn in_progress_checkpoints(&self) -> Vec<CheckpointId> {
        let mut ids: Vec<_> = self.writers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn is_stale(&self, checkpoint_id: CheckpointId) -> bool {
        self.max_started_checkpoint_id
            .is_some_and(|max| checkpoint_id <= max)
    }

    fn start_checkpoint(&mut self, request: &CheckpointStartRequest) -> Result<()> {
        let checkpoint_id = request.checkpoint_id();
        if self.writers.contains_key(&checkpoint_id) {
            return Err(ChannelStateError::WriterAlreadyExists { checkpoint_id }.into());
        }
        self.max_started_checkpoint_id = Some(
            self.max_started_checkpoint_id
                .map_or(checkpoint_id, |max| max.max(checkpoint_id)),
        );
        if let Some(cause) = self.aborted_before_start.remove(&checkpoint_id) {
            debug!(task = %self.task, checkpoint_id, "checkpoint was aborted before it started");
            request
                .result()
                .fail(FailureCause::new(ChannelStateError::CheckpointAborted {
                    checkpoint_id,
                    cause,
                }));
            return Ok(());
        }
        // older checkpoints can no longer start
        self.aborted_before_start
            .retain(|aborted, _| *aborted > checkpoint_id);

        let writer = ChannelStateCheckpointWriter::new(
            self.task.clone(),
            checkpoint_id,
            request.result().clone(),
            request.location().clone(),
            Arc::clone(&self.storage),
            self.serializer,
        );
        self.writers.insert(checkpoint_id, writer);
        debug!(task = %self.task, checkpoint_id, "channel state checkpoint started");
        Ok(())
    }

    fn abort_checkpoint(&mut self, request: &CheckpointAbortRequest) {
        let checkpoint_id = request.checkpoint_id();
        if let Some(mut writer) = self.writers.remove(&checkpoint_id) {
            debug!(task = %self.task, checkpoint_id, cause = %request.cause(), "aborting channel state checkpoint");
            writer.fail(request.cause());
        } else if !self.is_stale(checkpoint_id) {
            self.aborted_before_start
                .entry(checkpoint_id)
                .or_insert_with(|| request.cause().clone());
        }
    }

    fn execute_in_progress(&mut self, request: &ChannelStateWriteRequest) -> Result<()> {
        let checkpoint_id = request.checkpoint_id();
        let Some(writer) = self.writers.get_mut(&checkpoint_id) else {
            if self.is_stale(checkpoint_id) || self.aborted_before_start.contains_key(&checkpoint_id)
            {
                debug!(task = %self.task, request = %request, "discarding request of a checkpoint no longer in progress");
                request.cancel(&FailureCause::new(
                    ChannelStateError::CheckpointNotInProgress { checkpoint_id },
                ));
                return Ok(());
            }
            return Err(ChannelStateError::WriterNotFound {
                checkpoint_id,
                request: request.to_string(),
            }
            .into());
        };

        if let Err(error) = request.execute(writer) {
            if error
                .downcast_ref::<ChannelStateError>()
                .is_some_and(ChannelStateError::is_internal)
            {
                return Err(error);
            }
            let cause = FailureCause::new(error);
            warn!(
                task = %self.task,
                request = %request,
                error = %format!("{:#}", cause.error()),
                "channel state write failed, failing checkpoint"
            );
            request.cancel(&cause);
            writer.fail(&cause);
        }
        if writer.is_done() {
            self.writers.remove(&checkpoint_id);
        }
        Ok(())
    }
}

impl ChannelStateWriteRequestDispatcher for ChannelStateWriteRequestDispatcherImpl {
    fn dispatch(&mut self, request: &ChannelStateWriteRequest) -> Result<()> {
        match request {
            ChannelStateWriteRequest::Start(start) => self.start_checkpoint(start),
            ChannelStateWriteRequest::Abort(abort) => {
                self.abort_checkpoint(abort);
                Ok(())
            }
            _ => self.execute_in_progress(request),
        }
    }

    fn fail(&mut self, cause: &FailureCause) {
        for (checkpoint_id, mut writer) in self.writers.drain() {
            debug!(task = %self.task, checkpoint_id, "failing in-progress channel state checkpoint");
            writer.fail(cause);
        }
        self.aborted_before_start.clear();
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
