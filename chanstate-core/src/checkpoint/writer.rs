use super::*;

/// Producer-facing channel-state writer of one task.
///
/// Every call turns into a request for the task's [`ChannelStateWriteRequestExecutor`], so it
/// returns without waiting for I/O. Per checkpoint the expected call sequence is `start`, any
/// number of `add_*_data`, then `finish_input` and `finish_output`; `abort` may come at any
/// point.
pub struct ChannelStateWriterImpl {
    task: TaskInfo,
    config: ChannelStateWriterConfig,
    executor: ChannelStateWriteRequestExecutor,
    results: Mutex<HashMap<CheckpointId, ChannelStateWriteResult>>,
}

impl ChannelStateWriterImpl {
    /// Build the dispatcher and executor for `config` and start the writer thread.
    pub fn new(config: ChannelStateWriterConfig, storage: Arc<dyn ChannelStateStorage>) -> Result<Self> {
        let task = config.task_info();
        let dispatcher = ChannelStateWriteRequestDispatcherImpl::new(task.clone(), storage);
        let executor = ChannelStateWriteRequestExecutor::new(task.to_string(), dispatcher);
        Self::with_executor(config, executor)
    }

    /// Use an already-built executor; starts it.
    pub fn with_executor(
        config: ChannelStateWriterConfig,
        executor: ChannelStateWriteRequestExecutor,
    ) -> Result<Self> {
        executor.start()?;
        info!(task = %config.task_info(), "channel state writer started");
        Ok(Self {
            task: config.task_info(),
            config,
            executor,
            results: Mutex::new(HashMap::new()),
        })
    }

    pub fn task(&self) -> &TaskInfo {
        &self.task
    }

    fn results(&self) -> Result<MutexGuard<'_, HashMap<CheckpointId, ChannelStateWriteResult>>> {
        self.results
            .lock()
            .map_err(|_| anyhow!("channel state write results lock poisoned"))
    }

    /// Begin writing channel state for `checkpoint_id`.
    pub fn start(
        &self,
        checkpoint_id: CheckpointId,
        location: CheckpointStorageLocationReference,
    ) -> Result<ChannelStateWriteResult> {
        debug!(task = %self.task, checkpoint_id, "starting channel state checkpoint");
        let result = ChannelStateWriteResult::new();
        {
            let mut results = self.results()?;
            if results.contains_key(&checkpoint_id) {
                return Err(ChannelStateError::ResultAlreadyPresent { checkpoint_id }.into());
            }
            if results.len() >= self.config.max_checkpoints {
                return Err(ChannelStateError::TooManyCheckpoints {
                    in_flight: results.len(),
                    max: self.config.max_checkpoints,
                }
                .into());
            }
            results.insert(checkpoint_id, result.clone());
        }
        let request = ChannelStateWriteRequest::start(checkpoint_id, result.clone(), location);
        if let Err(error) = self.enqueue(request, false) {
            self.results()?.remove(&checkpoint_id);
            return Err(error);
        }
        Ok(result)
    }

    pub fn add_input_data<I>(
        &self,
        checkpoint_id: CheckpointId,
        info: InputChannelInfo,
        buffers: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Buffer>,
        I::IntoIter: Send + 'static,
    {
        self.enqueue(
            ChannelStateWriteRequest::write_input(checkpoint_id, info, buffers),
            false,
        )
    }

    pub fn add_output_data(
        &self,
        checkpoint_id: CheckpointId,
        info: ResultSubpartitionInfo,
        buffers: Vec<Buffer>,
    ) -> Result<()> {
        self.enqueue(
            ChannelStateWriteRequest::write_output(checkpoint_id, info, buffers),
            false,
        )
    }

    /// Output data that is still being collected; written once `buffers` completes.
    pub fn add_output_data_future(
        &self,
        checkpoint_id: CheckpointId,
        info: ResultSubpartitionInfo,
        buffers: Completable<Vec<Buffer>>,
    ) -> Result<()> {
        self.enqueue(
            ChannelStateWriteRequest::write_output_future(checkpoint_id, info, buffers),
            false,
        )
    }

    pub fn finish_input(&self, checkpoint_id: CheckpointId) -> Result<()> {
        self.enqueue(ChannelStateWriteRequest::complete_input(checkpoint_id), false)
    }

    pub fn finish_output(&self, checkpoint_id: CheckpointId) -> Result<()> {
        self.enqueue(ChannelStateWriteRequest::complete_output(checkpoint_id), false)
    }

    /// Abort `checkpoint_id`: once ahead of the queue to stop a checkpoint already being written,
    /// once at the tail to catch requests queued behind it. With `cleanup` the result handle is
    /// forgotten.
    pub fn abort(&self, checkpoint_id: CheckpointId, cause: FailureCause, cleanup: bool) -> Result<()> {
        debug!(task = %self.task, checkpoint_id, cause = %cause, "aborting channel state checkpoint");
        self.enqueue(
            ChannelStateWriteRequest::abort(checkpoint_id, cause.clone()),
            true,
        )?;
        self.enqueue(ChannelStateWriteRequest::abort(checkpoint_id, cause), false)?;
        if cleanup {
            self.results()?.remove(&checkpoint_id);
        }
        Ok(())
    }

    pub fn get_and_remove_write_result(
        &self,
        checkpoint_id: CheckpointId,
    ) -> Result<ChannelStateWriteResult> {
        self.results()?
            .remove(&checkpoint_id)
            .ok_or_else(|| ChannelStateError::ResultNotFound { checkpoint_id }.into())
    }

    /// Fail every result not yet collected, then close the executor.
    pub fn close(&self) -> Result<()> {
        let cause = FailureCause::new(ChannelStateError::Closed {
            task: self.task.to_string(),
        });
        for (_, result) in self.results()?.drain() {
            result.fail(cause.clone());
        }
        self.executor.close()
    }

    fn enqueue(&self, request: ChannelStateWriteRequest, priority: bool) -> Result<()> {
        let request = Arc::new(request);
        let submitted = if priority {
            self.executor.submit_priority(Arc::clone(&request))
        } else {
            self.executor.submit(Arc::clone(&request))
        };
        submitted.with_context(|| {
            format!(
                "failed to submit {request} to the channel state writer of {}",
                self.task
            )
        })
    }
}

#[cfg(test)]
#[path = "tests/writer_tests.rs"]
mod tests;
