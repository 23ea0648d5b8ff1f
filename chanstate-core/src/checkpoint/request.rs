use super::*;

/// Execution state of write and completion requests.
///
/// ```text
/// New ──execute──▶ Executing ──ok──▶ Completed
///  │                   └──err──▶ Failed ──cancel──▶ Cancelled
///  └──────────────cancel───────────────────────────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    New = 0,
    Executing = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::New,
            1 => RequestState::Executing,
            2 => RequestState::Completed,
            3 => RequestState::Failed,
            _ => RequestState::Cancelled,
        }
    }
}

/// Request state cell. Every transition out of `New` or `Failed` is a compare-and-set, so
/// `execute` and `cancel` racing on the same request cannot both win.
#[derive(Debug)]
pub struct InProgressState(AtomicU8);

impl Default for InProgressState {
    fn default() -> Self {
        Self(AtomicU8::new(RequestState::New as u8))
    }
}

impl InProgressState {
    pub fn get(&self) -> RequestState {
        RequestState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: RequestState, to: RequestState) -> Result<(), RequestState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RequestState::from_u8)
    }

    fn set(&self, to: RequestState) {
        self.0.store(to as u8, Ordering::Release);
    }

    /// Run `action` as `New → Executing → Completed | Failed`. Any other start state, a
    /// cancelled one included, is a broken invariant.
    fn execute(
        &self,
        request: &dyn std::fmt::Display,
        action: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if let Err(actual) = self.transition(RequestState::New, RequestState::Executing) {
            return Err(ChannelStateError::IllegalRequestState {
                request: request.to_string(),
                expected: RequestState::New,
                actual,
            }
            .into());
        }
        match action() {
            Ok(()) => {
                self.set(RequestState::Completed);
                Ok(())
            }
            Err(error) => {
                self.set(RequestState::Failed);
                Err(error)
            }
        }
    }

    /// `New → Cancelled` or `Failed → Cancelled`. True if this call made the transition.
    fn try_cancel(&self) -> bool {
        self.transition(RequestState::New, RequestState::Cancelled)
            .is_ok()
            || self
                .transition(RequestState::Failed, RequestState::Cancelled)
                .is_ok()
    }
}

/// Buffers carried by a write request.
pub enum BufferSource {
    /// Finite, non-restartable sequence of buffers.
    Iter(Box<dyn Iterator<Item = Buffer> + Send>),
    /// Buffers that become available later, e.g. output data still being collected.
    Pending(Completable<Vec<Buffer>>),
}

impl BufferSource {
    fn is_ready(&self) -> bool {
        match self {
            BufferSource::Iter(_) => true,
            BufferSource::Pending(buffers) => buffers.is_done(),
        }
    }

    /// Release every buffer still owned by this source.
    fn discard(self) {
        match self {
            BufferSource::Iter(buffers) => buffers.for_each(Buffer::recycle),
            BufferSource::Pending(pending) => {
                let attached = pending.on_complete(|outcome| {
                    if let Ok(buffers) = outcome {
                        buffers.into_iter().for_each(Buffer::recycle);
                    }
                });
                if !attached {
                    warn!("pending channel state buffers were already consumed");
                }
            }
        }
    }
}

/// Appends buffers of one channel to the checkpoint writer.
pub struct WriteRequest<I> {
    name: &'static str,
    checkpoint_id: CheckpointId,
    info: I,
    buffers: Mutex<Option<BufferSource>>,
    state: InProgressState,
}

impl<I: Copy> WriteRequest<I> {
    fn new(name: &'static str, checkpoint_id: CheckpointId, info: I, source: BufferSource) -> Self {
        Self {
            name,
            checkpoint_id,
            info,
            buffers: Mutex::new(Some(source)),
            state: InProgressState::default(),
        }
    }

    pub fn info(&self) -> I {
        self.info
    }

    pub fn state(&self) -> RequestState {
        self.state.get()
    }

    fn buffers(&self) -> MutexGuard<'_, Option<BufferSource>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> Option<Completable<Vec<Buffer>>> {
        match &*self.buffers() {
            Some(BufferSource::Pending(pending)) => Some(pending.clone()),
            _ => None,
        }
    }

    /// Hand every buffer to `append`. On failure the buffers not yet consumed stay in place for
    /// the discard path; consumed ones belong to the writer.
    fn write(
        &self,
        request: &dyn std::fmt::Display,
        writer: &mut dyn CheckpointWriter,
        append: impl Fn(&mut dyn CheckpointWriter, I, Buffer) -> Result<()>,
    ) -> Result<()> {
        let mut slot = self.buffers();
        if let Some(BufferSource::Pending(pending)) = slot.as_ref() {
            let pending = pending.clone();
            match pending.take() {
                Ok(buffers) => *slot = Some(BufferSource::Iter(Box::new(buffers.into_iter()))),
                Err(cause) => {
                    // only the checkpoint that was waiting for the data is affected
                    *slot = None;
                    writer.fail(&cause);
                    return Ok(());
                }
            }
        }
        if let Some(BufferSource::Iter(buffers)) = slot.as_mut() {
            for buffer in buffers {
                let buffer = check_data_buffer(request, buffer)?;
                append(writer, self.info, buffer)?;
            }
        }
        *slot = None;
        Ok(())
    }

    fn discard(&self) {
        if let Some(source) = self.buffers().take() {
            source.discard();
        }
    }
}

fn check_data_buffer(request: &dyn std::fmt::Display, buffer: Buffer) -> Result<Buffer> {
    if buffer.is_buffer() {
        return Ok(buffer);
    }
    let data_type = buffer.data_type();
    buffer.recycle();
    Err(ChannelStateError::InvalidBuffer {
        request: request.to_string(),
        data_type,
    }
    .into())
}

/// Marks the input or output side of a checkpoint as complete.
#[derive(Debug)]
pub struct CompletionRequest {
    checkpoint_id: CheckpointId,
    state: InProgressState,
}

impl CompletionRequest {
    fn new(checkpoint_id: CheckpointId) -> Self {
        Self {
            checkpoint_id,
            state: InProgressState::default(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state.get()
    }
}

#[derive(Debug)]
pub struct CheckpointStartRequest {
    checkpoint_id: CheckpointId,
    result: ChannelStateWriteResult,
    location: CheckpointStorageLocationReference,
}

impl CheckpointStartRequest {
    pub fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    pub fn result(&self) -> &ChannelStateWriteResult {
        &self.result
    }

    pub fn location(&self) -> &CheckpointStorageLocationReference {
        &self.location
    }
}

#[derive(Debug)]
pub struct CheckpointAbortRequest {
    checkpoint_id: CheckpointId,
    cause: FailureCause,
}

impl CheckpointAbortRequest {
    pub fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    pub fn cause(&self) -> &FailureCause {
        &self.cause
    }
}

/// One unit of work for the channel-state writer thread.
pub enum ChannelStateWriteRequest {
    Start(CheckpointStartRequest),
    WriteInput(WriteRequest<InputChannelInfo>),
    WriteOutput(WriteRequest<ResultSubpartitionInfo>),
    CompleteInput(CompletionRequest),
    CompleteOutput(CompletionRequest),
    Abort(CheckpointAbortRequest),
}

/// Requests are shared between the submitting thread, the queue and the worker.
pub type SharedRequest = Arc<ChannelStateWriteRequest>;

impl ChannelStateWriteRequest {
    pub fn start(
        checkpoint_id: CheckpointId,
        result: ChannelStateWriteResult,
        location: CheckpointStorageLocationReference,
    ) -> Self {
        ChannelStateWriteRequest::Start(CheckpointStartRequest {
            checkpoint_id,
            result,
            location,
        })
    }

    pub fn write_input<I>(checkpoint_id: CheckpointId, info: InputChannelInfo, buffers: I) -> Self
    where
        I: IntoIterator<Item = Buffer>,
        I::IntoIter: Send + 'static,
    {
        ChannelStateWriteRequest::WriteInput(WriteRequest::new(
            "writeInput",
            checkpoint_id,
            info,
            BufferSource::Iter(Box::new(buffers.into_iter())),
        ))
    }

    pub fn write_output(
        checkpoint_id: CheckpointId,
        info: ResultSubpartitionInfo,
        buffers: Vec<Buffer>,
    ) -> Self {
        ChannelStateWriteRequest::WriteOutput(WriteRequest::new(
            "writeOutput",
            checkpoint_id,
            info,
            BufferSource::Iter(Box::new(buffers.into_iter())),
        ))
    }

    pub fn write_output_future(
        checkpoint_id: CheckpointId,
        info: ResultSubpartitionInfo,
        buffers: Completable<Vec<Buffer>>,
    ) -> Self {
        ChannelStateWriteRequest::WriteOutput(WriteRequest::new(
            "writeOutputFuture",
            checkpoint_id,
            info,
            BufferSource::Pending(buffers),
        ))
    }

    pub fn complete_input(checkpoint_id: CheckpointId) -> Self {
        ChannelStateWriteRequest::CompleteInput(CompletionRequest::new(checkpoint_id))
    }

    pub fn complete_output(checkpoint_id: CheckpointId) -> Self {
        ChannelStateWriteRequest::CompleteOutput(CompletionRequest::new(checkpoint_id))
    }

    pub fn abort(checkpoint_id: CheckpointId, cause: FailureCause) -> Self {
        ChannelStateWriteRequest::Abort(CheckpointAbortRequest {
            checkpoint_id,
            cause,
        })
    }

    pub fn checkpoint_id(&self) -> CheckpointId {
        match self {
            ChannelStateWriteRequest::Start(request) => request.checkpoint_id,
            ChannelStateWriteRequest::WriteInput(request) => request.checkpoint_id,
            ChannelStateWriteRequest::WriteOutput(request) => request.checkpoint_id,
            ChannelStateWriteRequest::CompleteInput(request)
            | ChannelStateWriteRequest::CompleteOutput(request) => request.checkpoint_id,
            ChannelStateWriteRequest::Abort(request) => request.checkpoint_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelStateWriteRequest::Start(_) => "start",
            ChannelStateWriteRequest::WriteInput(request) => request.name,
            ChannelStateWriteRequest::WriteOutput(request) => request.name,
            ChannelStateWriteRequest::CompleteInput(_) => "completeInput",
            ChannelStateWriteRequest::CompleteOutput(_) => "completeOutput",
            ChannelStateWriteRequest::Abort(_) => "abort",
        }
    }

    /// Execution state; `None` for start and abort requests, which have none.
    pub fn state(&self) -> Option<RequestState> {
        self.progress().map(InProgressState::get)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == Some(RequestState::Cancelled)
    }

    fn progress(&self) -> Option<&InProgressState> {
        match self {
            ChannelStateWriteRequest::WriteInput(request) => Some(&request.state),
            ChannelStateWriteRequest::WriteOutput(request) => Some(&request.state),
            ChannelStateWriteRequest::CompleteInput(request)
            | ChannelStateWriteRequest::CompleteOutput(request) => Some(&request.state),
            ChannelStateWriteRequest::Start(_) | ChannelStateWriteRequest::Abort(_) => None,
        }
    }

    /// Cooperative cancellation.
    ///
    /// - start: fails the result handle with `cause`.
    /// - abort: nothing to do.
    /// - write/complete: only from `New` or `Failed`; releases the buffers the request still
    ///   owns. A request that is executing or already finished is left alone.
    pub fn cancel(&self, cause: &FailureCause) {
        match self {
            ChannelStateWriteRequest::Start(request) => {
                request.result.fail(cause.clone());
            }
            ChannelStateWriteRequest::Abort(_) => {}
            ChannelStateWriteRequest::WriteInput(request) => {
                if request.state.try_cancel() {
                    debug!(request = %self, cause = %cause, "discarding request");
                    request.discard();
                }
            }
            ChannelStateWriteRequest::WriteOutput(request) => {
                if request.state.try_cancel() {
                    debug!(request = %self, cause = %cause, "discarding request");
                    request.discard();
                }
            }
            ChannelStateWriteRequest::CompleteInput(request)
            | ChannelStateWriteRequest::CompleteOutput(request) => {
                request.state.try_cancel();
            }
        }
    }

    /// Whether executing now would not block on buffers that are still being collected.
    pub fn is_ready(&self) -> bool {
        match self {
            ChannelStateWriteRequest::WriteOutput(request) => request
                .buffers()
                .as_ref()
                .is_none_or(BufferSource::is_ready),
            _ => true,
        }
    }

    /// Block up to `timeout` for [`ChannelStateWriteRequest::is_ready`].
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        match self {
            ChannelStateWriteRequest::WriteOutput(request) => request
                .pending()
                .is_none_or(|pending| pending.wait_done(timeout)),
            _ => true,
        }
    }

    /// Run the request's action against the checkpoint's writer.
    ///
    /// Errors from the action leave the request `Failed`; cancelling it afterwards releases the
    /// buffers the action did not get to.
    pub fn execute(&self, writer: &mut dyn CheckpointWriter) -> Result<()> {
        match self {
            ChannelStateWriteRequest::WriteInput(request) => request.state.execute(self, || {
                request.write(self, writer, |writer, info, buffer| {
                    writer.append_input(info, buffer)
                })
            }),
            ChannelStateWriteRequest::WriteOutput(request) => request.state.execute(self, || {
                request.write(self, writer, |writer, info, buffer| {
                    writer.append_output(info, buffer)
                })
            }),
            ChannelStateWriteRequest::CompleteInput(request) => {
                request.state.execute(self, || writer.complete_input())
            }
            ChannelStateWriteRequest::CompleteOutput(request) => {
                request.state.execute(self, || writer.complete_output())
            }
            ChannelStateWriteRequest::Start(_) | ChannelStateWriteRequest::Abort(_) => {
                Err(anyhow!("{self} is handled by the dispatcher, not executed"))
            }
        }
    }
}

impl std::fmt::Display for ChannelStateWriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.checkpoint_id())
    }
}

impl std::fmt::Debug for ChannelStateWriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStateWriteRequest")
            .field("name", &self.name())
            .field("checkpoint_id", &self.checkpoint_id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/request_tests.rs"]
mod tests;
