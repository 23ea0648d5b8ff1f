use super::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// How long the worker blocks on buffers that are still being collected before it looks at the
/// closing flag again.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

enum Worker {
    NotStarted,
    Running(JoinHandle<()>),
    Stopped,
}

struct ExecutorCore {
    task_name: String,
    queue: Arc<dyn RequestQueue>,
    dispatcher: Mutex<Box<dyn ChannelStateWriteRequestDispatcher>>,
    closing: AtomicBool,
    /// First dispatch failure; replayed once by `close`.
    thrown: Mutex<Option<FailureCause>>,
}

/// Single-threaded executor in front of a [`ChannelStateWriteRequestDispatcher`].
///
/// Requests from any number of threads are queued and dispatched one at a time by a dedicated
/// worker thread. The first dispatch failure stops the worker; every request still queued at
/// that point, or submitted afterwards, is cancelled instead of dispatched.
pub struct ChannelStateWriteRequestExecutor {
    core: Arc<ExecutorCore>,
    worker: Mutex<Worker>,
}

impl ChannelStateWriteRequestExecutor {
    pub fn new<D>(task_name: impl Into<String>, dispatcher: D) -> Self
    where
        D: ChannelStateWriteRequestDispatcher + 'static,
    {
        Self::with_queue(task_name, dispatcher, Arc::new(BlockingRequestQueue::new()))
    }

    pub fn with_queue<D>(
        task_name: impl Into<String>,
        dispatcher: D,
        queue: Arc<dyn RequestQueue>,
    ) -> Self
    where
        D: ChannelStateWriteRequestDispatcher + 'static,
    {
        Self {
            core: Arc::new(ExecutorCore {
                task_name: task_name.into(),
                queue,
                dispatcher: Mutex::new(Box::new(dispatcher)),
                closing: AtomicBool::new(false),
                thrown: Mutex::new(None),
            }),
            worker: Mutex::new(Worker::NotStarted),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.core.task_name
    }

    pub fn is_closed(&self) -> bool {
        self.core.closing.load(Ordering::SeqCst)
    }

    fn worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.core.closed().into());
        }
        let mut worker = self.worker();
        if !matches!(*worker, Worker::NotStarted) {
            return Err(ChannelStateError::AlreadyStarted {
                task: self.core.task_name.clone(),
            }
            .into());
        }
        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name(format!("Channel state writer {}", self.core.task_name))
            .spawn(move || core.run())
            .with_context(|| {
                format!(
                    "failed to spawn channel state writer thread for {}",
                    self.core.task_name
                )
            })?;
        *worker = Worker::Running(handle);
        debug!(task = %self.core.task_name, "channel state write executor started");
        Ok(())
    }

    /// Run the dispatch loop on the calling thread until the executor is closed or a dispatch
    /// fails. [`ChannelStateWriteRequestExecutor::start`] runs the same loop on its own thread.
    pub fn run(&self) {
        self.core.run();
    }

    /// Enqueue `request` at the tail.
    pub fn submit(&self, request: SharedRequest) -> Result<()> {
        self.submit_internal(request, false)
    }

    /// Enqueue `request` ahead of everything already queued.
    pub fn submit_priority(&self, request: SharedRequest) -> Result<()> {
        self.submit_internal(request, true)
    }

    fn submit_internal(&self, request: SharedRequest, priority: bool) -> Result<()> {
        let queue = &self.core.queue;
        let enqueued = if priority {
            queue.put_first(request)
        } else {
            queue.put(request)
        };
        if let Err(rejected) = enqueued {
            let error = self.core.closed();
            rejected.cancel(&FailureCause::new(error.clone()));
            return Err(error.into());
        }
        self.ensure_running()
    }

    /// Fails if the worker cannot process what was just queued; in that case the queue is
    /// drained and cancelled here, since no worker will do it.
    fn ensure_running(&self) -> Result<()> {
        let error = if self.is_closed() {
            Some(self.core.closed())
        } else {
            match &*self.worker() {
                Worker::Running(handle) if !handle.is_finished() => None,
                Worker::NotStarted => Some(ChannelStateError::NotStarted {
                    task: self.core.task_name.clone(),
                }),
                Worker::Running(_) | Worker::Stopped => Some(ChannelStateError::NotRunning {
                    task: self.core.task_name.clone(),
                    cause: self.core.thrown(),
                }),
            }
        };
        match error {
            None => Ok(()),
            Some(error) => {
                self.core.cleanup_requests(&FailureCause::new(error.clone()));
                Err(error.into())
            }
        }
    }

    /// Stop accepting requests, let the worker finish what is queued and join it.
    ///
    /// Returns the recorded dispatch failure, if any. The failure is reported once; later calls
    /// return `Ok`.
    pub fn close(&self) -> Result<()> {
        if !self.core.closing.swap(true, Ordering::SeqCst) {
            debug!(task = %self.core.task_name, "closing channel state write executor");
        }
        self.core.queue.close();

        let worker = std::mem::replace(&mut *self.worker(), Worker::Stopped);
        if let Worker::Running(handle) = worker {
            // closed from inside the loop: the worker sees the closed queue and exits by itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                self.core.record_failure(FailureCause::msg(format!(
                    "channel state writer thread of {} panicked",
                    self.core.task_name
                )));
            }
        }

        self.core
            .cleanup_requests(&FailureCause::new(self.core.closed()));
        match self.core.take_thrown() {
            Some(cause) => Err(ChannelStateError::DispatchFailed {
                task: self.core.task_name.clone(),
                cause,
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Drop for ChannelStateWriteRequestExecutor {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(error) = self.close() {
            warn!(task = %self.core.task_name, error = %format!("{error:#}"), "channel state write executor failed");
        }
    }
}

impl ExecutorCore {
    fn closed(&self) -> ChannelStateError {
        ChannelStateError::Closed {
            task: self.task_name.clone(),
        }
    }

    fn thrown(&self) -> Option<FailureCause> {
        self.thrown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_thrown(&self) -> Option<FailureCause> {
        self.thrown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn record_failure(&self, cause: FailureCause) {
        let mut thrown = self.thrown.lock().unwrap_or_else(PoisonError::into_inner);
        if thrown.is_none() {
            *thrown = Some(cause);
        }
    }

    fn run(&self) {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(cause) = self.run_loop(&mut **dispatcher) {
            self.record_failure(cause);
        }
        let cause = self
            .thrown()
            .unwrap_or_else(|| FailureCause::new(self.closed()));
        self.cleanup_requests(&cause);
        dispatcher.fail(&cause);
        debug!(task = %self.task_name, "channel state write loop terminated");
    }

    fn run_loop(
        &self,
        dispatcher: &mut dyn ChannelStateWriteRequestDispatcher,
    ) -> Result<(), FailureCause> {
        loop {
            match self.queue.take() {
                Take::Request(request) => {
                    if request.is_cancelled() {
                        debug!(task = %self.task_name, request = %request, "skipping cancelled request");
                        continue;
                    }
                    if !self.await_ready(&request) {
                        request.cancel(&FailureCause::new(self.closed()));
                        continue;
                    }
                    if let Err(cause) = dispatch_guarded(dispatcher, &request) {
                        error!(
                            task = %self.task_name,
                            request = %request,
                            error = %format!("{:#}", cause.error()),
                            "channel state write request dispatch failed"
                        );
                        request.cancel(&cause);
                        return Err(cause);
                    }
                }
                Take::Interrupted if self.closing.load(Ordering::SeqCst) => return Ok(()),
                Take::Interrupted => {
                    debug!(task = %self.task_name, "interrupted while waiting for a request (continue waiting)");
                }
                Take::Closed => return Ok(()),
            }
        }
    }

    /// Wait for buffers the request is still collecting. Gives up once the executor is closing.
    fn await_ready(&self, request: &ChannelStateWriteRequest) -> bool {
        while !request.wait_ready(READY_POLL_INTERVAL) {
            if self.closing.load(Ordering::SeqCst) {
                debug!(task = %self.task_name, request = %request, "closing before buffers became available");
                return false;
            }
        }
        true
    }

    fn cleanup_requests(&self, cause: &FailureCause) {
        let drained = self.queue.drain();
        if drained.is_empty() {
            return;
        }
        let cause = self.thrown().unwrap_or_else(|| cause.clone());
        info!(task = %self.task_name, count = drained.len(), "discarding queued channel state write requests");
        for request in drained {
            request.cancel(&cause);
        }
    }
}

/// Dispatch `request`; a panicking dispatcher is reported like a failing one.
fn dispatch_guarded(
    dispatcher: &mut dyn ChannelStateWriteRequestDispatcher,
    request: &ChannelStateWriteRequest,
) -> Result<(), FailureCause> {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(request))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(FailureCause::new(error)),
        Err(payload) => Err(FailureCause::new(ChannelStateError::DispatchPanicked {
            request: request.to_string(),
            message: panic_message(payload.as_ref()),
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
