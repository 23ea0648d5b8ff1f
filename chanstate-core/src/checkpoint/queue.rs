use super::*;

/// Outcome of a blocking [`RequestQueue::take`].
#[derive(Debug)]
pub enum Take {
    Request(SharedRequest),
    /// The waiting thread was woken without a request; callers decide whether to retry.
    Interrupted,
    /// The queue is closed and empty.
    Closed,
}

/// Double-ended blocking queue between submitters and the writer thread.
pub trait RequestQueue: Send + Sync {
    /// Append at the tail. Gives the request back if the queue no longer accepts requests.
    fn put(&self, request: SharedRequest) -> Result<(), SharedRequest>;

    /// Insert at the head, ahead of everything already queued.
    fn put_first(&self, request: SharedRequest) -> Result<(), SharedRequest>;

    fn take(&self) -> Take;

    /// Remove and return everything currently queued, head first.
    fn drain(&self) -> Vec<SharedRequest>;

    /// Stop accepting requests. Queued requests remain available to `take`.
    fn close(&self);

    /// Wake one blocked `take` with [`Take::Interrupted`].
    fn interrupt(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<SharedRequest>,
    interrupted: bool,
    closed: bool,
}

#[derive(Default)]
pub struct BlockingRequestQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl BlockingRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, request: SharedRequest, first: bool) -> Result<(), SharedRequest> {
        let mut state = self.lock();
        if state.closed {
            return Err(request);
        }
        if first {
            state.requests.push_front(request);
        } else {
            state.requests.push_back(request);
        }
        drop(state);
        self.changed.notify_one();
        Ok(())
    }
}

impl RequestQueue for BlockingRequestQueue {
    fn put(&self, request: SharedRequest) -> Result<(), SharedRequest> {
        self.enqueue(request, false)
    }

    fn put_first(&self, request: SharedRequest) -> Result<(), SharedRequest> {
        self.enqueue(request, true)
    }

    fn take(&self) -> Take {
        let mut state = self.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return Take::Interrupted;
            }
            if let Some(request) = state.requests.pop_front() {
                return Take::Request(request);
            }
            if state.closed {
                return Take::Closed;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn drain(&self) -> Vec<SharedRequest> {
        self.lock().requests.drain(..).collect()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    fn interrupt(&self) {
        self.lock().interrupted = true;
        self.changed.notify_all();
    }

    fn len(&self) -> usize {
        self.lock().requests.len()
    }
}

#[cfg(test)]
#[path = "tests/queue_tests.rs"]
mod tests;
