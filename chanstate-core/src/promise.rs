//! One-shot completion cells shared between threads.
//!
//! A [`Completable`] resolves at most once, either with a value or with a [`FailureCause`].
//! Observers block on [`Completable::wait`], a single consumer can move the value out with
//! [`Completable::take`], and [`Completable::on_complete`] attaches a continuation that runs
//! exactly once with the outcome.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::FailureCause;

type Continuation<T> = Box<dyn FnOnce(Result<T, FailureCause>) + Send>;

enum Slot<T> {
    Pending(Option<Continuation<T>>),
    Completed(T),
    Failed(FailureCause),
    /// The value was moved out by a consumer or a continuation.
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
}

pub struct Completable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Completable<T> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Pending(None)),
                resolved: Condvar::new(),
            }),
        }
    }
}

impl<T> std::fmt::Debug for Completable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock() {
            Slot::Pending(_) => "pending",
            Slot::Completed(_) => "completed",
            Slot::Failed(_) => "failed",
            Slot::Taken => "taken",
        };
        f.debug_struct("Completable").field("state", &state).finish()
    }
}

impl<T> Completable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already-resolved cell.
    pub fn completed(value: T) -> Self {
        let completable = Self::new();
        completable.complete(value);
        completable
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve with `value`. Returns false (dropping `value`) if already resolved.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with `cause`. Returns false if already resolved.
    pub fn fail(&self, cause: FailureCause) -> bool {
        self.resolve(Err(cause))
    }

    fn resolve(&self, outcome: Result<T, FailureCause>) -> bool {
        let mut slot = self.lock();
        let continuation = match &mut *slot {
            Slot::Pending(continuation) => continuation.take(),
            _ => return false,
        };
        match continuation {
            Some(continuation) => {
                *slot = match &outcome {
                    Ok(_) => Slot::Taken,
                    Err(cause) => Slot::Failed(cause.clone()),
                };
                drop(slot);
                self.shared.resolved.notify_all();
                continuation(outcome);
            }
            None => {
                *slot = match outcome {
                    Ok(value) => Slot::Completed(value),
                    Err(cause) => Slot::Failed(cause),
                };
                drop(slot);
                self.shared.resolved.notify_all();
            }
        }
        true
    }

    pub fn is_done(&self) -> bool {
        !matches!(&*self.lock(), Slot::Pending(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(&*self.lock(), Slot::Failed(_))
    }

    /// Failure cause, if resolved with one.
    pub fn failure(&self) -> Option<FailureCause> {
        match &*self.lock() {
            Slot::Failed(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Block until resolved, giving up after `timeout`. Returns whether the cell is resolved.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while matches!(&*slot, Slot::Pending(_)) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .shared
                .resolved
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Block until resolved and move the value out. Only one consumer gets the value.
    pub fn take(&self) -> Result<T, FailureCause> {
        let mut slot = self.lock();
        while matches!(&*slot, Slot::Pending(_)) {
            slot = self
                .shared
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Completed(value) => Ok(value),
            Slot::Failed(cause) => {
                *slot = Slot::Failed(cause.clone());
                Err(cause)
            }
            Slot::Taken => Err(FailureCause::msg("completable value was already consumed")),
            Slot::Pending(_) => unreachable!("pending slot after wait"),
        }
    }

    /// Run `continuation` with the outcome once resolved: now, in the calling thread, if already
    /// resolved, otherwise later in the resolving thread.
    ///
    /// Returns false, without running it, if the value was already consumed or another
    /// continuation is registered.
    pub fn on_complete<F>(&self, continuation: F) -> bool
    where
        F: FnOnce(Result<T, FailureCause>) + Send + 'static,
    {
        let mut slot = self.lock();
        match &mut *slot {
            Slot::Pending(registered) => {
                if registered.is_some() {
                    return false;
                }
                *registered = Some(Box::new(continuation));
                return true;
            }
            Slot::Taken => return false,
            Slot::Completed(_) | Slot::Failed(_) => {}
        }
        let outcome = match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Completed(value) => Ok(value),
            Slot::Failed(cause) => {
                *slot = Slot::Failed(cause.clone());
                Err(cause)
            }
            Slot::Pending(_) | Slot::Taken => unreachable!("slot checked as resolved"),
        };
        drop(slot);
        continuation(outcome);
        true
    }
}

impl<T: Clone> Completable<T> {
    /// Block until resolved and return a copy of the outcome.
    pub fn wait(&self) -> Result<T, FailureCause> {
        let mut slot = self.lock();
        while matches!(&*slot, Slot::Pending(_)) {
            slot = self
                .shared
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Self::observe(&slot)
    }

    /// Like [`Completable::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, FailureCause>> {
        if !self.wait_done(timeout) {
            return None;
        }
        Some(Self::observe(&self.lock()))
    }

    fn observe(slot: &Slot<T>) -> Result<T, FailureCause> {
        match slot {
            Slot::Completed(value) => Ok(value.clone()),
            Slot::Failed(cause) => Err(cause.clone()),
            Slot::Taken => Err(FailureCause::msg("completable value was already consumed")),
            Slot::Pending(_) => unreachable!("pending slot after wait"),
        }
    }
}

#[cfg(test)]
#[path = "tests/promise_tests.rs"]
mod tests;
