use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn test_complete_then_wait() {
    let completable = Completable::new();
    assert!(!completable.is_done());
    assert!(completable.complete(7));
    assert!(completable.is_done());
    assert_eq!(completable.wait().unwrap(), 7);
    assert_eq!(completable.wait().unwrap(), 7);
}

#[test]
fn test_second_resolution_is_ignored() {
    let completable = Completable::new();
    assert!(completable.fail(FailureCause::msg("first")));
    assert!(!completable.fail(FailureCause::msg("second")));
    assert!(!completable.complete(1));
    assert!(completable.is_failed());
    assert_eq!(completable.wait().unwrap_err().to_string(), "first");
}

#[test]
fn test_wait_blocks_until_completed_from_other_thread() {
    let completable = Completable::<u32>::new();
    let producer = completable.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        producer.complete(42);
    });
    assert_eq!(completable.wait().unwrap(), 42);
    handle.join().unwrap();
}

#[test]
fn test_wait_timeout_on_pending() {
    let completable = Completable::<u32>::new();
    assert!(completable.wait_timeout(Duration::from_millis(10)).is_none());
    assert!(!completable.wait_done(Duration::from_millis(1)));
}

#[test]
fn test_take_moves_value_out_once() {
    let completable = Completable::completed(vec![1, 2, 3]);
    assert_eq!(completable.take().unwrap(), vec![1, 2, 3]);
    assert!(completable.take().is_err());
    assert!(completable.is_done());
}

#[test]
fn test_take_keeps_failure_observable() {
    let completable = Completable::<Vec<u8>>::new();
    let cause = FailureCause::msg("broken");
    completable.fail(cause.clone());
    assert!(completable.take().unwrap_err().ptr_eq(&cause));
    assert!(completable.failure().unwrap().ptr_eq(&cause));
}

#[test]
fn test_continuation_runs_on_later_completion() {
    let completable = Completable::<u32>::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_callback = Arc::clone(&seen);
    assert!(completable.on_complete(move |outcome| {
        seen_in_callback.store(outcome.unwrap() as usize, Ordering::SeqCst);
    }));
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    completable.complete(5);
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert!(completable.is_done());
}

#[test]
fn test_continuation_runs_immediately_when_resolved() {
    let completable = Completable::completed(9u32);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_callback = Arc::clone(&seen);
    assert!(completable.on_complete(move |outcome| {
        seen_in_callback.store(outcome.unwrap() as usize, Ordering::SeqCst);
    }));
    assert_eq!(seen.load(Ordering::SeqCst), 9);
    // value consumed by the continuation
    assert!(!completable.on_complete(|_| {}));
}

#[test]
fn test_only_one_continuation_is_registered() {
    let completable = Completable::<u32>::new();
    assert!(completable.on_complete(|_| {}));
    assert!(!completable.on_complete(|_| panic!("must not run")));
    completable.complete(1);
}

#[test]
fn test_continuation_receives_failure() {
    let completable = Completable::<u32>::new();
    let failed = Arc::new(AtomicUsize::new(0));
    let failed_in_callback = Arc::clone(&failed);
    completable.on_complete(move |outcome| {
        if outcome.is_err() {
            failed_in_callback.fetch_add(1, Ordering::SeqCst);
        }
    });
    completable.fail(FailureCause::msg("nope"));
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert!(completable.is_failed());
}
