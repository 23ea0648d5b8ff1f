use super::*;
use std::error::Error as _;

#[derive(Debug, thiserror::Error)]
#[error("disk on fire")]
struct DiskOnFire;

#[test]
fn test_failure_cause_clone_preserves_identity() {
    let cause = FailureCause::new(DiskOnFire);
    let clone = cause.clone();
    assert!(cause.ptr_eq(&clone));
    assert!(!cause.ptr_eq(&FailureCause::new(DiskOnFire)));
}

#[test]
fn test_failure_cause_downcast_and_display() {
    let cause = FailureCause::new(DiskOnFire);
    assert!(cause.downcast_ref::<DiskOnFire>().is_some());
    assert_eq!(cause.to_string(), "disk on fire");

    let message = FailureCause::msg("plain message");
    assert_eq!(message.to_string(), "plain message");
    assert!(message.downcast_ref::<DiskOnFire>().is_none());
}

#[test]
fn test_dispatch_failed_exposes_cause_as_source() {
    let cause = FailureCause::new(DiskOnFire);
    let error = ChannelStateError::DispatchFailed {
        task: "t".to_string(),
        cause: cause.clone(),
    };
    let source = error.source().expect("source");
    let replayed = source
        .downcast_ref::<FailureCause>()
        .expect("source is the failure cause");
    assert!(replayed.ptr_eq(&cause));
}

#[test]
fn test_channel_state_error_survives_anyhow() {
    let error: anyhow::Error = ChannelStateError::Closed {
        task: "t".to_string(),
    }
    .into();
    assert!(matches!(
        error.downcast_ref::<ChannelStateError>(),
        Some(ChannelStateError::Closed { .. })
    ));
}

#[test]
fn test_internal_errors() {
    assert!(
        ChannelStateError::IllegalRequestState {
            request: "writeInput 1".to_string(),
            expected: RequestState::New,
            actual: RequestState::Completed,
        }
        .is_internal()
    );
    assert!(!ChannelStateError::CheckpointNotInProgress { checkpoint_id: 1 }.is_internal());
}
