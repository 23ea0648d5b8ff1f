use super::*;
use crate::buffer::NetworkBufferPool;

fn task() -> TaskInfo {
    TaskInfo::new("map", 0)
}

fn dispatcher() -> (
    ChannelStateWriteRequestDispatcherImpl,
    Arc<InMemoryChannelStateStorage>,
) {
    let storage = Arc::new(InMemoryChannelStateStorage::new());
    (
        ChannelStateWriteRequestDispatcherImpl::new(task(), storage.clone()),
        storage,
    )
}

fn start(
    dispatcher: &mut ChannelStateWriteRequestDispatcherImpl,
    checkpoint_id: CheckpointId,
) -> ChannelStateWriteResult {
    let result = ChannelStateWriteResult::new();
    dispatcher
        .dispatch(&ChannelStateWriteRequest::start(
            checkpoint_id,
            result.clone(),
            CheckpointStorageLocationReference::Default,
        ))
        .unwrap();
    result
}

fn complete(dispatcher: &mut ChannelStateWriteRequestDispatcherImpl, checkpoint_id: CheckpointId) {
    dispatcher
        .dispatch(&ChannelStateWriteRequest::complete_input(checkpoint_id))
        .unwrap();
    dispatcher
        .dispatch(&ChannelStateWriteRequest::complete_output(checkpoint_id))
        .unwrap();
}

#[test]
fn test_completed_checkpoint_persists_channel_state() {
    let pool = NetworkBufferPool::new();
    let (mut dispatcher, storage) = dispatcher();
    let result = start(&mut dispatcher, 1);
    assert_eq!(dispatcher.in_progress_checkpoints(), vec![1]);

    let input = InputChannelInfo::new(0, 1);
    let output = ResultSubpartitionInfo::new(0, 0);
    dispatcher
        .dispatch(&ChannelStateWriteRequest::write_input(
            1,
            input,
            vec![pool.request_buffer(b"a"), pool.request_buffer(b"bb")],
        ))
        .unwrap();
    dispatcher
        .dispatch(&ChannelStateWriteRequest::write_output(
            1,
            output,
            vec![pool.request_buffer(b"ccc")],
        ))
        .unwrap();
    complete(&mut dispatcher, 1);

    assert!(dispatcher.in_progress_checkpoints().is_empty());
    assert_eq!(pool.outstanding(), 0);

    let (inputs, outputs) = result.wait().unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].info, input);
    assert_eq!(inputs[0].offsets, vec![4, 9]);
    assert_eq!(inputs[0].state_size, 11);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].offsets, vec![15]);
    assert_eq!(outputs[0].state_size, 7);

    let stream = storage.load_channel_state(&inputs[0].delegate).unwrap();
    let serializer = ChannelStateSerializer;
    assert_eq!(
        serializer.read_channel(&stream, &inputs[0].offsets).unwrap(),
        vec![b"a".to_vec(), b"bb".to_vec()]
    );
    assert_eq!(
        serializer.read_channel(&stream, &outputs[0].offsets).unwrap(),
        vec![b"ccc".to_vec()]
    );
    assert_eq!(storage.load_manifest(1, &task()).unwrap().input_channels, inputs);
}

#[test]
fn test_duplicate_start_is_fatal() {
    let (mut dispatcher, _) = dispatcher();
    start(&mut dispatcher, 1);
    let error = dispatcher
        .dispatch(&ChannelStateWriteRequest::start(
            1,
            ChannelStateWriteResult::new(),
            CheckpointStorageLocationReference::Default,
        ))
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<ChannelStateError>(),
        Some(ChannelStateError::WriterAlreadyExists { checkpoint_id: 1 })
    ));
}

#[test]
fn test_request_for_never_started_checkpoint_is_fatal() {
    let pool = NetworkBufferPool::new();
    let (mut dispatcher, _) = dispatcher();
    let request = ChannelStateWriteRequest::write_input(
        5,
        InputChannelInfo::new(0, 0),
        vec![pool.request_buffer(b"x")],
    );
    let error = dispatcher.dispatch(&request).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<ChannelStateError>(),
        Some(ChannelStateError::WriterNotFound { checkpoint_id: 5, .. })
    ));
    request.cancel(&FailureCause::new(error));
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_request_for_finished_checkpoint_is_discarded() {
    let pool = NetworkBufferPool::new();
    let (mut dispatcher, _) = dispatcher();
    start(&mut dispatcher, 2);
    complete(&mut dispatcher, 2);

    let late = ChannelStateWriteRequest::write_output(
        2,
        ResultSubpartitionInfo::new(0, 0),
        vec![pool.request_buffer(b"late")],
    );
    dispatcher.dispatch(&late).unwrap();
    assert!(late.is_cancelled());
    assert_eq!(pool.outstanding(), 0);

    // older checkpoints are stale as well
    let older = ChannelStateWriteRequest::complete_input(1);
    dispatcher.dispatch(&older).unwrap();
    assert!(older.is_cancelled());
}

#[test]
fn test_abort_fails_result_with_abort_cause() {
    let pool = NetworkBufferPool::new();
    let (mut dispatcher, _) = dispatcher();
    let result = start(&mut dispatcher, 1);
    dispatcher
        .dispatch(&ChannelStateWriteRequest::write_input(
            1,
            InputChannelInfo::new(0, 0),
            vec![pool.request_buffer(b"x")],
        ))
        .unwrap();

    let cause = FailureCause::msg("checkpoint declined");
    dispatcher
        .dispatch(&ChannelStateWriteRequest::abort(1, cause.clone()))
        .unwrap();
    assert!(result.wait().unwrap_err().ptr_eq(&cause));
    assert!(dispatcher.in_progress_checkpoints().is_empty());

    let after_abort = ChannelStateWriteRequest::complete_input(1);
    dispatcher.dispatch(&after_abort).unwrap();
    assert!(after_abort.is_cancelled());
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_abort_before_start_fails_the_start() {
    let (mut dispatcher, _) = dispatcher();
    let cause = FailureCause::msg("aborted early");
    dispatcher
        .dispatch(&ChannelStateWriteRequest::abort(3, cause.clone()))
        .unwrap();
    // writes racing ahead of the start are dropped, not fatal
    let early = ChannelStateWriteRequest::complete_output(3);
    dispatcher.dispatch(&early).unwrap();
    assert!(early.is_cancelled());

    let result = start(&mut dispatcher, 3);
    let failure = result.wait().unwrap_err();
    match failure.downcast_ref::<ChannelStateError>() {
        Some(ChannelStateError::CheckpointAborted {
            checkpoint_id: 3,
            cause: reported,
        }) => assert!(reported.ptr_eq(&cause)),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(dispatcher.in_progress_checkpoints().is_empty());
}

#[test]
fn test_write_failure_fails_only_its_checkpoint() {
    let pool = NetworkBufferPool::new();
    let (mut dispatcher, _) = dispatcher();
    let first = start(&mut dispatcher, 1);
    let second = start(&mut dispatcher, 2);

    let bad = ChannelStateWriteRequest::write_input(
        1,
        InputChannelInfo::new(0, 0),
        vec![pool.request_event(b"barrier"), pool.request_buffer(b"data")],
    );
    dispatcher.dispatch(&bad).unwrap();
    assert!(bad.is_cancelled());
    assert_eq!(pool.outstanding(), 0);
    let failure = first.wait().unwrap_err();
    assert!(matches!(
        failure.downcast_ref::<ChannelStateError>(),
        Some(ChannelStateError::InvalidBuffer { .. })
    ));
    assert_eq!(dispatcher.in_progress_checkpoints(), vec![2]);

    complete(&mut dispatcher, 2);
    let (inputs, outputs) = second.wait().unwrap();
    assert!(inputs.is_empty());
    assert!(outputs.is_empty());
}

#[test]
fn test_second_completion_fails_checkpoint() {
    let (mut dispatcher, _) = dispatcher();
    let result = start(&mut dispatcher, 1);
    dispatcher
        .dispatch(&ChannelStateWriteRequest::complete_input(1))
        .unwrap();
    dispatcher
        .dispatch(&ChannelStateWriteRequest::complete_input(1))
        .unwrap();
    assert!(matches!(
        result
            .wait()
            .unwrap_err()
            .downcast_ref::<ChannelStateError>(),
        Some(ChannelStateError::ChannelAlreadyComplete { side: "input", .. })
    ));
}

#[test]
fn test_fail_fails_every_in_progress_checkpoint() {
    let (mut dispatcher, _) = dispatcher();
    let first = start(&mut dispatcher, 1);
    let second = start(&mut dispatcher, 2);
    let cause = FailureCause::msg("executor stopped");

    dispatcher.fail(&cause);

    assert!(first.wait().unwrap_err().ptr_eq(&cause));
    assert!(second.wait().unwrap_err().ptr_eq(&cause));
    assert!(dispatcher.in_progress_checkpoints().is_empty());
}

struct BrokenStorage;

impl ChannelStateStorage for BrokenStorage {
    fn save_channel_state(
        &self,
        _checkpoint_id: CheckpointId,
        _task: &TaskInfo,
        _stream: Vec<u8>,
    ) -> Result<StreamStateHandle> {
        Err(anyhow!("disk full"))
    }

    fn load_channel_state(&self, _handle: &StreamStateHandle) -> Result<Vec<u8>> {
        Err(anyhow!("disk full"))
    }

    fn save_manifest(&self, _manifest: &ChannelStateManifest) -> Result<()> {
        Err(anyhow!("disk full"))
    }

    fn load_manifest(
        &self,
        _checkpoint_id: CheckpointId,
        _task: &TaskInfo,
    ) -> Result<ChannelStateManifest> {
        Err(anyhow!("disk full"))
    }

    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>> {
        Ok(Vec::new())
    }

    fn purge(&self, _keep_last_n: usize) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_storage_failure_fails_result_not_dispatcher() {
    let pool = NetworkBufferPool::new();
    let mut dispatcher = ChannelStateWriteRequestDispatcherImpl::new(task(), Arc::new(BrokenStorage));
    let result = start(&mut dispatcher, 1);
    dispatcher
        .dispatch(&ChannelStateWriteRequest::write_input(
            1,
            InputChannelInfo::new(0, 0),
            vec![pool.request_buffer(b"x")],
        ))
        .unwrap();
    complete(&mut dispatcher, 1);

    let failure = result.wait().unwrap_err();
    assert!(format!("{:#}", failure.error()).contains("disk full"));
    assert_eq!(pool.outstanding(), 0);
}
