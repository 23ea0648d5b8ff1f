use super::*;

#[test]
fn test_pool_counts_recycled_buffers() {
    let pool = NetworkBufferPool::new();
    let buffer = pool.request_buffer(b"abc");
    assert!(buffer.is_buffer());
    assert_eq!(buffer.readable_bytes(), b"abc");
    assert_eq!(pool.outstanding(), 1);

    buffer.recycle();
    assert_eq!(pool.requested(), 1);
    assert_eq!(pool.recycled(), 1);
    assert_eq!(pool.leaked(), 0);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_dropped_buffer_is_reclaimed_as_leaked() {
    let pool = NetworkBufferPool::new();
    drop(pool.request_buffer(b"lost"));
    assert_eq!(pool.recycled(), 0);
    assert_eq!(pool.leaked(), 1);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_event_buffer_is_not_a_data_buffer() {
    let pool = NetworkBufferPool::new();
    let event = pool.request_event(b"barrier");
    assert!(!event.is_buffer());
    assert_eq!(event.data_type(), DataType::EventBuffer);
    event.recycle();

    assert!(!DataType::PriorityEvent.is_buffer());
    assert!(DataType::DataBuffer.is_buffer());
}

#[test]
fn test_recycled_segment_is_reused_clean() {
    let pool = NetworkBufferPool::new();
    pool.request_buffer(b"first payload").recycle();
    let second = pool.request_buffer(b"xy");
    assert_eq!(second.readable_bytes(), b"xy");
    assert_eq!(second.len(), 2);
    second.recycle();
    assert_eq!(pool.recycled(), 2);
}
