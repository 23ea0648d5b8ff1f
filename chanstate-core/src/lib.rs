//! # chanstate Core
//!
//! Durable write path for the in-flight channel state of a stream task, persisted as part of
//! unaligned checkpoints.
//!
//! - [`types`]: Identifiers: [`CheckpointId`](types::CheckpointId),
//!   [`InputChannelInfo`](types::InputChannelInfo),
//!   [`ResultSubpartitionInfo`](types::ResultSubpartitionInfo), [`TaskInfo`](types::TaskInfo).
//! - [`buffer`]: Network buffers with exactly-once recycling and a counting pool.
//! - [`promise`]: [`Completable`](promise::Completable): one-shot completion cells used for
//!   result handles and pending buffer futures.
//! - [`checkpoint`]: The write pipeline: requests, the blocking request queue, the single-worker
//!   [`ChannelStateWriteRequestExecutor`](checkpoint::ChannelStateWriteRequestExecutor), the
//!   request dispatcher, per-checkpoint writers, storage and the producer-facing
//!   [`ChannelStateWriterImpl`](checkpoint::ChannelStateWriterImpl).
//! - [`error`]: [`ChannelStateError`](error::ChannelStateError) and
//!   [`FailureCause`](error::FailureCause).

pub mod buffer;
pub mod checkpoint;
pub mod error;
pub mod promise;
pub mod types;
