//! Channel-state write pipeline for unaligned checkpoints.
//!
//! ```text
//! producer threads ──submit / submit_priority──▶ RequestQueue
//!                                                   │ take (single worker)
//!                                                   ▼
//!                           ChannelStateWriteRequestExecutor ──dispatch──▶ Dispatcher
//!                                                                            │ per checkpoint
//!                                                                            ▼
//!                                                         ChannelStateCheckpointWriter ──▶ storage
//! ```
//!
//! All requests of one checkpoint are handled by the one worker thread in submission order.
//! Every buffer handed to a request is recycled exactly once: by the checkpoint writer after it
//! was serialized, or by the request's discard path when the request is cancelled.

use crate::buffer::Buffer;
use crate::error::{ChannelStateError, FailureCause};
use crate::promise::Completable;
use crate::types::{
    CheckpointId, CheckpointStorageLocationReference, InputChannelInfo, ResultSubpartitionInfo,
    TaskInfo,
};
use ahash::AHashMap;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod checkpoint_writer;
mod config;
mod dispatcher;
mod executor;
mod queue;
mod request;
mod result;
mod serializer;
mod storage;
mod writer;

pub use checkpoint_writer::*;
pub use config::*;
pub use dispatcher::*;
pub use executor::*;
pub use queue::*;
pub use request::*;
pub use result::*;
pub use serializer::*;
pub use storage::*;
pub use writer::*;
