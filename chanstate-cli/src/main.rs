use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use chanstate_core::buffer::NetworkBufferPool;
use chanstate_core::checkpoint::{
    ChannelStateSerializer, ChannelStateStorage, ChannelStateWriteResult, ChannelStateWriterConfig,
    ChannelStateWriterImpl, DEFAULT_MAX_CHECKPOINTS, FsChannelStateStorage,
};
use chanstate_core::error::FailureCause;
use chanstate_core::promise::Completable;
use chanstate_core::types::{
    CheckpointId, CheckpointStorageLocationReference, InputChannelInfo, ResultSubpartitionInfo,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "chanstate")]
#[command(about = "Channel-state writer CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write channel state of simulated checkpoints from concurrent producer threads.
    Simulate {
        #[arg(long, default_value = "chanstate-data")]
        dir: PathBuf,
        #[arg(long, default_value = "simulated-task")]
        task_name: String,
        #[arg(long, default_value_t = 0)]
        subtask: usize,
        #[arg(long, default_value_t = 3)]
        checkpoints: u64,
        #[arg(long, default_value_t = 2)]
        input_channels: u32,
        #[arg(long, default_value_t = 2)]
        output_subpartitions: u32,
        /// Buffers per channel and checkpoint.
        #[arg(long, default_value_t = 16)]
        buffers: usize,
        #[arg(long, default_value_t = 64)]
        buffer_size: usize,
        /// Abort every n-th checkpoint (0 disables aborts).
        #[arg(long, default_value_t = 0)]
        abort_every: u64,
        #[arg(long, default_value_t = DEFAULT_MAX_CHECKPOINTS)]
        max_checkpoints: usize,
    },
    /// Print the persisted channel state of one checkpoint.
    Inspect {
        #[arg(long, default_value = "chanstate-data")]
        dir: PathBuf,
        #[arg(long)]
        checkpoint: CheckpointId,
    },
    /// Delete all but the newest checkpoints.
    Purge {
        #[arg(long, default_value = "chanstate-data")]
        dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        keep: usize,
    },
}

struct Workload {
    input_channels: u32,
    output_subpartitions: u32,
    buffers: usize,
    buffer_size: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            dir,
            task_name,
            subtask,
            checkpoints,
            input_channels,
            output_subpartitions,
            buffers,
            buffer_size,
            abort_every,
            max_checkpoints,
        } => {
            let storage: Arc<dyn ChannelStateStorage> = Arc::new(FsChannelStateStorage::new(&dir)?);
            let config =
                ChannelStateWriterConfig::new(task_name, subtask).with_max_checkpoints(max_checkpoints);
            let workload = Workload {
                input_channels,
                output_subpartitions,
                buffers,
                buffer_size,
            };
            simulate(config, storage, &workload, checkpoints, abort_every)?;
        }
        Commands::Inspect { dir, checkpoint } => inspect(FsChannelStateStorage::new(&dir)?, checkpoint)?,
        Commands::Purge { dir, keep } => {
            let storage = FsChannelStateStorage::new(&dir)?;
            storage.purge(keep)?;
            println!("remaining checkpoints: {:?}", storage.list_checkpoints()?);
        }
    }
    Ok(())
}

fn simulate(
    config: ChannelStateWriterConfig,
    storage: Arc<dyn ChannelStateStorage>,
    workload: &Workload,
    checkpoints: u64,
    abort_every: u64,
) -> anyhow::Result<()> {
    let pool = NetworkBufferPool::new();
    let writer = ChannelStateWriterImpl::new(config, storage)?;
    let started = Instant::now();

    let mut results: Vec<(CheckpointId, ChannelStateWriteResult)> = Vec::new();
    for checkpoint_id in 1..=checkpoints {
        let result = writer.start(checkpoint_id, CheckpointStorageLocationReference::Default)?;
        let written = produce(&writer, &pool, workload, checkpoint_id)?;
        info!(checkpoint_id, buffers = written, "producers finished");

        if abort_every > 0 && checkpoint_id % abort_every == 0 {
            writer.abort(
                checkpoint_id,
                FailureCause::msg(format!("simulated abort of checkpoint {checkpoint_id}")),
                false,
            )?;
        } else {
            writer.finish_input(checkpoint_id)?;
            writer.finish_output(checkpoint_id)?;
        }
        results.push((checkpoint_id, result));
    }

    for (checkpoint_id, result) in &results {
        match result.wait() {
            Ok((inputs, outputs)) => {
                let bytes: u64 = inputs.iter().map(|handle| handle.state_size).sum::<u64>()
                    + outputs.iter().map(|handle| handle.state_size).sum::<u64>();
                println!(
                    "checkpoint {checkpoint_id}: completed input_channels={} result_subpartitions={} bytes={bytes}",
                    inputs.len(),
                    outputs.len()
                );
            }
            Err(cause) => println!("checkpoint {checkpoint_id}: failed: {cause}"),
        }
        writer.get_and_remove_write_result(*checkpoint_id)?;
    }
    writer.close()?;

    println!(
        "buffers requested={} recycled={} leaked={} elapsed={:?}",
        pool.requested(),
        pool.recycled(),
        pool.leaked(),
        started.elapsed()
    );
    Ok(())
}

/// One producer thread per channel; each reports how many buffers it handed over.
fn produce(
    writer: &ChannelStateWriterImpl,
    pool: &NetworkBufferPool,
    workload: &Workload,
    checkpoint_id: CheckpointId,
) -> anyhow::Result<usize> {
    let (report, reports) = crossbeam_channel::unbounded::<anyhow::Result<usize>>();
    thread::scope(|scope| {
        for channel in 0..workload.input_channels {
            let report = report.clone();
            scope.spawn(move || {
                let info = InputChannelInfo::new(0, channel);
                let sent = (0..workload.buffers)
                    .try_for_each(|seq| {
                        let payload = payload(checkpoint_id, channel, seq, workload.buffer_size);
                        writer.add_input_data(checkpoint_id, info, vec![pool.request_buffer(&payload)])
                    })
                    .map(|()| workload.buffers);
                let _ = report.send(sent);
            });
        }
        for subpartition in 0..workload.output_subpartitions {
            let report = report.clone();
            scope.spawn(move || {
                let info = ResultSubpartitionInfo::new(0, subpartition);
                let buffers: Vec<_> = (0..workload.buffers)
                    .map(|seq| {
                        pool.request_buffer(&payload(checkpoint_id, subpartition, seq, workload.buffer_size))
                    })
                    .collect();
                // odd subpartitions hand their data over after registering the write
                let sent = if subpartition % 2 == 1 {
                    let pending = Completable::new();
                    let registered =
                        writer.add_output_data_future(checkpoint_id, info, pending.clone());
                    // a refused request still recycles whatever completes its future
                    pending.complete(buffers);
                    registered
                } else {
                    writer.add_output_data(checkpoint_id, info, buffers)
                };
                let _ = report.send(sent.map(|()| workload.buffers));
            });
        }
    });
    drop(report);

    let mut written = 0;
    for sent in reports.iter() {
        written += sent.with_context(|| format!("producer of checkpoint {checkpoint_id} failed"))?;
    }
    Ok(written)
}

fn payload(checkpoint_id: CheckpointId, channel: u32, seq: usize, size: usize) -> Vec<u8> {
    let mut payload = format!("{checkpoint_id}/{channel}/{seq};").into_bytes();
    payload.resize(size.max(payload.len()), b'.');
    payload
}

fn inspect(storage: FsChannelStateStorage, checkpoint_id: CheckpointId) -> anyhow::Result<()> {
    let manifests = storage.manifests(checkpoint_id)?;
    if manifests.is_empty() {
        println!("checkpoint {checkpoint_id}: no channel state");
        return Ok(());
    }
    let serializer = ChannelStateSerializer;
    for manifest in manifests {
        println!(
            "checkpoint {} task {} location {:?}",
            manifest.checkpoint_id, manifest.task, manifest.location
        );
        for handle in &manifest.input_channels {
            let stream = storage.load_channel_state(&handle.delegate)?;
            let chunks = serializer.read_channel(&stream, &handle.offsets)?;
            println!(
                "  {} chunks={} state_size={} bytes={}",
                handle.info,
                chunks.len(),
                handle.state_size,
                chunks.iter().map(Vec::len).sum::<usize>()
            );
        }
        for handle in &manifest.result_subpartitions {
            let stream = storage.load_channel_state(&handle.delegate)?;
            let chunks = serializer.read_channel(&stream, &handle.offsets)?;
            println!(
                "  {} chunks={} state_size={} bytes={}",
                handle.info,
                chunks.len(),
                handle.state_size,
                chunks.iter().map(Vec::len).sum::<usize>()
            );
        }
    }
    Ok(())
}
