use super::*;

/// Destination of persisted channel state: one stream and one manifest per task and checkpoint.
pub trait ChannelStateStorage: Send + Sync {
    fn save_channel_state(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
        stream: Vec<u8>,
    ) -> Result<StreamStateHandle>;
    fn load_channel_state(&self, handle: &StreamStateHandle) -> Result<Vec<u8>>;
    fn save_manifest(&self, manifest: &ChannelStateManifest) -> Result<()>;
    fn load_manifest(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
    ) -> Result<ChannelStateManifest>;
    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>>;
    /// Delete everything but the `keep_last_n` newest checkpoints.
    fn purge(&self, keep_last_n: usize) -> Result<()>;
}

/// In-memory storage for tests and local single-process execution.
#[derive(Default)]
pub struct InMemoryChannelStateStorage {
    streams: Mutex<HashMap<String, (CheckpointId, Vec<u8>)>>,
    manifests: Mutex<HashMap<(CheckpointId, TaskInfo), ChannelStateManifest>>,
}

impl InMemoryChannelStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifests of one checkpoint, in no particular order.
    pub fn manifests(&self, checkpoint_id: CheckpointId) -> Result<Vec<ChannelStateManifest>> {
        Ok(self
            .manifests
            .lock()
            .map_err(|_| anyhow!("channel state manifest lock poisoned"))?
            .iter()
            .filter(|((id, _), _)| *id == checkpoint_id)
            .map(|(_, manifest)| manifest.clone())
            .collect())
    }
}

impl ChannelStateStorage for InMemoryChannelStateStorage {
    fn save_channel_state(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
        stream: Vec<u8>,
    ) -> Result<StreamStateHandle> {
        let handle = StreamStateHandle {
            key: format!("memory://chk-{checkpoint_id}/{}", task.file_stem()),
            size: stream.len() as u64,
        };
        self.streams
            .lock()
            .map_err(|_| anyhow!("channel state stream lock poisoned"))?
            .insert(handle.key.clone(), (checkpoint_id, stream));
        Ok(handle)
    }

    fn load_channel_state(&self, handle: &StreamStateHandle) -> Result<Vec<u8>> {
        self.streams
            .lock()
            .map_err(|_| anyhow!("channel state stream lock poisoned"))?
            .get(&handle.key)
            .map(|(_, stream)| stream.clone())
            .ok_or_else(|| anyhow!("channel state stream {} not found", handle.key))
    }

    fn save_manifest(&self, manifest: &ChannelStateManifest) -> Result<()> {
        self.manifests
            .lock()
            .map_err(|_| anyhow!("channel state manifest lock poisoned"))?
            .insert(
                (manifest.checkpoint_id, manifest.task.clone()),
                manifest.clone(),
            );
        Ok(())
    }

    fn load_manifest(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
    ) -> Result<ChannelStateManifest> {
        self.manifests
            .lock()
            .map_err(|_| anyhow!("channel state manifest lock poisoned"))?
            .get(&(checkpoint_id, task.clone()))
            .cloned()
            .ok_or_else(|| {
                anyhow!("channel state manifest of {task} not found for checkpoint {checkpoint_id}")
            })
    }

    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>> {
        let ids: BTreeSet<_> = self
            .manifests
            .lock()
            .map_err(|_| anyhow!("channel state manifest lock poisoned"))?
            .keys()
            .map(|(id, _)| *id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list_checkpoints()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purged: BTreeSet<_> = ids[..ids.len() - keep_last_n].iter().copied().collect();

        let mut manifests = self
            .manifests
            .lock()
            .map_err(|_| anyhow!("channel state manifest lock poisoned"))?;
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| anyhow!("channel state stream lock poisoned"))?;
        manifests.retain(|(id, _), _| !purged.contains(id));
        streams.retain(|_, (id, _)| !purged.contains(id));
        Ok(())
    }
}

/// File-system storage.
///
/// Layout: `<base>/chk-<id>/<task>.state` holds the stream, `<task>.manifest.bin` the
/// bincode-encoded [`ChannelStateManifest`].
pub struct FsChannelStateStorage {
    base_path: PathBuf,
}

impl FsChannelStateStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create channel state storage directory {}",
                base_path.display()
            )
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn checkpoint_dir(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.base_path.join(format!("chk-{checkpoint_id}"))
    }

    fn create_checkpoint_dir(&self, checkpoint_id: CheckpointId) -> Result<PathBuf> {
        let dir = self.checkpoint_dir(checkpoint_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;
        Ok(dir)
    }

    fn manifest_path(&self, checkpoint_id: CheckpointId, task: &TaskInfo) -> PathBuf {
        self.checkpoint_dir(checkpoint_id)
            .join(format!("{}.manifest.bin", task.file_stem()))
    }

    /// Every manifest stored for `checkpoint_id`, ordered by file name.
    pub fn manifests(&self, checkpoint_id: CheckpointId) -> Result<Vec<ChannelStateManifest>> {
        let dir = self.checkpoint_dir(checkpoint_id);
        let mut paths = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("read_dir failed for {}", dir.display()))?
        {
            let path = entry?.path();
            if path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(".manifest.bin"))
            {
                paths.push(path);
            }
        }
        paths.sort();
        paths
            .into_iter()
            .map(|path| {
                let bytes = fs::read(&path)
                    .with_context(|| format!("read manifest {} failed", path.display()))?;
                bincode::deserialize(&bytes).context("deserialize channel state manifest failed")
            })
            .collect()
    }
}

impl ChannelStateStorage for FsChannelStateStorage {
    fn save_channel_state(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
        stream: Vec<u8>,
    ) -> Result<StreamStateHandle> {
        let path = self
            .create_checkpoint_dir(checkpoint_id)?
            .join(format!("{}.state", task.file_stem()));
        let size = stream.len() as u64;
        fs::write(&path, stream)
            .with_context(|| format!("write channel state {} failed", path.display()))?;
        Ok(StreamStateHandle {
            key: path.to_string_lossy().into_owned(),
            size,
        })
    }

    fn load_channel_state(&self, handle: &StreamStateHandle) -> Result<Vec<u8>> {
        fs::read(&handle.key).with_context(|| format!("read channel state {} failed", handle.key))
    }

    fn save_manifest(&self, manifest: &ChannelStateManifest) -> Result<()> {
        self.create_checkpoint_dir(manifest.checkpoint_id)?;
        let bytes =
            bincode::serialize(manifest).context("serialize channel state manifest failed")?;
        fs::write(
            self.manifest_path(manifest.checkpoint_id, &manifest.task),
            bytes,
        )
        .context("write channel state manifest failed")
    }

    fn load_manifest(
        &self,
        checkpoint_id: CheckpointId,
        task: &TaskInfo,
    ) -> Result<ChannelStateManifest> {
        let bytes = fs::read(self.manifest_path(checkpoint_id, task))
            .context("read channel state manifest failed")?;
        bincode::deserialize(&bytes).context("deserialize channel state manifest failed")
    }

    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)
            .with_context(|| format!("read_dir failed for {}", self.base_path.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name
                .to_string_lossy()
                .strip_prefix("chk-")
                .and_then(|id| id.parse::<CheckpointId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list_checkpoints()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        for checkpoint_id in ids.into_iter().take(purge_count) {
            let dir = self.checkpoint_dir(checkpoint_id);
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
            debug!(checkpoint_id, "purged channel state checkpoint");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/storage_tests.rs"]
mod tests;
