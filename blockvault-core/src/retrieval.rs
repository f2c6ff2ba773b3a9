//! Serving a single block, extracting it from its container on first use.
//!
//! The first request for a block claims it in the [`MetadataStore`], fetches
//! the compressed range once and tees every raw chunk to two consumers: the
//! caller's stream and a background task that writes the decompressed block to
//! the local cache directory. Each consumer runs its own gzip decoder.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::{stream::BoxStream, Stream, StreamExt};
use tokio::{io::AsyncWriteExt, sync::mpsc, time::Instant};
use tokio_util::io::ReaderStream;

use blockvault_object_storage::{ObjectRangeSource, RangeStream};

use crate::{
    error::{BlockError, BlockResult},
    files::LocalBlockFiles,
    record::{BlockKey, BlockRecord},
    store::{ClaimResult, MetadataStore},
};

/// Decompressed block bytes as they become available.
pub type BlockStream = BoxStream<'static, io::Result<Bytes>>;

/// Raw chunks in flight between the materializing task and the caller.
const TEE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Upper bound on waiting for another request's extraction.
    pub wait_timeout: Duration,
    /// Re-check interval while waiting, in case a wake-up is missed.
    pub poll_interval: Duration,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

enum Resolved {
    Ready(PathBuf),
    Claimed(BlockRecord),
}

pub struct RetrievalPipeline {
    source: Arc<dyn ObjectRangeSource>,
    store: Arc<MetadataStore>,
    files: LocalBlockFiles,
    options: RetrievalOptions,
}

impl RetrievalPipeline {
    pub fn new(
        source: Arc<dyn ObjectRangeSource>,
        store: Arc<MetadataStore>,
        files: LocalBlockFiles,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            source,
            store,
            files,
            options,
        }
    }

    /// Streams the decompressed block, from the local copy when there is one.
    ///
    /// While extracting, the disk write and the returned stream share a bounded
    /// buffer of a few raw chunks: a caller that stops reading without
    /// dropping the stream also stalls materialization. Dropping the stream lets
    /// the write finish on its own.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch_block(
        &self,
        block_number: u64,
        block_hash: &str,
    ) -> BlockResult<BlockStream> {
        let key = BlockKey::new(block_number, block_hash);
        let deadline = Instant::now() + self.options.wait_timeout;

        loop {
            match self.resolve(&key, deadline).await? {
                Resolved::Claimed(record) => return self.extract(key, record).await,
                Resolved::Ready(path) => match open_local(&path).await {
                    Ok(stream) => {
                        tracing::debug!("Serving block {} from {}", key, path.display());
                        return Ok(stream);
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        tracing::warn!(
                            "Cached file {} for block {} is gone, extracting again",
                            path.display(),
                            key
                        );
                        self.store.demote(&key);
                    }
                    Err(source) => return Err(BlockError::LocalIo { path, source }),
                },
            }
        }
    }

    /// Waits until the block is servable or this request owns its extraction.
    async fn resolve(&self, key: &BlockKey, deadline: Instant) -> BlockResult<Resolved> {
        loop {
            if let Some(resolved) = self.settle(key) {
                return resolved;
            }

            let notify = self.store.watch(key);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A wake-up between the first check and enable() would be lost.
            if let Some(resolved) = self.settle(key) {
                return resolved;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Gave up waiting for block {} to be extracted", key);
                return Err(BlockError::Timeout(key.clone()));
            }
            let wake_at = (now + self.options.poll_interval).min(deadline);
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    fn settle(&self, key: &BlockKey) -> Option<BlockResult<Resolved>> {
        match self.store.try_claim(key) {
            ClaimResult::Absent => Some(Err(BlockError::NotFound(key.clone()))),
            ClaimResult::Ready(record) => record
                .local_file_path()
                .map(|path| Ok(Resolved::Ready(path.to_path_buf()))),
            ClaimResult::Claimed(record) => Some(Ok(Resolved::Claimed(record))),
            ClaimResult::InProgress => None,
        }
    }

    async fn extract(&self, key: BlockKey, record: BlockRecord) -> BlockResult<BlockStream> {
        let guard = ClaimGuard::new(self.store.clone(), key.clone());
        tracing::info!(
            "Extracting block {} from {} [{}-{}]",
            key,
            record.container,
            record.start,
            record.end
        );

        let upstream = self
            .source
            .fetch_range_stream(&record.container, record.start, record.end)
            .await?;

        let (tx, mut rx) = mpsc::channel(TEE_CAPACITY);
        tokio::spawn(materialize(upstream, tx, guard, self.files.clone(), record));

        // Hold the stream back until something decodes, so an unreadable range
        // still gets a proper error instead of a broken body.
        let corrupt = |source| BlockError::Corrupt {
            key: key.clone(),
            source,
        };
        let mut decoder = GzipChunkDecoder::new();
        let mut first = Bytes::new();
        while first.is_empty() {
            match rx.recv().await {
                Some(Ok(chunk)) => first = decoder.push(&chunk).map_err(corrupt)?,
                Some(Err(err)) => return Err(err),
                None => {
                    let tail = decoder.finish().map_err(corrupt)?;
                    let whole = futures::stream::once(async move { Ok::<_, io::Error>(tail) });
                    return Ok(whole.boxed());
                }
            }
        }

        Ok(decoded_stream(first, decoder, rx).boxed())
    }
}

async fn open_local(path: &Path) -> io::Result<BlockStream> {
    let file = tokio::fs::File::open(path).await?;
    Ok(ReaderStream::new(file).boxed())
}

fn decoded_stream(
    first: Bytes,
    mut decoder: GzipChunkDecoder,
    mut rx: mpsc::Receiver<BlockResult<Bytes>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        if !first.is_empty() {
            yield first;
        }
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(io::Error::other)?;
            let decoded = decoder.push(&chunk)?;
            if !decoded.is_empty() {
                yield decoded;
            }
        }
        let tail = decoder.finish()?;
        if !tail.is_empty() {
            yield tail;
        }
    }
}

/// Background half of the tee. Owns the claim until the file is in place.
async fn materialize(
    upstream: RangeStream,
    tx: mpsc::Sender<BlockResult<Bytes>>,
    guard: ClaimGuard,
    files: LocalBlockFiles,
    record: BlockRecord,
) {
    let key = guard.key.clone();
    let number = key.block_number();
    let partial = files.partial_path_for(number);
    let mut caller = Some(tx);

    let written = match write_partial(&key, upstream, &mut caller, &partial).await {
        Ok(()) => files
            .promote(&partial, number)
            .await
            .map_err(BlockError::local_io(&partial)),
        Err(err) => Err(err),
    };

    match written {
        Ok(path) => {
            tracing::info!("Block {} materialized at {}", key, path.display());
            guard.complete(path, record);
        }
        Err(err) => {
            tracing::error!("Failed to materialize block {}: {}", key, err);
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Could not remove {}: {}", partial.display(), e);
                }
            }
            drop(guard);
            if let Some(tx) = caller {
                let _ = tx.send(Err(err)).await;
            }
        }
    }
}

async fn write_partial(
    key: &BlockKey,
    mut upstream: RangeStream,
    caller: &mut Option<mpsc::Sender<BlockResult<Bytes>>>,
    partial: &Path,
) -> BlockResult<()> {
    let corrupt = |source| BlockError::Corrupt {
        key: key.clone(),
        source,
    };

    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(BlockError::local_io(partial))?;
    let mut decoder = GzipChunkDecoder::new();

    while let Some(chunk) = upstream.next().await {
        let chunk = chunk?;

        let caller_gone = match caller.as_ref() {
            Some(tx) => tx.send(Ok(chunk.clone())).await.is_err(),
            None => false,
        };
        if caller_gone {
            tracing::debug!("Caller of block {} went away, finishing in background", key);
            *caller = None;
        }

        let decoded = decoder.push(&chunk).map_err(corrupt)?;
        file.write_all(&decoded)
            .await
            .map_err(BlockError::local_io(partial))?;
    }

    let tail = decoder.finish().map_err(corrupt)?;
    file.write_all(&tail)
        .await
        .map_err(BlockError::local_io(partial))?;
    file.sync_all().await.map_err(BlockError::local_io(partial))?;

    Ok(())
}

/// Releases the claim unless the extraction completed.
struct ClaimGuard {
    store: Arc<MetadataStore>,
    key: BlockKey,
    armed: bool,
}

impl ClaimGuard {
    fn new(store: Arc<MetadataStore>, key: BlockKey) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    fn complete(mut self, path: PathBuf, fallback: BlockRecord) {
        self.armed = false;
        self.store.complete(&self.key, path, fallback);
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Releasing claim on block {}", self.key);
            self.store.release(&self.key);
        }
    }
}

/// Incremental gzip decoding over arbitrarily split input.
struct GzipChunkDecoder {
    inner: GzDecoder<Vec<u8>>,
}

impl GzipChunkDecoder {
    fn new() -> Self {
        Self {
            inner: GzDecoder::new(Vec::new()),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(chunk)?;
        Ok(self.take())
    }

    /// Fails if the gzip trailer never arrived.
    fn finish(mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(self.take())
    }

    fn take(&mut self) -> Bytes {
        Bytes::from(std::mem::take(self.inner.get_mut()))
    }
}
