//! Periodic rebuild of the block catalog from the container headers.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use blockvault_container::{
    decode_header, layout::HEADER_PREFIX_LEN, peek_header_length, ContainerHeader,
};
use blockvault_object_storage::ObjectRangeSource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{BlockError, BlockResult},
    files::LocalBlockFiles,
    record::{BlockKey, BlockRecord, BlockState},
    store::MetadataStore,
};

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Object key prefix under which containers are listed.
    pub prefix: String,
    pub interval: Duration,
}

/// Result of one successful catalog cycle.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct RefreshSummary {
    pub containers: usize,
    pub blocks: usize,
    pub materialized: usize,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Completed(RefreshSummary),
    /// Another cycle is running or one started too recently.
    Skipped,
    Failed(BlockError),
}

pub struct CatalogRefresher {
    source: Arc<dyn ObjectRangeSource>,
    store: Arc<MetadataStore>,
    files: LocalBlockFiles,
    options: CatalogOptions,
    running: AtomicBool,
    last_started: Mutex<Option<Instant>>,
    last_summary: Mutex<Option<RefreshSummary>>,
}

/// Clears the in-flight flag even if a cycle unwinds.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CatalogRefresher {
    pub fn new(
        source: Arc<dyn ObjectRangeSource>,
        store: Arc<MetadataStore>,
        files: LocalBlockFiles,
        options: CatalogOptions,
    ) -> Self {
        Self {
            source,
            store,
            files,
            options,
            running: AtomicBool::new(false),
            last_started: Mutex::new(None),
            last_summary: Mutex::new(None),
        }
    }

    pub fn last_summary(&self) -> Option<RefreshSummary> {
        self.last_summary.lock().clone()
    }

    /// Cycles closer together than this are skipped.
    fn min_gap(&self) -> Duration {
        self.options.interval.mul_f64(0.9)
    }

    /// Runs a cycle unless one is in flight or the previous one started less
    /// than 90% of the interval ago. Failures are logged here and go no further.
    pub async fn refresh_if_due(&self) -> RefreshOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Catalog refresh already running, skipping");
            return RefreshOutcome::Skipped;
        }
        let _running = RunningGuard(&self.running);

        {
            let mut last_started = self.last_started.lock();
            if let Some(at) = *last_started {
                if at.elapsed() < self.min_gap() {
                    tracing::debug!("Catalog refreshed {:?} ago, skipping", at.elapsed());
                    return RefreshOutcome::Skipped;
                }
            }
            *last_started = Some(Instant::now());
        }

        match self.refresh_once().await {
            Ok(summary) => {
                tracing::info!(
                    "Catalog refreshed: {} blocks ({} on disk) from {} containers in {} ms",
                    summary.blocks,
                    summary.materialized,
                    summary.containers,
                    summary.elapsed_ms
                );
                *self.last_summary.lock() = Some(summary.clone());
                RefreshOutcome::Completed(summary)
            }
            Err(err) => {
                tracing::error!("Catalog refresh failed, keeping previous catalog: {}", err);
                RefreshOutcome::Failed(err)
            }
        }
    }

    /// One full cycle: list, snapshot local files, read every header, publish.
    /// The first container that cannot be read aborts the cycle before anything
    /// is published.
    pub async fn refresh_once(&self) -> BlockResult<RefreshSummary> {
        let started = Instant::now();

        let containers = self.source.list_containers(&self.options.prefix).await?;
        let on_disk = self
            .files
            .snapshot()
            .await
            .map_err(BlockError::local_io(self.files.dir()))?;

        let mut batch = Vec::new();
        let mut materialized = 0;

        for container in &containers {
            let header = self.read_header(&container.key).await?;
            tracing::debug!("Container {} holds {} blocks", container.key, header.block_count());

            for entry in header.entries {
                let state = if on_disk.contains(&entry.block_number) {
                    materialized += 1;
                    BlockState::Materialized(self.files.path_for(entry.block_number))
                } else {
                    BlockState::Located
                };
                let record = BlockRecord::located(container.key.clone(), entry.start, entry.end)
                    .with_state(state);
                batch.push((BlockKey::new(entry.block_number, entry.block_hash), record));
            }
        }

        let blocks = batch.len();
        self.store.publish(batch);
        self.store.prune_watchers();

        Ok(RefreshSummary {
            containers: containers.len(),
            blocks,
            materialized,
            elapsed_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        })
    }

    /// Two ranged reads: the fixed prefix, then exactly the announced header.
    async fn read_header(&self, key: &str) -> BlockResult<ContainerHeader> {
        let malformed = |source| BlockError::MalformedHeader {
            container: key.to_string(),
            source,
        };

        let prefix = self
            .source
            .fetch_range_bytes(key, 0, HEADER_PREFIX_LEN as u64 - 1)
            .await?;
        let header_len = peek_header_length(&prefix).map_err(malformed)?;

        let bytes = if header_len as usize <= prefix.len() {
            prefix
        } else {
            self.source.fetch_range_bytes(key, 0, header_len - 1).await?
        };

        decode_header(&bytes).map_err(malformed)
    }

    /// Starts the periodic task. The first cycle runs immediately.
    pub fn spawn(self: &Arc<Self>) -> RefresherHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let refresher = Arc::clone(self);
        let period = self.options.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        refresher.refresh_if_due().await;
                    }
                }
            }
            tracing::info!("Catalog refresher stopped");
        });

        RefresherHandle { token, task }
    }
}

pub struct RefresherHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Stops the periodic task, waiting for a cycle in flight to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::error!("Catalog refresher task failed: {}", err);
        }
    }
}
