use std::{path::PathBuf, sync::Arc};

use blockvault_config::Config;
use blockvault_object_storage::ObjectRangeSource;
use parking_lot::Mutex;

use crate::{
    catalog::{CatalogOptions, CatalogRefresher, RefreshSummary, RefresherHandle},
    error::BlockResult,
    files::LocalBlockFiles,
    retrieval::{BlockStream, RetrievalOptions, RetrievalPipeline},
    store::{MetadataStore, MetadataStoreOptions},
};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub files_directory: PathBuf,
    pub store: MetadataStoreOptions,
    pub catalog: CatalogOptions,
    pub retrieval: RetrievalOptions,
}

impl RuntimeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            files_directory: config.files_directory_path.clone(),
            store: MetadataStoreOptions {
                max_entries: config.cache_max_entries,
                time_to_live: config.cache_ttl(),
            },
            catalog: CatalogOptions {
                prefix: config.s3_prefix.clone(),
                interval: config.refresh_interval(),
            },
            retrieval: RetrievalOptions {
                wait_timeout: config.wait_timeout(),
                poll_interval: config.poll_interval(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CatalogStats {
    /// Records currently held by the metadata store.
    pub entries: u64,
    pub last_refresh: Option<RefreshSummary>,
}

/// Everything a running instance shares between requests: one metadata
/// store, the retrieval pipeline and the background catalog refresher.
pub struct Runtime {
    store: Arc<MetadataStore>,
    pipeline: RetrievalPipeline,
    refresher: Arc<CatalogRefresher>,
    refresher_handle: Mutex<Option<RefresherHandle>>,
}

impl Runtime {
    /// Creates the cache directory and starts the catalog refresher, whose
    /// first cycle runs right away.
    pub async fn new(
        options: RuntimeOptions,
        source: Arc<dyn ObjectRangeSource>,
    ) -> anyhow::Result<Self> {
        let files = LocalBlockFiles::new(options.files_directory);
        files.ensure_dir().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to create files directory {}: {}",
                files.dir().display(),
                e
            )
        })?;

        let store = Arc::new(MetadataStore::new(options.store));
        let pipeline = RetrievalPipeline::new(
            source.clone(),
            store.clone(),
            files.clone(),
            options.retrieval,
        );
        let refresher = Arc::new(CatalogRefresher::new(
            source,
            store.clone(),
            files,
            options.catalog,
        ));
        let handle = refresher.spawn();

        Ok(Self {
            store,
            pipeline,
            refresher,
            refresher_handle: Mutex::new(Some(handle)),
        })
    }

    pub async fn fetch_block(&self, block_number: u64, block_hash: &str) -> BlockResult<BlockStream> {
        self.pipeline.fetch_block(block_number, block_hash).await
    }

    pub fn catalog_stats(&self) -> CatalogStats {
        CatalogStats {
            entries: self.store.entry_count(),
            last_refresh: self.refresher.last_summary(),
        }
    }

    /// Stops the background refresher. Further calls are no-ops.
    pub async fn shutdown(&self) {
        let handle = self.refresher_handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}
