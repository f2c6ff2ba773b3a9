use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use object_store::{
    aws::{AmazonS3, AmazonS3Builder},
    local::LocalFileSystem,
    ObjectStore,
};

pub mod error;
pub mod range_source;

pub use error::{StorageError, StorageResult};
pub use range_source::{ContainerObject, ObjectRangeSource, ObjectStoreRangeSource, RangeStream};

/// Where the container files live.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Credentials and region come from the usual `AWS_*` environment variables.
    S3 { bucket: String },
    /// Development fallback rooted at a local directory.
    LocalFileSystem { root: PathBuf },
}

impl StoreBackend {
    pub fn from_config(config: &blockvault_config::Config) -> Result<Self, StorageError> {
        if config.s3_enabled {
            let bucket = config.s3_bucket.clone().ok_or_else(|| {
                StorageError::InitializationError("S3 bucket name not configured".to_string())
            })?;
            Ok(StoreBackend::S3 { bucket })
        } else {
            Ok(StoreBackend::LocalFileSystem {
                root: config.local_store_path.clone(),
            })
        }
    }
}

pub fn build_object_store(backend: &StoreBackend) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match backend {
        StoreBackend::S3 { bucket } => {
            tracing::info!("Using S3 object store for containers in bucket {}", bucket);
            Ok(Arc::new(s3_object_store(bucket)?))
        }
        StoreBackend::LocalFileSystem { root } => {
            tracing::info!(
                "Using LocalFileSystem object store for containers at {}",
                root.display()
            );
            Ok(Arc::new(local_fs_object_store(root)?))
        }
    }
}

/// Convenience for the binary: build the store and wrap it as a range source.
pub fn build_range_source(
    backend: &StoreBackend,
) -> Result<Arc<dyn ObjectRangeSource>, StorageError> {
    let store = build_object_store(backend)?;
    Ok(Arc::new(ObjectStoreRangeSource::new(store)))
}

fn s3_object_store(bucket_name: &str) -> Result<AmazonS3, StorageError> {
    AmazonS3Builder::from_env()
        .with_allow_http(true)
        .with_bucket_name(bucket_name)
        .build()
        .map_err(|e| {
            StorageError::InitializationError(format!("Failed to build S3 object store: {}", e))
        })
}

fn local_fs_object_store(root: &Path) -> Result<LocalFileSystem, StorageError> {
    std::fs::create_dir_all(root).map_err(|e| {
        StorageError::InitializationError(format!(
            "Failed to create local store directory {}: {}",
            root.display(),
            e
        ))
    })?;
    LocalFileSystem::new_with_prefix(root).map_err(|e| {
        StorageError::InitializationError(format!("Failed to create LocalFileSystem: {}", e))
    })
}
