use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "BLOCKVAULT_PORT", default = "6001")]
    pub port: u16,
    #[envconfig(from = "BLOCKVAULT_HOST", default = "0.0.0.0")]
    pub host: String,
    #[envconfig(from = "BLOCKVAULT_LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Directory holding the decompressed `uncompressed-{number}.json` files
    #[envconfig(from = "FILES_DIRECTORY_PATH", default = "./files")]
    pub files_directory_path: PathBuf,

    #[envconfig(from = "BLOCKVAULT_S3_ENABLED", default = "true")]
    pub s3_enabled: bool,
    #[envconfig(from = "AWS_S3_BUCKET_NAME")]
    pub s3_bucket: Option<String>,
    #[envconfig(from = "AWS_S3_BUCKET_PREFIX", default = "")]
    pub s3_prefix: String,
    /// Root of the container store when S3 is disabled
    #[envconfig(from = "BLOCKVAULT_LOCAL_STORE_PATH", default = "./data/containers")]
    pub local_store_path: PathBuf,

    #[envconfig(from = "BLOCKVAULT_CACHE_MAX_ENTRIES", default = "10000")]
    pub cache_max_entries: u64,
    #[envconfig(from = "BLOCKVAULT_CACHE_TTL_SECS", default = "600")]
    pub cache_ttl_secs: u64,
    #[envconfig(from = "BLOCKVAULT_REFRESH_INTERVAL_SECS", default = "300")]
    pub refresh_interval_secs: u64,
    #[envconfig(from = "BLOCKVAULT_WAIT_TIMEOUT_MS", default = "5000")]
    pub wait_timeout_ms: u64,
    #[envconfig(from = "BLOCKVAULT_POLL_INTERVAL_MS", default = "100")]
    pub poll_interval_ms: u64,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}
