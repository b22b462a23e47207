use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stillforged_common::keys::image_extensions;
use stillforged_common::TargetFormat;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Directory whose subdirectories act as buckets
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Only keys starting with this prefix are converted
    #[serde(default)]
    pub prefix: String,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_bucket() -> String {
    "images".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            bucket: default_bucket(),
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub target_format: TargetFormat,

    /// Encoder quality, 1-100 (default: 80)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Maximum conversions in flight at once (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between successive dispatches, to go easy on the store (default: 100)
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,

    /// Convert without uploading or recording anything
    #[serde(default)]
    pub dry_run: bool,

    /// Also treat an object as converted when its target key exists in the store
    #[serde(default = "default_verify_target_in_store")]
    pub verify_target_in_store: bool,

    /// Source extensions considered for conversion
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_quality() -> u8 {
    80
}

fn default_concurrency() -> usize {
    4
}

fn default_dispatch_delay_ms() -> u64 {
    100
}

fn default_verify_target_in_store() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    image_extensions().iter().map(|s| s.to_string()).collect()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            target_format: TargetFormat::default(),
            quality: default_quality(),
            concurrency: default_concurrency(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            dry_run: false,
            verify_target_in_store: default_verify_target_in_store(),
            extensions: default_extensions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Primary ledger store (JSON)
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// Journal location (default: `<path>.journal`)
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// Queued records that trigger a compaction (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("./converted-images.json")
}

fn default_batch_size() -> usize {
    stillforged_ledger::DEFAULT_BATCH_SIZE
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            journal_path: None,
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Serve /health and /progress while a run is active
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}
