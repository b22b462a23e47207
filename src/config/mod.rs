mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use stillforged_ledger::{ConversionLedger, LedgerPaths};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./stillforged.toml",
        "./config.toml",
        "~/.config/stillforged/config.toml",
        "/etc/stillforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.store.bucket.trim().is_empty() {
        anyhow::bail!("Store bucket cannot be empty");
    }

    if !config.store.root.is_dir() {
        anyhow::bail!(
            "Store root does not exist or is not a directory: {:?}",
            config.store.root
        );
    }

    let quality = config.conversion.quality;
    if !(1..=100).contains(&quality) {
        anyhow::bail!("Conversion quality must be between 1 and 100, got {}", quality);
    }

    if config.conversion.concurrency == 0 {
        anyhow::bail!("Conversion concurrency must be at least 1");
    }

    if config.conversion.extensions.is_empty() {
        anyhow::bail!("At least one source extension must be configured");
    }

    if config.ledger.batch_size == 0 {
        anyhow::bail!("Ledger batch size must be at least 1");
    }

    if config.server.enabled && config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let bucket_dir = config.store.root.join(&config.store.bucket);
    if !bucket_dir.is_dir() {
        tracing::warn!("Bucket directory does not exist yet: {:?}", bucket_dir);
    }

    Ok(())
}

impl Config {
    /// Ledger file locations.
    pub fn ledger_paths(&self) -> LedgerPaths {
        let paths = LedgerPaths::new(&self.ledger.path);
        match &self.ledger.journal_path {
            Some(journal) => paths.with_journal(journal),
            None => paths,
        }
    }

    /// Open the ledger for a run. Dry runs get a read-only handle.
    pub fn open_ledger(&self) -> ConversionLedger {
        if self.conversion.dry_run {
            ConversionLedger::read_only(self.ledger_paths())
        } else {
            ConversionLedger::with_batch_size(self.ledger_paths(), self.ledger.batch_size)
        }
    }
}

impl ConversionConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }
}
