mod cli;

use stillforged::{
    codec::{ImageCodec, RasterCodec},
    config::{self, Config},
    conversion::ConversionService,
    server,
    store::{LocalObjectStore, ObjectStore},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use stillforged_common::TargetFormat;
use tokio_util::sync::CancellationToken;

/// Command-line overrides for a conversion run.
struct ConvertOverrides {
    prefix: Option<String>,
    dry_run: bool,
    concurrency: Option<usize>,
    quality: Option<u8>,
    format: Option<TargetFormat>,
}

impl ConvertOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(prefix) = self.prefix {
            config.store.prefix = prefix;
        }
        if self.dry_run {
            config.conversion.dry_run = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.conversion.concurrency = concurrency;
        }
        if let Some(quality) = self.quality {
            config.conversion.quality = quality;
        }
        if let Some(format) = self.format {
            config.conversion.target_format = format;
        }
    }
}

async fn convert(
    config_path: Option<&Path>,
    overrides: ConvertOverrides,
    json: bool,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    overrides.apply(&mut config);
    config::validate_config(&config)?;

    tracing::info!(
        "Converting {}/{} to {} (quality {}, concurrency {}{})",
        config.store.bucket,
        config.store.prefix,
        config.conversion.target_format,
        config.conversion.quality,
        config.conversion.concurrency,
        if config.conversion.dry_run { ", dry run" } else { "" }
    );

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.store.root));
    let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec::new(config.conversion.target_format));
    let service = ConversionService::new(&config, store, codec, config.open_ledger());

    // Stop dispatching on Ctrl+C / SIGTERM; in-flight conversions finish.
    let cancel = service.cancellation_token();
    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            server::shutdown_signal().await;
            cancel.cancel();
        }
    });

    let server_shutdown = CancellationToken::new();
    let server_handle = if config.server.enabled {
        let server_config = config.server.clone();
        let progress = service.progress();
        let shutdown = server_shutdown.clone();
        Some(tokio::spawn(async move {
            server::start_server(&server_config, progress, shutdown).await
        }))
    } else {
        None
    };

    let report = service.run(&config.store.prefix).await;

    signal_task.abort();
    server_shutdown.cancel();
    if let Some(handle) = server_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Progress server error: {:#}", e),
            Err(e) => tracing::warn!("Progress server task failed: {}", e),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    if report.is_aborted() {
        anyhow::bail!("Conversion run aborted");
    }
    if report.failed > 0 {
        anyhow::bail!("{} objects failed to convert", report.failed);
    }
    if cancel.is_cancelled() {
        anyhow::bail!("Conversion run cancelled");
    }

    Ok(())
}

async fn status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let ledger = config.open_ledger();
    let stats = ledger.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Ledger: {}", ledger.paths().primary.display());
    println!("  Converted objects: {}", stats.records);
    println!("  Awaiting compaction: {}", stats.pending);
    println!("  Original size: {} bytes", stats.total_original_size);
    println!("  Converted size: {} bytes", stats.total_converted_size);
    if stats.total_original_size > 0 {
        println!(
            "  Saved: {:.2}%",
            stillforged_common::compression_ratio(
                stats.total_original_size,
                stats.total_converted_size
            ) * 100.0
        );
    }

    Ok(())
}

async fn compact(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let ledger = config.open_ledger();

    ledger.load().await?;
    let flushed = ledger.flush().await?;
    let stats = ledger.stats().await?;

    println!(
        "✓ Ledger compacted: {} records ({} flushed)",
        stats.records, flushed
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stillforged=trace,stillforged_ledger=trace,stillforged_common=debug,tower_http=debug"
                .to_string()
        } else {
            "stillforged=debug,stillforged_ledger=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            prefix,
            dry_run,
            concurrency,
            quality,
            format,
            json,
        } => {
            let overrides = ConvertOverrides {
                prefix,
                dry_run,
                concurrency,
                quality,
                format,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(cli.config.as_deref(), overrides, json))
        }
        Commands::Status { json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(status(cli.config.as_deref(), json))
        }
        Commands::Compact => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(compact(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("stillforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Store: {:?} (bucket {})", config.store.root, config.store.bucket);
            println!("  Target format: {}", config.conversion.target_format);
            println!("  Quality: {}", config.conversion.quality);
            println!("  Concurrency: {}", config.conversion.concurrency);
            println!("  Ledger: {:?}", config.ledger.path);
            println!("  Server enabled: {}", config.server.enabled);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Store: {:?} (bucket {})", config.store.root, config.store.bucket);
            println!("  Target format: {}", config.conversion.target_format);
        }
    }

    Ok(())
}
