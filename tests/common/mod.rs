//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an in-memory object store, an
//! on-disk ledger in a temp directory, and a config tuned for fast runs.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use stillforged::codec::RasterCodec;
use stillforged::config::Config;
use stillforged::conversion::ConversionService;
use stillforged::store::MemoryObjectStore;
use stillforged_ledger::ConversionLedger;
use tempfile::TempDir;

pub const BUCKET: &str = "images";

/// Temp directory, memory store, and config shared by one test.
pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<MemoryObjectStore>,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.store.root = dir.path().to_path_buf();
        config.store.bucket = BUCKET.to_string();
        config.conversion.dispatch_delay_ms = 0;
        config.conversion.concurrency = 3;
        config.ledger.path = dir.path().join("converted-images.json");

        Self {
            dir,
            store: Arc::new(MemoryObjectStore::new()),
            config,
        }
    }

    /// A fresh ledger handle over this harness's files, as a new process
    /// would open it.
    pub fn ledger(&self) -> ConversionLedger {
        ConversionLedger::with_batch_size(self.config.ledger_paths(), self.config.ledger.batch_size)
    }

    /// A service over the memory store and a fresh ledger handle, opened
    /// the way the CLI opens it.
    pub fn service(&self) -> ConversionService {
        ConversionService::new(
            &self.config,
            self.store.clone(),
            Arc::new(RasterCodec::new(self.config.conversion.target_format)),
            self.config.open_ledger(),
        )
    }

    /// Store a small valid PNG under `key`.
    pub fn put_png(&self, key: &str) -> usize {
        let png = png_bytes(16, 12);
        let len = png.len();
        self.store.put(BUCKET, key, png);
        len
    }
}

/// Encode a gradient image as PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 13 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("failed to encode png");
    buf
}
