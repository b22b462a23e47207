//! Image codec.
//!
//! Decoding, validation and re-encoding are CPU-bound and synchronous;
//! async callers run them on the blocking pool.

mod raster;

pub use raster::RasterCodec;

use stillforged_common::{Result, TargetFormat};

/// What validation learned about a source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Short lowercase name of the source format (e.g. `"jpeg"`).
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Decoder/encoder for a single target format.
pub trait ImageCodec: Send + Sync {
    /// Format produced by [`encode`](Self::encode).
    fn target_format(&self) -> TargetFormat;

    /// Check the bytes are a supported, decodable image.
    ///
    /// Fails with `Error::UnsupportedFormat` for formats the codec does not
    /// accept and `Error::Corrupted` for data that cannot be decoded.
    fn decode_and_validate(&self, data: &[u8]) -> Result<ImageInfo>;

    /// Re-encode the image into the target format at `quality` (1-100).
    fn encode(&self, data: &[u8], quality: u8) -> Result<Vec<u8>>;
}
