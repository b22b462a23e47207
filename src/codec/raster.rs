//! Pure-Rust codec built on the `image` crate.

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use stillforged_common::{Error, Result, TargetFormat};

use super::{ImageCodec, ImageInfo};

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 8;

/// Source formats accepted for conversion.
fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

/// Codec for raster images, encoding to one [`TargetFormat`].
///
/// WebP output uses the lossless encoder shipped with `image`, so quality
/// only affects AVIF and JPEG output.
#[derive(Debug, Clone, Copy)]
pub struct RasterCodec {
    target: TargetFormat,
}

impl RasterCodec {
    pub fn new(target: TargetFormat) -> Self {
        Self { target }
    }

    fn decode(&self, data: &[u8]) -> Result<(ImageFormat, DynamicImage)> {
        let format = image::guess_format(data)
            .map_err(|_| Error::unsupported("unrecognized image data"))?;
        if format_name(format).is_none() {
            return Err(Error::unsupported(format!("{:?}", format).to_lowercase()));
        }

        let img = image::load_from_memory_with_format(data, format)
            .map_err(|e| Error::corrupted(e.to_string()))?;
        Ok((format, img))
    }
}

impl ImageCodec for RasterCodec {
    fn target_format(&self) -> TargetFormat {
        self.target
    }

    fn decode_and_validate(&self, data: &[u8]) -> Result<ImageInfo> {
        let (format, img) = self.decode(data)?;
        Ok(ImageInfo {
            format: format_name(format).unwrap_or("unknown").to_string(),
            width: img.width(),
            height: img.height(),
        })
    }

    fn encode(&self, data: &[u8], quality: u8) -> Result<Vec<u8>> {
        let (_, img) = self.decode(data)?;
        let quality = quality.clamp(1, 100);
        let mut buf = Vec::new();

        let encoded = match self.target {
            TargetFormat::Webp => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
            }
            TargetFormat::Avif => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                    &mut buf, AVIF_SPEED, quality,
                ))
            }
            TargetFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            }
        };

        encoded.map_err(|e| Error::internal(format!("Failed to encode {}: {}", self.target, e)))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 20) as u8, (y * 30) as u8, 128])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_validate_png() {
        let codec = RasterCodec::new(TargetFormat::Webp);
        let info = codec.decode_and_validate(&png_bytes(8, 6)).unwrap();
        assert_eq!(
            info,
            ImageInfo {
                format: "png".to_string(),
                width: 8,
                height: 6
            }
        );
    }

    #[test]
    fn test_unrecognized_data_is_unsupported() {
        let codec = RasterCodec::new(TargetFormat::Webp);
        let err = codec.decode_and_validate(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_truncated_png_is_corrupted() {
        let codec = RasterCodec::new(TargetFormat::Webp);
        let png = png_bytes(16, 16);
        let err = codec.decode_and_validate(&png[..40]).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
        assert!(err.is_data_error());
    }

    #[test]
    fn test_encode_webp() {
        let codec = RasterCodec::new(TargetFormat::Webp);
        let webp = codec.encode(&png_bytes(8, 8), 80).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(image::guess_format(&webp).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_encode_jpeg_with_quality() {
        let codec = RasterCodec::new(TargetFormat::Jpeg);
        let png = png_bytes(32, 32);
        let low = codec.encode(&png, 10).unwrap();
        let high = codec.encode(&png, 95).unwrap();
        assert_eq!(image::guess_format(&low).unwrap(), ImageFormat::Jpeg);
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_encode_rejects_corrupted_input() {
        let codec = RasterCodec::new(TargetFormat::Jpeg);
        let png = png_bytes(16, 16);
        assert!(codec.encode(&png[..40], 80).unwrap_err().is_data_error());
    }
}
