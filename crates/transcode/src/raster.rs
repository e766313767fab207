//! Image transcoding and format sniffing.

use crate::TransformParameters;
use crate::error::{ErrorKind, Result};
use crate::worker::Transcoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Formats passed through untouched because re-encoding would drop frames.
pub fn is_animated(bytes: &[u8]) -> bool {
    match sniff(bytes) {
        Some(ImageFormat::Gif) => true,
        Some(ImageFormat::WebP) => is_animated_webp(bytes),
        Some(ImageFormat::Png) => is_animated_png(bytes),
        _ => false,
    }
}

/// Detect an image format from its magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// MIME type for image bytes, if they are a recognised image.
pub fn content_type(bytes: &[u8]) -> Option<&'static str> {
    sniff(bytes).map(|format| format.to_mime_type())
}

// RIFF....WEBPVP8X, flags byte directly after the chunk header.
fn is_animated_webp(bytes: &[u8]) -> bool {
    const ANIMATION: u8 = 0x02;
    bytes.len() > 20 && &bytes[12..16] == b"VP8X" && bytes[20] & ANIMATION != 0
}

// APNG: an acTL chunk must appear before the first IDAT.
fn is_animated_png(bytes: &[u8]) -> bool {
    let mut offset: usize = 8;
    while let Some(header) = offset.checked_add(8).and_then(|end| bytes.get(offset..end)) {
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        match &header[4..8] {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {},
        }
        // length + type + data + crc
        offset = match length.checked_add(12).and_then(|chunk| offset.checked_add(chunk)) {
            Some(next) => next,
            None => return false,
        };
    }
    false
}

/// Still-image transcoder backed by the `image` crate.
///
/// - `maxDimension` shrinks the image (aspect ratio preserved) only when the
///   longest side exceeds it; images are never upscaled.
/// - `quality` re-encodes to JPEG at that quality.
/// - Without `quality` the source format is kept where an encoder exists,
///   and PNG is used otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTranscoder;

impl ImageTranscoder {
    fn decode(data: &[u8]) -> Result<(DynamicImage, ImageFormat)> {
        let format = sniff(data).ok_or_else(|| ErrorKind::TranscodeFailed("unrecognised image format".to_string()))?;
        let image = image::load_from_memory_with_format(data, format)
            .map_err(|e| ErrorKind::TranscodeFailed(format!("decode failed: {e}")))?;
        Ok((image, format))
    }

    fn encode(image: &DynamicImage, source: ImageFormat, params: &TransformParameters) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        match params.quality() {
            Some(quality) => {
                let rgb = image.to_rgb8();
                // The JPEG encoder's scale starts at 1.
                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.max(1));
                encoder
                    .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8.into())
                    .map_err(|e| ErrorKind::TranscodeFailed(format!("JPEG encode failed: {e}")))?;
            },
            None => {
                let format = match source {
                    ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP => source,
                    _ => ImageFormat::Png,
                };
                image
                    .write_to(&mut out, format)
                    .map_err(|e| ErrorKind::TranscodeFailed(format!("{format:?} encode failed: {e}")))?;
            },
        }
        Ok(out.into_inner())
    }
}

impl Transcoder for ImageTranscoder {
    fn transcode(&self, source: &Path, params: &TransformParameters) -> Result<Vec<u8>> {
        let data = std::fs::read(source).map_err(|e| ErrorKind::TranscodeFailed(format!("read failed: {e}")))?;
        let (mut image, format) = Self::decode(&data)?;
        if let Some(max) = params.max_dimension()
            && image.width().max(image.height()) > max
        {
            image = image.resize(max, max, FilterType::Lanczos3);
        }
        Self::encode(&image, format, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn transcode(data: &[u8], quality: Option<u32>, max: Option<u32>) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source");
        std::fs::write(&path, data).unwrap();
        ImageTranscoder.transcode(&path, &TransformParameters::new(quality, max).unwrap())
    }

    #[test]
    fn test_quality_encodes_jpeg() {
        let out = transcode(&png(16, 8), Some(70), None).unwrap();
        assert_eq!(sniff(&out), Some(ImageFormat::Jpeg));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_max_dimension_shrinks_longest_side() {
        let out = transcode(&png(200, 100), None, Some(50)).unwrap();
        assert_eq!(sniff(&out), Some(ImageFormat::Png));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn test_max_dimension_never_upscales() {
        let out = transcode(&png(20, 10), None, Some(400)).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn test_garbage_fails() {
        let err = transcode(b"definitely not an image", Some(50), None).unwrap_err();
        assert!(matches!(&*err, ErrorKind::TranscodeFailed(_)));
    }

    #[test]
    fn test_missing_source_fails() {
        let err = ImageTranscoder.transcode(Path::new("/nonexistent/source"), &TransformParameters::default());
        assert!(matches!(&*err.unwrap_err(), ErrorKind::TranscodeFailed(_)));
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(content_type(&png(1, 1)), Some("image/png"));
        assert_eq!(content_type(b"<html></html>"), None);
        assert!(is_animated(b"GIF89a\x01\x00\x01\x00"));
        assert!(!is_animated(&png(2, 2)));
    }

    #[test]
    fn test_animated_png() {
        let mut apng = b"\x89PNG\r\n\x1a\n".to_vec();
        // IHDR (13 bytes of data), then acTL.
        apng.extend_from_slice(&13u32.to_be_bytes());
        apng.extend_from_slice(b"IHDR");
        apng.extend_from_slice(&[0; 13 + 4]);
        apng.extend_from_slice(&8u32.to_be_bytes());
        apng.extend_from_slice(b"acTL");
        apng.extend_from_slice(&[0; 8 + 4]);
        assert!(is_animated_png(&apng));
        assert!(!is_animated_png(&png(2, 2)));
    }

    #[test]
    fn test_png_with_oversized_chunk_length() {
        let mut truncated = b"\x89PNG\r\n\x1a\n".to_vec();
        truncated.extend_from_slice(&u32::MAX.to_be_bytes());
        truncated.extend_from_slice(b"tEXt");
        assert!(!is_animated_png(&truncated));
    }

    #[test]
    fn test_animated_webp() {
        let mut webp = b"RIFF\0\0\0\0WEBPVP8X".to_vec();
        webp.extend_from_slice(&[10, 0, 0, 0, 0x02, 0, 0, 0]);
        assert!(is_animated_webp(&webp));
        webp[20] = 0;
        assert!(!is_animated_webp(&webp));
    }
}
