//! Re-encoding of legacy/lossy sources into the canonical lossless format.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageFormat;

use crate::types::{HarvestError, HarvestResult};
use crate::validate::ImageKind;

/// Bring downloaded bytes into a storable form.
///
/// Already-canonical rasters are returned untouched. WebP is decoded to RGB
/// and re-encoded as an optimized PNG.
pub fn normalize(bytes: Vec<u8>, kind: ImageKind) -> HarvestResult<Vec<u8>> {
    match kind {
        ImageKind::WebP => webp_to_png(&bytes),
        _ => Ok(bytes),
    }
}

fn webp_to_png(bytes: &[u8]) -> HarvestResult<Vec<u8>> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::WebP)
        .map_err(|e| HarvestError::FormatConversion(format!("WebP decode failed: {e}")))?;

    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buf),
        CompressionType::Best,
        FilterType::Adaptive,
    );
    rgb.write_with_encoder(encoder)
        .map_err(|e| HarvestError::FormatConversion(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView};

    fn make_webp(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Vec::new();
        let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
        img.write_with_encoder(encoder).unwrap();
        buf
    }

    #[test]
    fn test_webp_becomes_png() {
        let out = normalize(make_webp(8, 4), ImageKind::WebP).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let loaded = image::load_from_memory(&out).unwrap();
        assert_eq!(loaded.dimensions(), (8, 4));
    }

    #[test]
    fn test_other_formats_untouched() {
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(normalize(bytes.clone(), ImageKind::Jpeg).unwrap(), bytes);
    }

    #[test]
    fn test_corrupt_webp_is_conversion_error() {
        let err = normalize(b"RIFF\0\0\0\0WEBPjunk".to_vec(), ImageKind::WebP).unwrap_err();
        assert!(matches!(err, HarvestError::FormatConversion(_)));
    }
}
