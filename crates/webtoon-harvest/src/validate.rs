//! Byte-level image validation and canonical naming.

use std::path::Path;

/// Image families the acquisition path distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
    /// Any other `image/*` type or sniffed format; never stored.
    Other,
}

impl ImageKind {
    /// Classify a declared `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("image/png") {
            ImageKind::Png
        } else if ct.contains("image/gif") {
            ImageKind::Gif
        } else if ct.contains("image/webp") {
            ImageKind::WebP
        } else if ct.contains("image/jpeg") || ct.contains("image/jpg") {
            ImageKind::Jpeg
        } else {
            ImageKind::Other
        }
    }

    /// Classify by sniffing magic bytes, for payloads without a usable header.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Gif => Some(ImageKind::Gif),
            image::ImageFormat::WebP => Some(ImageKind::WebP),
            _ => Some(ImageKind::Other),
        }
    }

    /// MIME type used when a kind has to be declared.
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
            ImageKind::Other => "application/octet-stream",
        }
    }

    /// The kind the bytes actually are, falling back to the declared type
    /// when the magic bytes are not recognised.
    pub fn resolve(content_type: &str, bytes: &[u8]) -> Self {
        Self::sniff(bytes).unwrap_or_else(|| Self::from_content_type(content_type))
    }
}

/// Extension an asset of this kind is stored under.
///
/// WebP maps to `.png`: those sources are always re-encoded before storage.
/// `None` for kinds that are not stored at all.
pub fn canonical_extension(kind: ImageKind) -> Option<&'static str> {
    match kind {
        ImageKind::Png | ImageKind::WebP => Some(".png"),
        ImageKind::Gif => Some(".gif"),
        ImageKind::Jpeg => Some(".jpg"),
        ImageKind::Other => None,
    }
}

/// True when the first 12 bytes form a RIFF/WEBP container header.
pub fn has_webp_signature(bytes: &[u8]) -> bool {
    if !bytes.starts_with(b"RIFF") {
        return false;
    }
    let head = &bytes[..bytes.len().min(12)];
    head.windows(4).any(|w| w == b"WEBP")
}

/// Is this response really an image of its declared type?
pub fn is_real_image(content_type: &str, bytes: &[u8]) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    if !ct.starts_with("image/") {
        return false;
    }
    if ImageKind::from_content_type(&ct) == ImageKind::WebP {
        return has_webp_signature(bytes);
    }
    true
}

/// Fixed-width ordinal filename, e.g. `image_007.png`.
pub fn asset_filename(prefix: &str, ordinal: usize, extension: &str) -> String {
    format!("{prefix}_{ordinal:03}{extension}")
}

/// Whether `name` already exists inside `folder`.
pub fn filename_collides(folder: &Path, name: &str) -> bool {
    folder.join(name).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEBP_HEAD: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

    #[test]
    fn test_webp_requires_signature() {
        assert!(is_real_image("image/webp", WEBP_HEAD));
        assert!(!is_real_image("image/webp", b"\x89PNG\r\n\x1a\n\0\0\0\0"));
        assert!(!is_real_image("image/webp", b"RIFF\0\0\0\0WAVEfmt "));
        assert!(!is_real_image("image/webp", b"RIFF"));
    }

    #[test]
    fn test_content_type_must_be_image() {
        assert!(is_real_image("image/jpeg", b"\xff\xd8\xff"));
        assert!(is_real_image("Image/PNG; charset=binary", b""));
        assert!(!is_real_image("text/html; charset=utf-8", b"<html>"));
        assert!(!is_real_image("", b"\xff\xd8\xff"));
    }

    #[test]
    fn test_canonical_extensions() {
        let ext = |ct: &str| canonical_extension(ImageKind::from_content_type(ct));
        assert_eq!(ext("image/png"), Some(".png"));
        assert_eq!(ext("image/gif"), Some(".gif"));
        assert_eq!(ext("image/webp"), Some(".png"));
        assert_eq!(ext("image/jpeg"), Some(".jpg"));
        assert_eq!(ext("image/svg+xml"), None);
        assert_eq!(ext("image/avif"), None);
    }

    #[test]
    fn test_magic_bytes_override_declared_type() {
        assert_eq!(ImageKind::resolve("image/jpeg", WEBP_HEAD), ImageKind::WebP);
        assert_eq!(
            ImageKind::resolve("image/webp", b"\x89PNG\r\n\x1a\n\0\0\0\0"),
            ImageKind::Png
        );
        assert_eq!(ImageKind::resolve("image/jpeg", b"BM\0\0\0\0"), ImageKind::Other);
        assert_eq!(ImageKind::resolve("image/gif", b"unrecognised"), ImageKind::Gif);
        assert_eq!(ImageKind::resolve("image/svg+xml", b"<svg/>"), ImageKind::Other);
    }

    #[test]
    fn test_filenames_sort_in_discovery_order() {
        let names: Vec<String> = [2usize, 10, 1, 100]
            .iter()
            .map(|&n| asset_filename("image", n, ".jpg"))
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(
            sorted,
            vec!["image_001.jpg", "image_002.jpg", "image_010.jpg", "image_100.jpg"]
        );
    }

    #[test]
    fn test_collision() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!filename_collides(dir.path(), "image_001.jpg"));
        std::fs::write(dir.path().join("image_001.jpg"), b"x").unwrap();
        assert!(filename_collides(dir.path(), "image_001.jpg"));
    }
}
