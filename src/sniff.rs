//! Content-based media type detection.
//!
//! The source URL's apparent extension is never trusted: the API routinely
//! serves JPEG bytes from `.png`-looking URLs and MP4 bytes from `.jpeg` ones.
//! [`sniff`] inspects the leading bytes of the payload instead.
//!
//! # Example
//!
//! ```
//! use harvester_core::sniff::{MediaKind, sniff};
//!
//! assert_eq!(sniff(b"\xff\xd8\xff\xe0\x00\x10JFIF"), MediaKind::Jpeg);
//! assert_eq!(sniff(b"hello"), MediaKind::Unknown);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of leading bytes [`sniff`] needs to recognize every supported kind.
pub const SNIFF_LEN: usize = 16;

/// Extension used for unknown payloads when the URL offers nothing usable.
pub const FALLBACK_EXTENSION: &str = "bin";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = b"\xff\xd8\xff";
const EBML_SIGNATURE: &[u8] = b"\x1a\x45\xdf\xa3";

/// ISO base media brands that identify an MP4 container.
///
/// HEIF/AVIF share the `ftyp` box but use other brands and are not MP4.
const MP4_BRANDS: &[&[u8; 4]] = &[
    b"isom", b"iso2", b"iso4", b"iso5", b"iso6", b"mp41", b"mp42", b"avc1", b"M4V ", b"dash",
    b"MSNV",
];

/// Media type determined from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// PNG image.
    Png,
    /// JPEG image.
    Jpeg,
    /// WebP image (RIFF container).
    Webp,
    /// GIF image (87a or 89a).
    Gif,
    /// MP4 video (ISO base media with a video brand).
    Mp4,
    /// WebM video (EBML container).
    Webm,
    /// Flash video.
    Flv,
    /// No known signature matched.
    Unknown,
}

impl MediaKind {
    /// Canonical file extension (without dot), `None` for [`MediaKind::Unknown`].
    #[must_use]
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Png => Some("png"),
            Self::Jpeg => Some("jpg"),
            Self::Webp => Some("webp"),
            Self::Gif => Some("gif"),
            Self::Mp4 => Some("mp4"),
            Self::Webm => Some("webm"),
            Self::Flv => Some("flv"),
            Self::Unknown => None,
        }
    }

    /// Returns true for kinds stored in the video area.
    #[must_use]
    pub fn is_video(self) -> bool {
        matches!(self, Self::Mp4 | Self::Webm | Self::Flv)
    }

    /// Returns true if the payload could not be identified.
    #[must_use]
    pub fn is_unknown(self) -> bool {
        self == Self::Unknown
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("unknown"))
    }
}

/// Determines the media kind from the first bytes of a payload.
///
/// Inputs shorter than a signature simply fail to match that signature;
/// an empty slice is [`MediaKind::Unknown`].
#[must_use]
pub fn sniff(head: &[u8]) -> MediaKind {
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        let brand = &head[8..12];
        if MP4_BRANDS.iter().any(|known| &known[..] == brand) {
            return MediaKind::Mp4;
        }
    }
    if head.starts_with(EBML_SIGNATURE) {
        return MediaKind::Webm;
    }
    if head.starts_with(b"FLV") {
        return MediaKind::Flv;
    }
    if head.starts_with(PNG_SIGNATURE) {
        return MediaKind::Png;
    }
    if head.starts_with(JPEG_SIGNATURE) {
        return MediaKind::Jpeg;
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        return MediaKind::Webp;
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return MediaKind::Gif;
    }
    MediaKind::Unknown
}

/// Best-effort extension for a payload that [`sniff`] could not identify.
///
/// Uses the last path segment of `source_url` when it carries a short
/// alphanumeric extension, else [`FALLBACK_EXTENSION`].
#[must_use]
pub fn best_effort_extension(source_url: &str) -> String {
    url::Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|segment| {
            segment
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
        })
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Normalizes a user-supplied allow-list entry (`".JPEG"` → `"jpg"`).
#[must_use]
pub fn normalize_type_name(name: &str) -> String {
    let lowered = name.trim().trim_start_matches('.').to_ascii_lowercase();
    match lowered.as_str() {
        "jpeg" | "jpe" => "jpg".to_string(),
        _ => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut bytes = prefix.to_vec();
        bytes.resize(SNIFF_LEN.max(prefix.len()), 0);
        bytes
    }

    #[test]
    fn test_sniff_images() {
        assert_eq!(sniff(&padded(b"\x89PNG\r\n\x1a\n")), MediaKind::Png);
        assert_eq!(sniff(&padded(b"\xff\xd8\xff\xdb")), MediaKind::Jpeg);
        assert_eq!(sniff(&padded(b"RIFF\x24\x00\x00\x00WEBPVP8 ")), MediaKind::Webp);
        assert_eq!(sniff(&padded(b"GIF87a")), MediaKind::Gif);
        assert_eq!(sniff(&padded(b"GIF89a")), MediaKind::Gif);
    }

    #[test]
    fn test_sniff_videos() {
        assert_eq!(sniff(&padded(b"\x00\x00\x00\x18ftypmp42")), MediaKind::Mp4);
        assert_eq!(sniff(&padded(b"\x00\x00\x00\x20ftypisom")), MediaKind::Mp4);
        assert_eq!(sniff(&padded(b"\x1a\x45\xdf\xa3\x9f")), MediaKind::Webm);
        assert_eq!(sniff(&padded(b"FLV\x01")), MediaKind::Flv);
        assert!(MediaKind::Mp4.is_video());
        assert!(MediaKind::Webm.is_video());
        assert!(!MediaKind::Png.is_video());
    }

    #[test]
    fn test_sniff_heif_is_not_mp4() {
        assert_eq!(sniff(&padded(b"\x00\x00\x00\x18ftypheic")), MediaKind::Unknown);
        assert_eq!(sniff(&padded(b"\x00\x00\x00\x18ftypavif")), MediaKind::Unknown);
    }

    #[test]
    fn test_sniff_riff_without_webp_is_unknown() {
        assert_eq!(sniff(&padded(b"RIFF\x24\x00\x00\x00WAVEfmt ")), MediaKind::Unknown);
    }

    #[test]
    fn test_sniff_short_and_empty_inputs() {
        assert_eq!(sniff(b""), MediaKind::Unknown);
        assert_eq!(sniff(b"\xff\xd8"), MediaKind::Unknown);
        assert_eq!(sniff(b"\xff\xd8\xff"), MediaKind::Jpeg);
        assert_eq!(sniff(b"RIFF"), MediaKind::Unknown);
    }

    #[test]
    fn test_sniff_ignores_text_payloads() {
        assert_eq!(sniff(b"<!DOCTYPE html><html>"), MediaKind::Unknown);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(MediaKind::Jpeg.extension(), Some("jpg"));
        assert_eq!(MediaKind::Unknown.extension(), None);
        assert_eq!(MediaKind::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_best_effort_extension_from_url() {
        assert_eq!(best_effort_extension("https://cdn.example.com/a/b/file.AVIF"), "avif");
        assert_eq!(best_effort_extension("https://cdn.example.com/a/b/file.heic?x=1"), "heic");
    }

    #[test]
    fn test_best_effort_extension_fallback() {
        assert_eq!(best_effort_extension("https://cdn.example.com/a/b/noext"), "bin");
        assert_eq!(best_effort_extension("https://cdn.example.com/a/file.tar-gz"), "bin");
        assert_eq!(best_effort_extension("https://cdn.example.com/a/file.toolongext"), "bin");
        assert_eq!(best_effort_extension("not a url"), "bin");
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name(".JPEG"), "jpg");
        assert_eq!(normalize_type_name(" png "), "png");
        assert_eq!(normalize_type_name("mp4"), "mp4");
    }
}
