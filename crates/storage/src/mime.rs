//! Content-type inference.
//!
//! Both backends infer content types themselves and never trust a type
//! declared by the uploader. The local backend goes by extension only; the
//! object-store backend sniffs the first bytes of an upload and falls back
//! to the same extension lookup.

use std::path::Path;

/// Generic fallback for unknown content.
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Content type reported for synthesized object-store directories.
pub const DIRECTORY: &str = "application/directory";
/// Content type for control-free UTF-8 content with an unknown extension.
pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Number of leading bytes inspected by [`sniff`].
pub const SNIFF_LEN: usize = 512;

const PDF_MAGIC: &[u8] = b"%PDF-";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B, 0x08];
const ID3_MAGIC: &[u8] = b"ID3";
const EBML_MAGIC: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
const RIFF_MAGIC: &[u8] = b"RIFF";

/// Look up a content type by file extension (with or without the leading
/// dot, case-insensitive).
///
/// The built-in table is authoritative for the common upload types; other
/// extensions go to the `mime_guess` database, and anything it doesn't know
/// maps to [`OCTET_STREAM`].
///
/// ```
/// use filekit_storage::mime;
/// assert_eq!(mime::from_extension(".PDF"), "application/pdf");
/// assert_eq!(mime::from_extension("json"), "application/json");
/// assert_eq!(mime::from_extension("csv"), "text/csv");
/// assert_eq!(mime::from_extension("unknown"), mime::OCTET_STREAM);
/// ```
#[must_use]
pub fn from_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" | "gzip" => "application/gzip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wav" => "audio/wav",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        other => mime_guess::from_ext(other).first_raw().unwrap_or(OCTET_STREAM),
    }
}

/// Look up a content type from the extension of a path or filename.
#[must_use]
pub fn from_path(path: impl AsRef<Path>) -> &'static str {
    path.as_ref().extension().and_then(|ext| ext.to_str()).map(from_extension).unwrap_or(OCTET_STREAM)
}

/// Detect a content type from leading magic bytes.
///
/// Only binary signatures and markup prologues are recognised; anything else
/// returns `None` so the caller can fall back to the extension table.
#[must_use]
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    let bytes = &bytes[..bytes.len().min(SNIFF_LEN)];
    let signatures: [(&[u8], &'static str); 8] = [
        (PDF_MAGIC, "application/pdf"),
        (PNG_MAGIC, "image/png"),
        (JPEG_MAGIC, "image/jpeg"),
        (GIF87_MAGIC, "image/gif"),
        (GIF89_MAGIC, "image/gif"),
        (ZIP_MAGIC, "application/zip"),
        (GZIP_MAGIC, "application/gzip"),
        (ID3_MAGIC, "audio/mpeg"),
    ];
    if let Some((_, mime)) = signatures.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        return Some(mime);
    }
    if bytes.starts_with(EBML_MAGIC) {
        return Some("video/webm");
    }
    if bytes.starts_with(RIFF_MAGIC) && bytes.len() >= 12 {
        match &bytes[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            b"AVI " => return Some("video/x-msvideo"),
            _ => {},
        }
    }
    // ISO base media: `....ftyp` box at the start of the file.
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return match &bytes[8..12] {
            b"qt  " => Some("video/quicktime"),
            _ => Some("video/mp4"),
        };
    }
    sniff_markup(bytes)
}

fn sniff_markup(bytes: &[u8]) -> Option<&'static str> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let head = &bytes[start..];
    let starts_with_ci = |prefix: &[u8]| head.len() >= prefix.len() && head[..prefix.len()].eq_ignore_ascii_case(prefix);
    if starts_with_ci(b"<?xml") {
        return Some("text/xml; charset=utf-8");
    }
    if starts_with_ci(b"<!doctype html") || starts_with_ci(b"<html") || starts_with_ci(b"<head") {
        return Some("text/html; charset=utf-8");
    }
    None
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let bytes = &bytes[..bytes.len().min(SNIFF_LEN)];
    // A multi-byte character cut off at the sniff boundary is still text.
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid && !bytes.iter().any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C))
}

/// Detect the content type of an upload.
///
/// Order: magic bytes, then the extension of the declared filename, then
/// [`PLAIN_TEXT`] for control-free UTF-8, then [`OCTET_STREAM`].
///
/// ```
/// use filekit_storage::mime;
/// assert_eq!(mime::detect(b"%PDF-1.7 ...", "upload.bin"), "application/pdf");
/// assert_eq!(mime::detect(b"{\"a\": 1}", "data.json"), "application/json");
/// assert_eq!(mime::detect(b"hello", "notes"), mime::PLAIN_TEXT);
/// ```
#[must_use]
pub fn detect(bytes: &[u8], filename: &str) -> &'static str {
    if let Some(sniffed) = sniff(bytes) {
        return sniffed;
    }
    match from_path(filename) {
        OCTET_STREAM if !bytes.is_empty() && looks_like_text(bytes) => PLAIN_TEXT,
        by_extension => by_extension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(".jpg", "image/jpeg")]
    #[case(".JPEG", "image/jpeg")]
    #[case("png", "image/png")]
    #[case(".svg", "image/svg+xml")]
    #[case(".pdf", "application/pdf")]
    #[case(".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document")]
    #[case(".xls", "application/vnd.ms-excel")]
    #[case(".txt", "text/plain")]
    #[case(".htm", "text/html")]
    #[case(".js", "application/javascript")]
    #[case(".json", "application/json")]
    #[case(".tar", "application/x-tar")]
    #[case(".gzip", "application/gzip")]
    #[case(".mov", "video/quicktime")]
    #[case(".webm", "video/webm")]
    #[case(".CSV", "text/csv")]
    #[case(".wasm", "application/wasm")]
    #[case(".unknown", OCTET_STREAM)]
    #[case("", OCTET_STREAM)]
    fn test_from_extension(#[case] ext: &str, #[case] expected: &str) {
        assert_eq!(from_extension(ext), expected);
    }

    #[rstest]
    #[case("a/b/report.pdf", "application/pdf")]
    #[case("archive.tar.gz", "application/gzip")]
    #[case("exports/q3.csv", "text/csv")]
    #[case("Makefile", OCTET_STREAM)]
    // Dotfile with no extension
    #[case(".json", OCTET_STREAM)]
    fn test_from_path(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(from_path(path), expected);
    }

    #[rstest]
    #[case(b"%PDF-1.4\n", Some("application/pdf"))]
    #[case(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR", Some("image/png"))]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0], Some("image/jpeg"))]
    #[case(b"GIF89a....", Some("image/gif"))]
    #[case(b"PK\x03\x04....", Some("application/zip"))]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Some("application/gzip"))]
    #[case(b"ID3\x04\0", Some("audio/mpeg"))]
    #[case(b"RIFF\0\0\0\0WEBPVP8 ", Some("image/webp"))]
    #[case(b"RIFF\0\0\0\0WAVEfmt ", Some("audio/wav"))]
    #[case(b"RIFF\0\0\0\0AVI LIST", Some("video/x-msvideo"))]
    #[case(b"\0\0\0\x18ftypmp42", Some("video/mp4"))]
    #[case(b"\0\0\0\x14ftypqt  ", Some("video/quicktime"))]
    #[case(&[0x1A, 0x45, 0xDF, 0xA3, 0x01], Some("video/webm"))]
    #[case(b"  <!DOCTYPE html><html>", Some("text/html; charset=utf-8"))]
    #[case(b"<?xml version=\"1.0\"?>", Some("text/xml; charset=utf-8"))]
    #[case(b"hello world", None)]
    #[case(b"", None)]
    #[case(b"RIFF", None)]
    fn test_sniff(#[case] bytes: &[u8], #[case] expected: Option<&str>) {
        assert_eq!(sniff(bytes), expected);
    }

    #[rstest]
    // Magic bytes beat a misleading extension
    #[case(b"%PDF-1.7", "invoice.txt", "application/pdf")]
    // Unrecognised content falls back to the extension table
    #[case(b"{\"key\": true}", "data.json", "application/json")]
    #[case(b"body { color: red }", "site.css", "text/css")]
    #[case(&[0x00, 0x01, 0x02], "blob.docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document")]
    // Unknown extension: text vs. binary
    #[case(b"just some words\n", "README", PLAIN_TEXT)]
    #[case(&[0x00, 0x01, 0x02, 0x03], "blob", OCTET_STREAM)]
    #[case(b"", "empty", OCTET_STREAM)]
    fn test_detect(#[case] bytes: &[u8], #[case] filename: &str, #[case] expected: &str) {
        assert_eq!(detect(bytes, filename), expected);
    }

    #[test]
    fn test_text_cut_at_sniff_boundary() {
        // 511 ASCII bytes followed by a two-byte character straddling the limit
        let mut bytes = vec![b'a'; SNIFF_LEN - 1];
        bytes.extend_from_slice("é".as_bytes());
        assert!(looks_like_text(&bytes));
    }
}
