//! MIME type resolution
//!
//! Remote keys are resolved purely by extension. Content sniffing is only
//! attempted when the path happens to name an existing local file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Content type used when nothing more specific is known
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Number of leading bytes inspected when sniffing a local file
const SNIFF_LEN: usize = 512;

/// Magic number signatures, checked in order
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"ID3", "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    (b"fLaC", "audio/flac"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
    (b"\x00asm", "application/wasm"),
];

/// Look up the MIME type for a path's extension
///
/// When the table lists several types for an extension the first one wins.
pub fn from_extension(path: &str) -> Option<&'static str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    mime_guess::from_ext(ext).first_raw()
}

/// Resolve the MIME type for a path
///
/// Falls back to sniffing only when `path` is an existing local file, and to
/// [`DEFAULT_MIMETYPE`] otherwise.
pub fn detect(path: &str) -> String {
    if let Some(mimetype) = from_extension(path) {
        return mimetype.to_string();
    }

    let local = Path::new(path);
    if local.is_file() {
        if let Some(mimetype) = sniff_file(local) {
            return mimetype.to_string();
        }
    }

    DEFAULT_MIMETYPE.to_string()
}

fn sniff_file(path: &Path) -> Option<&'static str> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)
        .ok()?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .ok()?;
    sniff(&head)
}

/// Guess a MIME type from leading content bytes
pub fn sniff(head: &[u8]) -> Option<&'static str> {
    if head.is_empty() {
        return None;
    }

    if let Some((_, mimetype)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Some(*mimetype);
    }

    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    // A truncated multi-byte sequence at the end of the sample is still text
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok()?,
        Err(_) => return None,
    };

    if text.contains('\0') {
        return None;
    }
    Some("text/plain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_table() {
        assert_eq!(from_extension("notes/todo.txt"), Some("text/plain"));
        assert_eq!(from_extension("img/logo.png"), Some("image/png"));
        assert_eq!(from_extension("data.json"), Some("application/json"));
        assert_eq!(from_extension("index.html"), Some("text/html"));
        assert_eq!(from_extension("clip.mp4"), Some("video/mp4"));
        assert_eq!(from_extension("UPPER.PDF"), Some("application/pdf"));
    }

    #[test]
    fn test_no_extension() {
        assert_eq!(from_extension("Makefile"), None);
        assert_eq!(from_extension("dir.d/Makefile"), None);
        assert_eq!(from_extension(".bashrc"), None);
        assert_eq!(from_extension("trailing."), None);
    }

    #[test]
    fn test_detect_remote_defaults_to_binary() {
        assert_eq!(detect("no/such/local/file"), DEFAULT_MIMETYPE);
        assert_eq!(detect("weird.unknownext"), DEFAULT_MIMETYPE);
        assert_eq!(detect("notes/todo.txt"), "text/plain");
    }

    #[test]
    fn test_detect_sniffs_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(detect(&path), "image/png");
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff(b"plain old text"), Some("text/plain"));
        assert_eq!(sniff(b"caf\xc3"), Some("text/plain"));
        assert_eq!(sniff(b"\0\x01\x02binary"), None);
        assert_eq!(sniff(b""), None);
    }
}
