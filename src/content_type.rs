//! Content-type detection: magic bytes first, then file extension, then a default.
//!
//! Generalizes the teacher's `connector_fs::binary_content_type()` extension table with a
//! magic-byte sniff pass ahead of it, since batch ingest accepts raw byte payloads that may not
//! carry a file name at all.

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Detects content type from the leading bytes of a payload. Returns `None` when no known
/// signature matches, so the caller can fall through to extension-based detection.
pub fn sniff_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    if bytes.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    if bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04]) || bytes.starts_with(&[0x50, 0x4B, 0x05, 0x06]) {
        // Generic ZIP container signature; OOXML formats (docx/pptx/xlsx) are all zips.
        return Some("application/zip");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    if bytes.starts_with(b"\x1aE\xdf\xa3") {
        return Some("video/webm");
    }
    if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
        return Some("audio/mpeg");
    }
    None
}

/// Maps a file extension (without the leading dot, any case) to a content type.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext.to_ascii_lowercase().as_str() {
        "txt" | "md" | "markdown" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "tsx" => "text/typescript",
        "go" => "text/x-go",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "cc" | "hpp" => "text/x-c++",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => return None,
    })
}

/// Full detection pipeline: magic bytes, then extension (if a path is known), then default.
pub fn detect_content_type(bytes: &[u8], path_hint: Option<&str>) -> String {
    if let Some(ct) = sniff_magic_bytes(bytes) {
        return ct.to_string();
    }
    if let Some(path) = path_hint {
        if let Some(ext) = std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
            if let Some(ct) = content_type_for_extension(ext) {
                return ct.to_string();
            }
        }
    }
    if bytes.iter().take(1024).all(|&b| b != 0) && std::str::from_utf8(bytes).is_ok() {
        return "text/plain".to_string();
    }
    DEFAULT_CONTENT_TYPE.to_string()
}

pub fn is_text_type(content_type: &str) -> bool {
    content_type.starts_with("text/") || content_type == "application/json"
}

pub fn is_code_type(content_type: &str) -> bool {
    matches!(
        content_type,
        "text/x-rust"
            | "text/x-python"
            | "text/javascript"
            | "text/typescript"
            | "text/x-go"
            | "text/x-java"
            | "text/x-c"
            | "text/x-c++"
    )
}

pub fn is_document_type(content_type: &str) -> bool {
    content_type == "application/pdf" || content_type.contains("officedocument")
}

pub fn is_image_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

pub fn is_video_type(content_type: &str) -> bool {
    content_type.starts_with("video/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pdf_by_magic_bytes() {
        assert_eq!(detect_content_type(b"%PDF-1.4 ...", None), "application/pdf");
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(
            detect_content_type(b"fn main() {}", Some("src/main.rs")),
            "text/x-rust"
        );
    }

    #[test]
    fn falls_back_to_text_plain_for_utf8() {
        assert_eq!(detect_content_type(b"hello world", None), "text/plain");
    }

    #[test]
    fn falls_back_to_octet_stream_for_binary_without_signature() {
        let bytes = vec![0u8, 1, 2, 3, 255, 254];
        assert_eq!(detect_content_type(&bytes, None), "application/octet-stream");
    }
}
