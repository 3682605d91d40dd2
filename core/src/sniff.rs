//! file: core/src/sniff.rs
//! description: file metadata probe — format, MIME and coarse category.
//!
//! Magic bytes first (the `infer` database), extension fallback second.
//! The category feeds the resolver's data-type matching and the clipboard
//! builtin's content dispatch.

use crate::types::DataKind;
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Short format name, e.g. "heic", "jpg", "pdf".
    pub format: String,
    pub mime_type: String,
    pub category: DataKind,
    pub size: u64,
}

lazy_static! {
    static ref IMAGE_FORMATS: HashSet<&'static str> = [
        "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "heic", "heif", "avif",
        "svg", "ico",
    ]
    .into_iter()
    .collect();
    static ref VIDEO_FORMATS: HashSet<&'static str> = [
        "mp4", "avi", "mkv", "mov", "webm", "flv", "mpeg", "mpg", "3gp", "wmv",
    ]
    .into_iter()
    .collect();
    static ref AUDIO_FORMATS: HashSet<&'static str> = [
        "mp3", "wav", "flac", "aac", "ogg", "m4a", "opus", "wma", "aiff",
    ]
    .into_iter()
    .collect();
    static ref DOCUMENT_FORMATS: HashSet<&'static str> = [
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "rtf", "odt", "ods", "epub",
    ]
    .into_iter()
    .collect();
    static ref TEXT_FORMATS: HashSet<&'static str> = [
        "txt", "md", "markdown", "json", "xml", "yaml", "yml", "csv", "html", "htm", "css",
        "js", "ts", "py", "rs", "c", "cpp", "h", "sh", "toml", "ini", "cfg", "log",
    ]
    .into_iter()
    .collect();
}

/// Map a short format name to its coarse category. Unknown formats land on
/// the generic `File` tag.
pub fn category_of_format(format: &str) -> DataKind {
    let lower = format.to_ascii_lowercase();
    let fmt = lower.as_str();
    if IMAGE_FORMATS.contains(fmt) {
        DataKind::Image
    } else if VIDEO_FORMATS.contains(fmt) {
        DataKind::Video
    } else if AUDIO_FORMATS.contains(fmt) {
        DataKind::Audio
    } else if DOCUMENT_FORMATS.contains(fmt) {
        DataKind::Document
    } else if TEXT_FORMATS.contains(fmt) {
        DataKind::Text
    } else {
        DataKind::File
    }
}

pub fn is_image_format(format: &str) -> bool {
    IMAGE_FORMATS.contains(format.to_ascii_lowercase().as_str())
}

pub fn is_text_format(format: &str) -> bool {
    TEXT_FORMATS.contains(format.to_ascii_lowercase().as_str())
}

/// Probe a file on disk. The format comes from magic bytes when the content
/// is recognized, otherwise from the extension; a readable UTF-8 head with
/// no better match counts as text.
pub fn probe(path: &Path) -> std::io::Result<FileInfo> {
    let meta = std::fs::metadata(path)?;
    let mut head = vec![0u8; 8192];
    let read = {
        let mut file = std::fs::File::open(path)?;
        let n = file.read(&mut head)?;
        head.truncate(n);
        n
    };

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let (format, mime_type) = match infer::get(&head) {
        Some(kind) => (kind.extension().to_string(), kind.mime_type().to_string()),
        None => {
            if !extension.is_empty() {
                let mime = mime_for_extension(&extension);
                (extension.clone(), mime)
            } else if read > 0 && std::str::from_utf8(&head).is_ok() {
                ("txt".to_string(), "text/plain".to_string())
            } else {
                ("bin".to_string(), "application/octet-stream".to_string())
            }
        }
    };

    let mut category = category_of_format(&format);
    // An unrecognized extension over readable UTF-8 content is still text.
    if category == DataKind::File && read > 0 && std::str::from_utf8(&head).is_ok() {
        category = DataKind::Text;
    }

    Ok(FileInfo {
        path: path.to_path_buf(),
        format,
        mime_type,
        category,
        size: meta.len(),
    })
}

fn mime_for_extension(ext: &str) -> String {
    match ext {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        "heic" => "image/heic".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "mp4" => "video/mp4".to_string(),
        "mov" => "video/quicktime".to_string(),
        "mkv" => "video/x-matroska".to_string(),
        "mp3" => "audio/mpeg".to_string(),
        "wav" => "audio/x-wav".to_string(),
        "flac" => "audio/flac".to_string(),
        "pdf" => "application/pdf".to_string(),
        "json" => "application/json".to_string(),
        "xml" => "application/xml".to_string(),
        "html" | "htm" => "text/html".to_string(),
        "csv" => "text/csv".to_string(),
        "txt" | "md" | "log" => "text/plain".to_string(),
        "zip" => "application/zip".to_string(),
        "gz" => "application/gzip".to_string(),
        "tar" => "application/x-tar".to_string(),
        _ => {
            if TEXT_FORMATS.contains(ext) {
                "text/plain".to_string()
            } else {
                "application/octet-stream".to_string()
            }
        }
    }
}
