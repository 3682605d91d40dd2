//! file: core/src/builtins.rs
//! description: collect and clipboard builtin implementations.
//!
//! `tee` and the passthrough targets are handled structurally by the
//! executor; the two builtins with real behavior live here.

use crate::clipboard::ClipboardSink;
use crate::sniff;
use crate::types::DataKind;
use std::path::{Path, PathBuf};

/// Copy files into `collected_dir` with an index prefix preserving order:
/// `0000_<name>`, `0001_<name>`, … Returns the directory path.
pub fn collect_files(
    files: &[(PathBuf, String)],
    collected_dir: &Path,
) -> std::io::Result<PathBuf> {
    if files.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "collect requires at least one input file",
        ));
    }
    std::fs::create_dir_all(collected_dir)?;

    for (index, (path, name)) in files.iter().enumerate() {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("collect input does not exist: {}", path.display()),
            ));
        }
        let dest = collected_dir.join(format!("{:04}_{}", index, name));
        std::fs::copy(path, &dest)?;
    }

    Ok(collected_dir.to_path_buf())
}

/// Enumerate the regular files of a directory in alphabetical order,
/// optionally filtered by a glob pattern on the file name.
pub fn enumerate_directory(
    dir: &Path,
    pattern: Option<&str>,
) -> std::io::Result<Vec<PathBuf>> {
    let compiled = match pattern {
        Some(p) => Some(glob::Pattern::new(p).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid glob pattern '{}': {}", p, e),
            )
        })?),
        None => None,
    };

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(pattern) = &compiled {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if !name.map(|n| pattern.matches(&n)).unwrap_or(false) {
                continue;
            }
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// What a clipboard node ended up writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardWrite {
    /// Native image data or file text: the content itself is on the
    /// clipboard, the file can be discarded.
    Content,
    /// Only the absolute path string was copied; the file must survive or
    /// the clipboard entry dangles.
    PathString,
}

/// Write one file to the clipboard: text-category files as text, images as
/// native image data, everything else as the absolute path string.
pub fn clipboard_write(sink: &dyn ClipboardSink, path: &Path) -> std::io::Result<ClipboardWrite> {
    let info = sniff::probe(path)?;
    match info.category {
        DataKind::Image => {
            sink.set_image(path)?;
            Ok(ClipboardWrite::Content)
        }
        DataKind::Text => {
            let content = std::fs::read_to_string(path)?;
            sink.set_text(&content)?;
            Ok(ClipboardWrite::Content)
        }
        _ => {
            let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            sink.set_text(&absolute.display().to_string())?;
            Ok(ClipboardWrite::PathString)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{CaptureClipboard, ClipboardContent};

    #[test]
    fn collect_orders_and_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.jpg");
        let b = tmp.path().join("b.jpg");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let out = tmp.path().join("collected");
        let files = vec![
            (b.clone(), "photo2.jpg".to_string()),
            (a.clone(), "photo1.jpg".to_string()),
        ];
        collect_files(&files, &out).unwrap();

        assert!(out.join("0000_photo2.jpg").is_file());
        assert!(out.join("0001_photo1.jpg").is_file());
    }

    #[test]
    fn collect_rejects_empty_input() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(collect_files(&[], &tmp.path().join("c")).is_err());
    }

    #[test]
    fn directory_enumeration_is_alphabetical_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.jpg", "b.jpg", "notes.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("sub")).unwrap();

        let all = enumerate_directory(tmp.path(), None).unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.png", "notes.txt"]);

        let jpgs = enumerate_directory(tmp.path(), Some("*.jpg")).unwrap();
        assert_eq!(jpgs.len(), 2);
    }

    #[test]
    fn clipboard_dispatch_by_category() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = CaptureClipboard::new();

        let text = tmp.path().join("note.txt");
        std::fs::write(&text, "hello").unwrap();
        assert_eq!(clipboard_write(&sink, &text).unwrap(), ClipboardWrite::Content);

        let blob = tmp.path().join("data.qcow2");
        std::fs::write(&blob, [0u8, 159, 146, 150]).unwrap();
        assert_eq!(clipboard_write(&sink, &blob).unwrap(), ClipboardWrite::PathString);

        let writes = sink.writes();
        assert_eq!(writes[0], ClipboardContent::Text("hello".to_string()));
        match &writes[1] {
            ClipboardContent::Text(path) => assert!(path.ends_with("data.qcow2")),
            other => panic!("unexpected write {:?}", other),
        }
    }
}
