//! file: core/src/clipboard.rs
//! description: OS clipboard bridge contract and default implementation.
//!
//! The executor talks to the clipboard through this trait; the default
//! implementation shells out to the platform tool (pbcopy / wl-copy /
//! xclip / clip). Tests inject a capturing sink instead.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// What a clipboard node wrote, for capture sinks and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Text(String),
    /// Native image data, identified by the file it came from.
    Image(std::path::PathBuf),
}

pub trait ClipboardSink: Send + Sync {
    /// Replace the clipboard with plain text.
    fn set_text(&self, text: &str) -> std::io::Result<()>;

    /// Replace the clipboard with native image data read from `path`.
    fn set_image(&self, path: &Path) -> std::io::Result<()>;
}

/// Shells out to the first available platform clipboard tool.
pub struct SystemClipboard;

impl SystemClipboard {
    fn pipe_bytes(command: &str, args: &[&str], bytes: &[u8]) -> std::io::Result<()> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes)?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("{} exited with {}", command, status)))
        }
    }

    fn pipe_text(command: &str, args: &[&str], text: &str) -> std::io::Result<()> {
        Self::pipe_bytes(command, args, text.as_bytes())
    }

    fn run(command: &str, args: &[&str]) -> std::io::Result<()> {
        let status = Command::new(command)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("{} exited with {}", command, status)))
        }
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> std::io::Result<()> {
        if cfg!(target_os = "macos") {
            Self::pipe_text("pbcopy", &[], text)
        } else if cfg!(target_os = "windows") {
            Self::pipe_text("clip", &[], text)
        } else {
            Self::pipe_text("wl-copy", &[], text)
                .or_else(|_| Self::pipe_text("xclip", &["-selection", "clipboard"], text))
        }
    }

    fn set_image(&self, path: &Path) -> std::io::Result<()> {
        let path_str = path.display().to_string();
        if cfg!(target_os = "macos") {
            let script = format!(
                "set the clipboard to (read (POSIX file \"{}\") as picture)",
                path_str
            );
            Self::run("osascript", &["-e", &script])
        } else if cfg!(target_os = "windows") {
            let script = format!(
                "Add-Type -AssemblyName System.Windows.Forms; \
                 [Windows.Forms.Clipboard]::SetImage([Drawing.Image]::FromFile('{}'))",
                path_str
            );
            Self::run("powershell", &["-NoProfile", "-Command", &script])
        } else {
            let mime = if path_str.to_ascii_lowercase().ends_with(".jpg")
                || path_str.to_ascii_lowercase().ends_with(".jpeg")
            {
                "image/jpeg"
            } else {
                "image/png"
            };
            let bytes = std::fs::read(path)?;
            Self::pipe_bytes("wl-copy", &["-t", mime], &bytes).or_else(|_| {
                Self::run(
                    "xclip",
                    &["-selection", "clipboard", "-t", mime, "-i", &path_str],
                )
            })
        }
    }
}

/// Records every write instead of touching the OS. Used by tests.
#[derive(Default)]
pub struct CaptureClipboard {
    writes: Mutex<Vec<ClipboardContent>>,
}

impl CaptureClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<ClipboardContent> {
        self.writes.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ClipboardSink for CaptureClipboard {
    fn set_text(&self, text: &str) -> std::io::Result<()> {
        self.writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ClipboardContent::Text(text.to_string()));
        Ok(())
    }

    fn set_image(&self, path: &Path) -> std::io::Result<()> {
        self.writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ClipboardContent::Image(path.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_records_in_order() {
        let sink = CaptureClipboard::new();
        sink.set_text("hello").unwrap();
        sink.set_image(Path::new("a.png")).unwrap();
        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], ClipboardContent::Text("hello".to_string()));
    }
}
