//! file: core/src/subprocess.rs
//! description: subprocess helper with captured pipes and a hard timeout.
//!
//! Spawns a child with piped stdout/stderr, drains both on reader threads
//! while polling for exit, and kills the child when the deadline passes.
//! Draining must run continuously or a chatty child deadlocks on a full
//! pipe buffer.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct SubprocessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl SubprocessResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Run `command args...` to completion or until `timeout` elapses.
///
/// `envs` entries are added on top of the inherited environment; an entry
/// whose key already exists replaces it. `cwd` optionally sets the working
/// directory.
pub fn run_with_timeout(
    command: &Path,
    args: &[String],
    envs: &BTreeMap<String, String>,
    cwd: Option<&Path>,
    timeout: Duration,
) -> std::io::Result<SubprocessResult> {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;

    // Reader threads own the pipe ends and drain until EOF.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_handle = std::thread::spawn(move || drain(stdout_pipe));
    let stderr_handle = std::thread::spawn(move || drain(stderr_pipe));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break Some(status),
            None => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    let _ = child.kill();
                    break child.wait().ok();
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    let exit_code = match status {
        Some(status) => exit_code_of(status),
        None => -1,
    };

    Ok(SubprocessResult { exit_code, stdout, stderr, timed_out })
}

/// Convenience wrapper for short probe commands (dependency checks): no env
/// additions, one-minute cap.
pub fn run_capture(command: &Path, args: &[String]) -> std::io::Result<SubprocessResult> {
    run_with_timeout(command, args, &BTreeMap::new(), None, Duration::from_secs(60))
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[cfg(unix)]
    #[test]
    fn captures_both_streams_and_exit_code() {
        let result = run_with_timeout(
            &PathBuf::from("sh"),
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            &BTreeMap::new(),
            None,
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_on_timeout() {
        let start = Instant::now();
        let result = run_with_timeout(
            &PathBuf::from("sleep"),
            &["30".to_string()],
            &BTreeMap::new(),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_executable_is_an_io_error() {
        let result = run_capture(
            &PathBuf::from("definitely-not-a-real-binary-9f2c"),
            &[],
        );
        assert!(result.is_err());
    }
}
