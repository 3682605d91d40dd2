//! file: core/src/workspace.rs
//! description: run-scoped temp workspace with deterministic file naming.
//!
//! One directory per invocation: `<base-temp>/transmute/<run-id>/`.
//! Intermediate files are named `s{stage}_e{element}.{ext}` (scatter variant
//! `s{stage}_e{element}_i{k}.{ext}`); collect output lives under
//! `collected/`. The workspace removes itself on drop; files finalize moves
//! out of it are no longer part of the workspace by then.

use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct RunWorkspace {
    run_id: String,
    run_dir: PathBuf,
}

impl RunWorkspace {
    /// Acquire a fresh workspace under the system temp directory.
    pub fn create() -> std::io::Result<RunWorkspace> {
        Self::create_under(std::env::temp_dir().join("transmute"))
    }

    /// Acquire a fresh workspace under an explicit base (tests).
    pub fn create_under(base: impl Into<PathBuf>) -> std::io::Result<RunWorkspace> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = base.into().join(&run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(RunWorkspace { run_id, run_dir })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// `s{stage}_e{element}.{ext}`
    pub fn temp_path(&self, stage: usize, element: usize, ext: &str) -> PathBuf {
        self.run_dir.join(format!("s{}_e{}.{}", stage, element, ext))
    }

    /// `s{stage}_e{element}_i{k}.{ext}`
    pub fn scatter_temp_path(
        &self,
        stage: usize,
        element: usize,
        scatter: usize,
        ext: &str,
    ) -> PathBuf {
        self.run_dir
            .join(format!("s{}_e{}_i{}.{}", stage, element, scatter, ext))
    }

    /// Directory a collect node gathers into.
    pub fn collected_dir(&self) -> PathBuf {
        self.run_dir.join("collected")
    }

    /// Is this path inside the run directory?
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.run_dir)
    }

    /// Recursive delete; errors are ignored, the directory is gone on every
    /// normal exit path via Drop.
    pub fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.run_dir);
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create_under(tmp.path()).unwrap();
        assert!(ws.temp_path(1, 0, "jpg").ends_with("s1_e0.jpg"));
        assert!(ws.scatter_temp_path(2, 1, 3, "png").ends_with("s2_e1_i3.png"));
        assert!(ws.collected_dir().ends_with("collected"));
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir;
        {
            let ws = RunWorkspace::create_under(tmp.path()).unwrap();
            dir = ws.run_dir().to_path_buf();
            std::fs::write(ws.temp_path(0, 0, "txt"), b"x").unwrap();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn containment_check() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create_under(tmp.path()).unwrap();
        assert!(ws.contains(&ws.temp_path(0, 0, "jpg")));
        assert!(!ws.contains(Path::new("/etc/passwd")));
    }
}
