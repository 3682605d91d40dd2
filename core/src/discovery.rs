//! file: core/src/discovery.rs
//! description: plugin manifest discovery across priority-ordered directories.
//!
//! Each plugin lives in its own subdirectory containing a `plugin.json`.
//! Directories are scanned in priority order (user, portable, system); a
//! malformed manifest is skipped with a warning and never aborts discovery.
//! Duplicate `group.etl` ids resolve first-wins.

use crate::manifest::PluginManifest;
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILENAME: &str = "plugin.json";

/// Environment variable overriding the plugin search path entirely.
pub const PLUGIN_DIR_ENV: &str = "TRANSMUTE_PLUGIN_DIR";

pub struct PluginDiscovery {
    plugin_dirs: Vec<PathBuf>,
}

impl PluginDiscovery {
    /// Discovery over the standard directories.
    pub fn new() -> Self {
        PluginDiscovery { plugin_dirs: standard_plugin_dirs() }
    }

    /// Discovery over an explicit directory list (highest priority first).
    pub fn with_dirs(plugin_dirs: Vec<PathBuf>) -> Self {
        PluginDiscovery { plugin_dirs }
    }

    pub fn add_plugin_dir(&mut self, dir: PathBuf) {
        if !self.plugin_dirs.contains(&dir) {
            self.plugin_dirs.push(dir);
        }
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Scan every directory and return validated manifests, deduped on
    /// `group.etl` with first-wins priority.
    pub fn discover_all(&self) -> Vec<PluginManifest> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut manifests = Vec::new();

        for dir in &self.plugin_dirs {
            for manifest in self.discover_in_dir(dir) {
                let id = manifest.id();
                if seen.insert(id.clone()) {
                    manifests.push(manifest);
                } else {
                    debug!(
                        "skipping duplicate plugin id '{}' from {}",
                        id,
                        manifest.manifest_path.display()
                    );
                }
            }
        }

        manifests
    }

    /// Scan a single directory. Missing or unreadable directories yield an
    /// empty list rather than an error.
    pub fn discover_in_dir(&self, dir: &Path) -> Vec<PluginManifest> {
        let mut manifests = Vec::new();
        if !dir.is_dir() {
            return manifests;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read plugin directory {}: {}", dir.display(), e);
                return manifests;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let manifest_path = path.join(MANIFEST_FILENAME);
            if !manifest_path.is_file() {
                continue;
            }
            match PluginManifest::load_from_file(&manifest_path) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!("skipping manifest {}: {}", manifest_path.display(), e);
                }
            }
        }

        // Stable order within a directory: alphabetical by plugin dir name.
        manifests.sort_by(|a, b| a.plugin_dir.cmp(&b.plugin_dir));
        manifests
    }
}

impl Default for PluginDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard plugin directory list in priority order. An explicit
/// `TRANSMUTE_PLUGIN_DIR` replaces the whole list.
pub fn standard_plugin_dirs() -> Vec<PathBuf> {
    if let Ok(dir) = std::env::var(PLUGIN_DIR_ENV) {
        return vec![PathBuf::from(dir)];
    }

    let mut dirs = Vec::new();

    // User plugins (highest priority)
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".transmute").join("plugins"));
    }

    // Portable plugins next to the executable
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            dirs.push(parent.join("plugins"));
        }
    }

    // System plugins (lowest priority)
    #[cfg(target_os = "windows")]
    {
        if let Ok(programdata) = std::env::var("ProgramData") {
            dirs.push(PathBuf::from(programdata).join("transmute").join("plugins"));
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        dirs.push(PathBuf::from("/usr/local/share/transmute/plugins"));
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, name: &str, body: &str) {
        let plugin_dir = dir.join(name);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join(MANIFEST_FILENAME), body).unwrap();
    }

    #[test]
    fn malformed_manifest_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "good",
            r#"{"name": "good", "interface": "cli", "executable": "run", "targets": ["jpg"]}"#,
        );
        write_manifest(tmp.path(), "bad", "{ not json");

        let discovery = PluginDiscovery::with_dirs(vec![tmp.path().to_path_buf()]);
        let manifests = discovery.discover_all();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "good");
    }

    #[test]
    fn duplicate_id_resolves_first_wins() {
        let high = tempfile::tempdir().unwrap();
        let low = tempfile::tempdir().unwrap();
        write_manifest(
            high.path(),
            "img",
            r#"{"name": "img", "version": "2.0.0", "interface": "cli", "executable": "run", "targets": ["jpg"]}"#,
        );
        write_manifest(
            low.path(),
            "img",
            r#"{"name": "img", "version": "1.0.0", "interface": "cli", "executable": "run", "targets": ["jpg"]}"#,
        );

        let discovery = PluginDiscovery::with_dirs(vec![
            high.path().to_path_buf(),
            low.path().to_path_buf(),
        ]);
        let manifests = discovery.discover_all();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].version, "2.0.0");
    }
}
