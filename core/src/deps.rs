//! file: core/src/deps.rs
//! description: per-plugin isolated dependency environments.
//!
//! Layout: `<base>/<plugin-name>/{python,node,deps.json}`. Python deps go
//! into a virtualenv created with `python3 -m venv`; node deps install under
//! a `--prefix` directory. System deps are checked, never installed. The
//! `deps.json` manifest records what was installed, with versions and
//! timestamps. Install operations are not safe across concurrent runs and
//! are expected to be serialized externally; read-only use is.

use crate::error::DepError;
use crate::manifest::{DependencyKind, DependencySpec, PluginManifest};
use crate::subprocess;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEPS_MANIFEST: &str = "deps.json";

/// One record in `deps.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledDependency {
    pub name: String,
    pub r#type: DependencyKind,
    #[serde(default)]
    pub version: String,
    /// RFC 3339 install timestamp.
    #[serde(default)]
    pub installed_at: String,
}

/// A plugin's dependency environment on disk.
#[derive(Debug, Clone)]
pub struct DepEnvironment {
    pub plugin_name: String,
    pub env_dir: PathBuf,
    pub dependencies: Vec<InstalledDependency>,
}

impl DepEnvironment {
    pub fn python_dir(&self) -> PathBuf {
        self.env_dir.join("python")
    }

    pub fn node_dir(&self) -> PathBuf {
        self.env_dir.join("node")
    }

    pub fn deps_file(&self) -> PathBuf {
        self.env_dir.join(DEPS_MANIFEST)
    }

    pub fn python_bin(&self) -> PathBuf {
        if cfg!(windows) {
            self.python_dir().join("Scripts").join("python.exe")
        } else {
            self.python_dir().join("bin").join("python")
        }
    }

    pub fn pip_bin(&self) -> PathBuf {
        if cfg!(windows) {
            self.python_dir().join("Scripts").join("pip.exe")
        } else {
            self.python_dir().join("bin").join("pip")
        }
    }

    pub fn has_python_env(&self) -> bool {
        self.python_bin().is_file()
    }

    pub fn has_node_env(&self) -> bool {
        self.node_dir().join("node_modules").is_dir()
    }

    /// Read `deps.json` if present, replacing the in-memory record list.
    pub fn load(&mut self) -> Result<(), DepError> {
        let path = self.deps_file();
        if !path.is_file() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path)?;
        self.dependencies = serde_json::from_str(&raw)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), DepError> {
        std::fs::create_dir_all(&self.env_dir)?;
        let json = serde_json::to_string_pretty(&self.dependencies)?;
        std::fs::write(self.deps_file(), json)?;
        Ok(())
    }

    fn record(&mut self, dep: &DependencySpec) {
        let entry = InstalledDependency {
            name: dep.name.clone(),
            r#type: dep.r#type,
            version: dep.version.clone().unwrap_or_default(),
            installed_at: chrono::Utc::now().to_rfc3339(),
        };
        // Re-installs replace the previous record.
        self.dependencies.retain(|d| d.name != entry.name || d.r#type != entry.r#type);
        self.dependencies.push(entry);
    }
}

/// Result of a dependency check for one declared dependency.
#[derive(Debug, Clone)]
pub struct DepCheckResult {
    pub satisfied: bool,
    pub message: String,
}

/// Summary of an install pass.
#[derive(Debug, Default)]
pub struct DepInstallReport {
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl DepInstallReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Manages the environments under one base directory.
pub struct DepManager {
    base_dir: PathBuf,
}

impl DepManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DepManager { base_dir: base_dir.into() }
    }

    /// Default base: `<user-data>/transmute/deps`, falling back to the
    /// system temp directory when no home is available.
    pub fn default_base_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("transmute").join("deps"))
            .unwrap_or_else(|| std::env::temp_dir().join("transmute-deps"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The environment for a plugin if one exists on disk.
    pub fn get_env(&self, plugin_name: &str) -> Option<DepEnvironment> {
        let env_dir = self.base_dir.join(plugin_name);
        if !env_dir.is_dir() {
            return None;
        }
        let mut env = DepEnvironment {
            plugin_name: plugin_name.to_string(),
            env_dir,
            dependencies: Vec::new(),
        };
        if let Err(e) = env.load() {
            warn!("unreadable {} for '{}': {}", DEPS_MANIFEST, plugin_name, e);
        }
        Some(env)
    }

    pub fn get_or_create_env(&self, plugin_name: &str) -> Result<DepEnvironment, DepError> {
        let env_dir = self.base_dir.join(plugin_name);
        std::fs::create_dir_all(&env_dir).map_err(|e| DepError::EnvCreate {
            plugin: plugin_name.to_string(),
            reason: e.to_string(),
        })?;
        let mut env = DepEnvironment {
            plugin_name: plugin_name.to_string(),
            env_dir,
            dependencies: Vec::new(),
        };
        env.load()?;
        Ok(env)
    }

    pub fn remove_env(&self, plugin_name: &str) -> Result<(), DepError> {
        let env_dir = self.base_dir.join(plugin_name);
        if env_dir.is_dir() {
            std::fs::remove_dir_all(&env_dir)?;
        }
        Ok(())
    }

    /// Remove environment directories whose plugin is no longer present.
    /// Returns the names removed.
    pub fn clean_orphans(&self, known_plugins: &[String]) -> Result<Vec<String>, DepError> {
        let mut removed = Vec::new();
        if !self.base_dir.is_dir() {
            return Ok(removed);
        }
        for entry in std::fs::read_dir(&self.base_dir)?.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !known_plugins.contains(&name) {
                std::fs::remove_dir_all(entry.path())?;
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// Install every installable dependency of a manifest into the plugin's
    /// environment. System deps are only recorded as skipped; each install
    /// is recorded in `deps.json` with a timestamp.
    pub fn install_all(&self, manifest: &PluginManifest) -> Result<DepInstallReport, DepError> {
        let mut report = DepInstallReport::default();
        if manifest.dependencies.is_empty() {
            return Ok(report);
        }

        let mut env = self.get_or_create_env(&manifest.name)?;

        let python_deps: Vec<&DependencySpec> = manifest
            .dependencies
            .iter()
            .filter(|d| d.r#type == DependencyKind::Python)
            .collect();
        let node_deps: Vec<&DependencySpec> = manifest
            .dependencies
            .iter()
            .filter(|d| d.r#type == DependencyKind::Node)
            .collect();

        for dep in manifest.dependencies.iter().filter(|d| d.r#type == DependencyKind::System) {
            report.skipped.push(dep.name.clone());
            info!("system dependency '{}' requires manual installation", dep.name);
        }

        if !python_deps.is_empty() {
            if !env.has_python_env() {
                create_python_venv(&env.python_dir()).map_err(|reason| DepError::EnvCreate {
                    plugin: manifest.name.clone(),
                    reason,
                })?;
            }
            for dep in python_deps {
                match install_python_package(&env, dep) {
                    Ok(()) => {
                        env.record(dep);
                        report.installed.push(dep.name.clone());
                    }
                    Err(reason) => {
                        warn!("pip install {} failed: {}", dep.name, reason);
                        report.failed.push(dep.name.clone());
                    }
                }
            }
        }

        if !node_deps.is_empty() {
            std::fs::create_dir_all(env.node_dir().join("node_modules"))?;
            for dep in node_deps {
                match install_node_package(&env, dep) {
                    Ok(()) => {
                        env.record(dep);
                        report.installed.push(dep.name.clone());
                    }
                    Err(reason) => {
                        warn!("npm install {} failed: {}", dep.name, reason);
                        report.failed.push(dep.name.clone());
                    }
                }
            }
        }

        env.save()?;
        Ok(report)
    }

    /// Run the type-specific probe for every declared dependency.
    pub fn check_all(
        &self,
        manifest: &PluginManifest,
    ) -> Vec<(DependencySpec, DepCheckResult)> {
        let env = self.get_env(&manifest.name);
        manifest
            .dependencies
            .iter()
            .map(|dep| (dep.clone(), self.check(dep, env.as_ref())))
            .collect()
    }

    pub fn check(&self, dep: &DependencySpec, env: Option<&DepEnvironment>) -> DepCheckResult {
        if let Some(check) = &dep.check {
            return check_custom(dep, check);
        }
        match dep.r#type {
            DependencyKind::System => check_system(dep),
            DependencyKind::Python => check_python(dep, env),
            DependencyKind::Node => check_node(dep, env),
        }
    }
}

fn create_python_venv(venv_dir: &Path) -> Result<(), String> {
    let interpreter = which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| "no python interpreter on PATH".to_string())?;
    let result = subprocess::run_capture(
        &interpreter,
        &["-m".to_string(), "venv".to_string(), venv_dir.display().to_string()],
    )
    .map_err(|e| e.to_string())?;
    if result.success() {
        Ok(())
    } else {
        Err(result.stderr)
    }
}

/// Build the pip requirement spec: `name`, `name==1.2` for bare versions, or
/// `name>=1.2` when the constraint already carries a comparator.
fn python_package_spec(dep: &DependencySpec) -> String {
    match &dep.version {
        None => dep.name.clone(),
        Some(ver) => {
            if ["<", ">", "=", "~", "!"].iter().any(|op| ver.starts_with(op)) {
                format!("{}{}", dep.name, ver)
            } else {
                format!("{}=={}", dep.name, ver)
            }
        }
    }
}

fn install_python_package(env: &DepEnvironment, dep: &DependencySpec) -> Result<(), String> {
    let spec = python_package_spec(dep);
    let result = subprocess::run_capture(&env.pip_bin(), &["install".to_string(), spec])
        .map_err(|e| e.to_string())?;
    if result.success() {
        Ok(())
    } else {
        Err(result.stderr)
    }
}

fn install_node_package(env: &DepEnvironment, dep: &DependencySpec) -> Result<(), String> {
    let spec = match &dep.version {
        Some(ver) => format!("{}@{}", dep.name, ver),
        None => dep.name.clone(),
    };
    let npm = which::which("npm").map_err(|_| "npm not found on PATH".to_string())?;
    let result = subprocess::run_capture(
        &npm,
        &[
            "install".to_string(),
            "--prefix".to_string(),
            env.node_dir().display().to_string(),
            spec,
        ],
    )
    .map_err(|e| e.to_string())?;
    if result.success() {
        Ok(())
    } else {
        Err(result.stderr)
    }
}

fn check_custom(dep: &DependencySpec, check: &str) -> DepCheckResult {
    if check.trim().is_empty() {
        return DepCheckResult { satisfied: false, message: "empty check command".to_string() };
    }
    let (shell, flag) = if cfg!(windows) { ("cmd", "/c") } else { ("sh", "-c") };
    let result = subprocess::run_capture(
        Path::new(shell),
        &[flag.to_string(), check.to_string()],
    );
    match result {
        Ok(r) if r.success() => DepCheckResult {
            satisfied: true,
            message: format!("{} found", dep.name),
        },
        _ => DepCheckResult {
            satisfied: false,
            message: format!("{} not found (check: {})", dep.name, check),
        },
    }
}

fn check_system(dep: &DependencySpec) -> DepCheckResult {
    let Ok(path) = which::which(&dep.name) else {
        return DepCheckResult {
            satisfied: false,
            message: format!("{} not found on PATH", dep.name),
        };
    };

    if let Some(constraint) = &dep.version {
        let output = subprocess::run_capture(&path, &["--version".to_string()])
            .map(|r| format!("{}{}", r.stdout, r.stderr))
            .unwrap_or_default();
        match extract_version(&output) {
            Some(found) if satisfies_constraint(&found, constraint) => DepCheckResult {
                satisfied: true,
                message: format!("{} {} satisfies {}", dep.name, found, constraint),
            },
            Some(found) => DepCheckResult {
                satisfied: false,
                message: format!("{} {} does not satisfy {}", dep.name, found, constraint),
            },
            None => DepCheckResult {
                satisfied: false,
                message: format!("could not determine {} version", dep.name),
            },
        }
    } else {
        DepCheckResult { satisfied: true, message: format!("{} found", dep.name) }
    }
}

fn check_python(dep: &DependencySpec, env: Option<&DepEnvironment>) -> DepCheckResult {
    let Some(env) = env.filter(|e| e.has_python_env()) else {
        return DepCheckResult {
            satisfied: false,
            message: format!("no environment for python package {}", dep.name),
        };
    };
    // `pip show <pkg>` exits non-zero for unknown packages and prints a
    // `Version:` line otherwise.
    let result = subprocess::run_capture(
        &env.pip_bin(),
        &["show".to_string(), dep.name.clone()],
    );
    match result {
        Ok(r) if r.success() => {
            let found = r
                .stdout
                .lines()
                .find_map(|line| line.strip_prefix("Version:"))
                .map(str::trim)
                .unwrap_or("")
                .to_string();
            match &dep.version {
                Some(constraint) if !found.is_empty() => {
                    if satisfies_constraint(&found, constraint) {
                        DepCheckResult {
                            satisfied: true,
                            message: format!("{} {} installed", dep.name, found),
                        }
                    } else {
                        DepCheckResult {
                            satisfied: false,
                            message: format!(
                                "{} {} does not satisfy {}",
                                dep.name, found, constraint
                            ),
                        }
                    }
                }
                _ => DepCheckResult {
                    satisfied: true,
                    message: format!("{} installed", dep.name),
                },
            }
        }
        _ => DepCheckResult {
            satisfied: false,
            message: format!("python package {} not installed", dep.name),
        },
    }
}

fn check_node(dep: &DependencySpec, env: Option<&DepEnvironment>) -> DepCheckResult {
    let Some(env) = env else {
        return DepCheckResult {
            satisfied: false,
            message: format!("no environment for node package {}", dep.name),
        };
    };
    let installed = env.node_dir().join("node_modules").join(&dep.name).is_dir();
    DepCheckResult {
        satisfied: installed,
        message: if installed {
            format!("{} installed", dep.name)
        } else {
            format!("node package {} not installed", dep.name)
        },
    }
}

/// Pull the first dotted numeric version out of free-form `--version`
/// output, e.g. "Python 3.11.5" -> "3.11.5".
pub fn extract_version(output: &str) -> Option<String> {
    let bytes = output.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let candidate = &output[start..i];
            if candidate.contains('.') {
                return Some(candidate.trim_end_matches('.').to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Comparator-style constraint check: `>=`, `<=`, `==`, `!=`, `~=`, `>`,
/// `<`, or a bare version meaning exact match. `~=` pins every component
/// except the last and requires at-least on the last.
pub fn satisfies_constraint(found: &str, constraint: &str) -> bool {
    let constraint = constraint.trim();
    let (op, wanted) = ["~=", ">=", "<=", "==", "!=", ">", "<"]
        .iter()
        .find_map(|op| constraint.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("==", constraint));

    let found_parts = parse_version(found);
    let wanted_parts = parse_version(wanted);
    let ord = compare_versions(&found_parts, &wanted_parts);

    match op {
        "==" => ord == std::cmp::Ordering::Equal,
        "!=" => ord != std::cmp::Ordering::Equal,
        ">=" => ord != std::cmp::Ordering::Less,
        "<=" => ord != std::cmp::Ordering::Greater,
        ">" => ord == std::cmp::Ordering::Greater,
        "<" => ord == std::cmp::Ordering::Less,
        "~=" => {
            if wanted_parts.is_empty() {
                return true;
            }
            let prefix_len = wanted_parts.len().saturating_sub(1);
            found_parts.len() >= prefix_len
                && found_parts[..prefix_len] == wanted_parts[..prefix_len]
                && ord != std::cmp::Ordering::Less
        }
        _ => false,
    }
}

fn parse_version(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .collect()
}

fn compare_versions(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_extraction_handles_prefixes() {
        assert_eq!(extract_version("Python 3.11.5").as_deref(), Some("3.11.5"));
        assert_eq!(extract_version("v20.1").as_deref(), Some("20.1"));
        assert_eq!(extract_version("ffmpeg version 6.0-static").as_deref(), Some("6.0"));
        assert_eq!(extract_version("no digits here"), None);
    }

    #[test]
    fn constraint_comparators() {
        assert!(satisfies_constraint("3.11.5", ">=3.10"));
        assert!(!satisfies_constraint("3.9.1", ">=3.10"));
        assert!(satisfies_constraint("1.2.3", "==1.2.3"));
        assert!(satisfies_constraint("1.2.3", "1.2.3"));
        assert!(satisfies_constraint("1.2.4", "!=1.2.3"));
        assert!(satisfies_constraint("1.2", "<2.0"));
        assert!(satisfies_constraint("2.1", ">2.0.9"));
        assert!(satisfies_constraint("1.4.9", "~=1.4.2"));
        assert!(!satisfies_constraint("1.5.0", "~=1.4.2"));
        assert!(!satisfies_constraint("1.4.1", "~=1.4.2"));
    }

    #[test]
    fn python_spec_building() {
        let bare = DependencySpec {
            name: "pillow".to_string(),
            r#type: DependencyKind::Python,
            version: None,
            check: None,
        };
        assert_eq!(python_package_spec(&bare), "pillow");

        let pinned = DependencySpec { version: Some("10.1".to_string()), ..bare.clone() };
        assert_eq!(python_package_spec(&pinned), "pillow==10.1");

        let ranged = DependencySpec { version: Some(">=10".to_string()), ..bare };
        assert_eq!(python_package_spec(&ranged), "pillow>=10");
    }

    #[test]
    fn deps_manifest_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DepManager::new(tmp.path());
        let mut env = manager.get_or_create_env("imgtool").unwrap();
        env.dependencies.push(InstalledDependency {
            name: "pillow".to_string(),
            r#type: DependencyKind::Python,
            version: "10.1".to_string(),
            installed_at: chrono::Utc::now().to_rfc3339(),
        });
        env.save().unwrap();

        let reloaded = manager.get_env("imgtool").unwrap();
        assert_eq!(reloaded.dependencies, env.dependencies);
    }

    #[test]
    fn orphan_cleanup_spares_known_plugins() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DepManager::new(tmp.path());
        manager.get_or_create_env("alive").unwrap();
        manager.get_or_create_env("gone").unwrap();

        let removed = manager.clean_orphans(&["alive".to_string()]).unwrap();
        assert_eq!(removed, vec!["gone".to_string()]);
        assert!(manager.get_env("alive").is_some());
        assert!(manager.get_env("gone").is_none());
    }
}
