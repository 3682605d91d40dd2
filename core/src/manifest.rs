//! file: core/src/manifest.rs
//! description: plugin manifest model loaded from `plugin.json`.
//!
//! A manifest declares a plugin's identity, interface kind, supported
//! targets, accepted input formats, option schema and dependencies. It is
//! immutable after load; the loader backends borrow it for identity.

use crate::types::{DataKind, EtlKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the host talks to the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// External executable speaking the argv/JSON protocol.
    Cli,
    /// Shared library exposing the C ABI.
    Native,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Cli => "cli",
            InterfaceKind::Native => "native",
        }
    }
}

/// One entry of the plugin's declared option schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    #[serde(default = "default_option_type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub description: String,
}

fn default_option_type() -> String {
    "string".to_string()
}

/// Dependency kinds the environment manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Host-level executable; checked, never installed.
    System,
    /// Python package installed into the plugin's virtualenv.
    Python,
    /// Node package installed into the plugin's node_modules prefix.
    Node,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::System => "system",
            DependencyKind::Python => "python",
            DependencyKind::Node => "node",
        }
    }
}

/// A declared dependency with an optional version constraint and an optional
/// custom check command run through the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub r#type: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    /// Defaults to `name` when absent.
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_etl")]
    pub etl: EtlKind,
    pub targets: Vec<String>,
    /// Empty list means accept any input format.
    #[serde(default)]
    pub input_formats: Vec<String>,
    pub interface: InterfaceKind,
    /// CLI interface: executable name or path.
    #[serde(default)]
    pub executable: String,
    /// Native interface: library filename.
    #[serde(default)]
    pub library: String,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub input_types: Vec<DataKind>,
    #[serde(default)]
    pub output_types: Vec<DataKind>,

    /// Where this manifest was loaded from. Filled by discovery, not by the
    /// JSON document itself.
    #[serde(skip)]
    pub manifest_path: PathBuf,
    #[serde(skip)]
    pub plugin_dir: PathBuf,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_etl() -> EtlKind {
    EtlKind::Transform
}

impl PluginManifest {
    /// Identity used for dedupe and default mappings: `group.etl`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.group, self.etl)
    }

    /// Load a manifest from a JSON file path, filling in the path metadata
    /// and the `group` default.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<PluginManifest, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read manifest: {}", e))?;
        let mut manifest: PluginManifest =
            serde_json::from_str(&raw).map_err(|e| format!("parse manifest: {}", e))?;
        if manifest.group.is_empty() {
            manifest.group = manifest.name.clone();
        }
        manifest.manifest_path = path.to_path_buf();
        manifest.plugin_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        manifest.validate()?;
        Ok(manifest)
    }

    /// Basic structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("manifest name is empty".to_string());
        }
        if self.targets.is_empty() {
            return Err(format!("plugin '{}' declares no targets", self.name));
        }
        match self.interface {
            InterfaceKind::Cli if self.executable.trim().is_empty() => {
                Err(format!("cli plugin '{}' has no executable", self.name))
            }
            InterfaceKind::Native if self.library.trim().is_empty() => {
                Err(format!("native plugin '{}' has no library", self.name))
            }
            _ => Ok(()),
        }
    }

    /// Project to the publicly exposed info record.
    pub fn to_info(&self) -> crate::types::PluginInfo {
        crate::types::PluginInfo {
            id: self.id(),
            name: self.name.clone(),
            group: self.group.clone(),
            etl: self.etl,
            targets: self.targets.clone(),
            input_formats: self.input_formats.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            builtin: false,
            input_types: self.input_types.clone(),
            output_types: self.output_types.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(interface: &str, locator: &str) -> String {
        let key = if interface == "cli" { "executable" } else { "library" };
        format!(
            r#"{{"name": "img", "interface": "{}", "targets": ["jpg"], "{}": "{}"}}"#,
            interface, key, locator
        )
    }

    #[test]
    fn group_defaults_to_name_and_etl_to_transform() {
        let mut m: PluginManifest = serde_json::from_str(&minimal("cli", "run.sh")).unwrap();
        if m.group.is_empty() {
            m.group = m.name.clone();
        }
        assert_eq!(m.group, "img");
        assert_eq!(m.etl, EtlKind::Transform);
        assert_eq!(m.id(), "img.transform");
    }

    #[test]
    fn validate_rejects_missing_locator() {
        let m: PluginManifest =
            serde_json::from_str(r#"{"name": "x", "interface": "cli", "targets": ["jpg"]}"#)
                .unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn manifest_round_trips_required_fields() {
        let m: PluginManifest = serde_json::from_str(
            r#"{
                "name": "faces",
                "group": "ai-vision",
                "etl": "extract",
                "interface": "cli",
                "executable": "faces.py",
                "targets": ["faces"],
                "input_formats": ["jpg", "png"],
                "options": [{"name": "--confidence", "type": "float", "default": "0.8"}],
                "dependencies": [{"name": "opencv-python", "type": "python", "version": ">=4.8"}],
                "input_types": ["image"],
                "output_types": ["image"]
            }"#,
        )
        .unwrap();
        let json = serde_json::to_string(&m).unwrap();
        let back: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "faces");
        assert_eq!(back.group, "ai-vision");
        assert_eq!(back.etl, EtlKind::Extract);
        assert_eq!(back.id(), "ai-vision.extract");
        assert_eq!(back.input_formats, vec!["jpg", "png"]);
        assert_eq!(back.dependencies.len(), 1);
        assert_eq!(back.dependencies[0].r#type, DependencyKind::Python);
        assert_eq!(back.options[0].default.as_deref(), Some("0.8"));
    }
}
