//! file: core/src/types.rs
//! description: shared value types for requests, results and plugin metadata.
//!
//! These types cross every layer boundary: the executor builds
//! `ConvertRequest`s, both loader backends return `ConvertOutcome`s, and the
//! registry/resolver trade in `PluginInfo` projections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The three plugin action kinds. `Transform` rewrites an artifact into a
/// target format, `Extract` pulls derived data out of one, `Load` pushes an
/// artifact to an external destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtlKind {
    Transform,
    Extract,
    Load,
}

impl EtlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EtlKind::Transform => "transform",
            EtlKind::Extract => "extract",
            EtlKind::Load => "load",
        }
    }

    /// Parse from a string, accepting the single-letter shorthands used on
    /// the command line.
    pub fn parse(s: &str) -> Option<EtlKind> {
        match s {
            "transform" | "t" => Some(EtlKind::Transform),
            "extract" | "e" => Some(EtlKind::Extract),
            "load" | "l" => Some(EtlKind::Load),
            _ => None,
        }
    }
}

impl fmt::Display for EtlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome status of a single plugin invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
            ResultStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse data-type tag used as a compatibility hint between pipeline
/// neighbours. `File` is the wildcard: compatible with everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Image,
    Video,
    Audio,
    Document,
    Text,
    File,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Image => "image",
            DataKind::Video => "video",
            DataKind::Audio => "audio",
            DataKind::Document => "document",
            DataKind::Text => "text",
            DataKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<DataKind> {
        match s {
            "image" => Some(DataKind::Image),
            "video" => Some(DataKind::Video),
            "audio" => Some(DataKind::Audio),
            "document" => Some(DataKind::Document),
            "text" => Some(DataKind::Text),
            "file" => Some(DataKind::File),
            _ => None,
        }
    }

    /// Type compatibility per the resolver rules: a direct match, or either
    /// side being the generic `File` tag.
    pub fn compatible(a: DataKind, b: DataKind) -> bool {
        a == b || a == DataKind::File || b == DataKind::File
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options shared across the whole invocation, as opposed to options that
/// belong to one pipeline element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl CoreOptions {
    /// Flatten into a string map for the option-accessor side of the plugin
    /// ABI. Only set fields appear.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(out) = &self.output {
            map.insert("output".to_string(), out.display().to_string());
        }
        if self.force {
            map.insert("force".to_string(), "true".to_string());
        }
        if self.dry_run {
            map.insert("dry-run".to_string(), "true".to_string());
        }
        if self.verbose {
            map.insert("verbose".to_string(), "true".to_string());
        }
        map
    }
}

/// A single conversion request handed to a plugin backend.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub etl: EtlKind,
    pub source: PathBuf,
    pub target: String,
    pub output: Option<PathBuf>,
    pub force: bool,
    pub dry_run: bool,
    /// Core option accessor map (quality of life for native plugins).
    pub core_options: BTreeMap<String, String>,
    /// Parsed plugin-specific options.
    pub plugin_options: BTreeMap<String, String>,
    /// Raw option tokens in declaration order, forwarded verbatim to CLI
    /// plugins after the `--` separator.
    pub raw_options: Vec<String>,
}

impl ConvertRequest {
    pub fn new(etl: EtlKind, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        ConvertRequest {
            etl,
            source: source.into(),
            target: target.into(),
            output: None,
            force: false,
            dry_run: false,
            core_options: BTreeMap::new(),
            plugin_options: BTreeMap::new(),
            raw_options: Vec::new(),
        }
    }
}

/// Outcome of a single plugin invocation.
///
/// `output` is whatever path the plugin reported; it may differ from the
/// requested output path and is honored as-is. `outputs` carries scatter
/// results when the plugin produced more than one file.
#[derive(Debug, Clone, Default)]
pub struct ConvertOutcome {
    pub status: Option<ResultStatus>,
    pub output: Option<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub output_size: Option<u64>,
    pub error: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl ConvertOutcome {
    pub fn status(&self) -> ResultStatus {
        self.status.unwrap_or(ResultStatus::Error)
    }

    pub fn success(output: impl Into<PathBuf>, output_size: Option<u64>) -> Self {
        ConvertOutcome {
            status: Some(ResultStatus::Success),
            output: Some(output.into()),
            output_size,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ConvertOutcome {
            status: Some(ResultStatus::Error),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn skipped(output: impl Into<PathBuf>) -> Self {
        ConvertOutcome {
            status: Some(ResultStatus::Skipped),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// All paths the plugin produced, scatter-aware. A single `output` with
    /// no scatter list yields one entry.
    pub fn all_outputs(&self) -> Vec<PathBuf> {
        if !self.outputs.is_empty() {
            self.outputs.clone()
        } else {
            self.output.iter().cloned().collect()
        }
    }
}

/// Public projection of a plugin for listings and resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Stable identity: `group.etl`.
    pub id: String,
    pub name: String,
    pub group: String,
    pub etl: EtlKind,
    pub targets: Vec<String>,
    /// Accepted input formats; empty means accept all.
    pub input_formats: Vec<String>,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub builtin: bool,
    #[serde(default)]
    pub input_types: Vec<DataKind>,
    #[serde(default)]
    pub output_types: Vec<DataKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etl_kind_accepts_shorthand() {
        assert_eq!(EtlKind::parse("t"), Some(EtlKind::Transform));
        assert_eq!(EtlKind::parse("extract"), Some(EtlKind::Extract));
        assert_eq!(EtlKind::parse("x"), None);
    }

    #[test]
    fn data_kind_file_is_wildcard() {
        assert!(DataKind::compatible(DataKind::File, DataKind::Image));
        assert!(DataKind::compatible(DataKind::Audio, DataKind::File));
        assert!(!DataKind::compatible(DataKind::Audio, DataKind::Image));
    }

    #[test]
    fn outcome_all_outputs_prefers_scatter_list() {
        let mut outcome = ConvertOutcome::success("a.jpg", None);
        assert_eq!(outcome.all_outputs().len(), 1);
        outcome.outputs = vec![PathBuf::from("a_0.jpg"), PathBuf::from("a_1.jpg")];
        assert_eq!(outcome.all_outputs().len(), 2);
    }
}
