//! file: core/src/pipeline.rs
//! description: parsed pipeline model, structural validation and results.
//!
//! A pipeline is an ordered list of stages; a stage is an ordered list of
//! parallel elements. Validation enforces the cardinality rules between
//! consecutive stages before anything executes.

use crate::error::ParseError;
use crate::types::{CoreOptions, ResultStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const TEE_TARGET: &str = "tee";
pub const COLLECT_TARGET: &str = "collect";
pub const CLIPBOARD_TARGET: &str = "clipboard";
pub const PASSTHROUGH_TARGETS: [&str; 5] = ["_", "echo", "bypass", "pass", "noop"];

/// One comma-separated item within a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageElement {
    pub target: String,
    /// Explicit plugin hint: `name` or `group/name`.
    pub plugin: Option<String>,
    /// Explicit output extension from `target.ext` syntax.
    pub extension: Option<String>,
    /// Parsed `--key value` / `--key=value` / boolean options.
    pub options: BTreeMap<String, String>,
    /// Raw option tokens in declaration order, forwarded to the plugin.
    pub raw_options: Vec<String>,
}

impl StageElement {
    pub fn new(target: impl Into<String>) -> Self {
        StageElement { target: target.into(), ..Default::default() }
    }

    pub fn is_tee(&self) -> bool {
        self.target == TEE_TARGET
    }

    pub fn is_collect(&self) -> bool {
        self.target == COLLECT_TARGET
    }

    pub fn is_clipboard(&self) -> bool {
        self.target == CLIPBOARD_TARGET
    }

    pub fn is_passthrough(&self) -> bool {
        PASSTHROUGH_TARGETS.contains(&self.target.as_str())
    }

    /// Boolean-style option test: present with no value, "true" or "1".
    pub fn option_flag(&self, key: &str) -> bool {
        match self.options.get(key) {
            Some(v) => v.is_empty() || v == "true" || v == "1",
            None => false,
        }
    }
}

impl fmt::Display for StageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if let Some(ext) = &self.extension {
            write!(f, ".{}", ext)?;
        }
        if let Some(plugin) = &self.plugin {
            write!(f, "@{}", plugin)?;
        }
        for token in &self.raw_options {
            let already_quoted = token.contains('"') || token.contains('\'');
            if token.chars().any(char::is_whitespace) && !already_quoted {
                write!(f, " \"{}\"", token)?;
            } else {
                write!(f, " {}", token)?;
            }
        }
        Ok(())
    }
}

/// One `|`-separated segment of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStage {
    pub elements: Vec<StageElement>,
}

impl PipelineStage {
    pub fn new(elements: Vec<StageElement>) -> Self {
        PipelineStage { elements }
    }

    pub fn cardinality(&self) -> usize {
        self.elements.len()
    }

    pub fn is_single(&self) -> bool {
        self.elements.len() == 1
    }

    pub fn has_tee(&self) -> bool {
        self.elements.iter().any(StageElement::is_tee)
    }

    pub fn has_collect(&self) -> bool {
        self.elements.iter().any(StageElement::is_collect)
    }

    pub fn has_clipboard(&self) -> bool {
        self.elements.iter().any(StageElement::is_clipboard)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.elements.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A complete pipeline from a source to its final outputs.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub source: PathBuf,
    pub stages: Vec<PipelineStage>,
    pub core_options: CoreOptions,
    /// Format hint used when the source cannot be sniffed.
    pub input_format: Option<String>,
}

impl Pipeline {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Structural validation of the stage cardinality rules. Errors carry
    /// the offending stage index.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.stages.is_empty() {
            return Err(ParseError::Empty);
        }

        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.elements.is_empty() {
                return Err(ParseError::stage(idx, "stage has no elements"));
            }
            if stage.has_tee() && !stage.is_single() {
                return Err(ParseError::stage(idx, "'tee' must be the only element of its stage"));
            }
            if stage.has_collect() && !stage.is_single() {
                return Err(ParseError::stage(
                    idx,
                    "'collect' must be the only element of its stage",
                ));
            }
        }

        // tee needs consumers
        if self.stages.last().is_some_and(PipelineStage::has_tee) {
            return Err(ParseError::stage(
                self.stages.len() - 1,
                "'tee' cannot be the last stage (needs consumers)",
            ));
        }

        for i in 0..self.stages.len() - 1 {
            let current = &self.stages[i];
            let next = &self.stages[i + 1];
            let a = current.cardinality();
            let b = next.cardinality();

            // collect legally fans any width in
            if next.has_collect() {
                continue;
            }
            if a == b {
                continue;
            }
            if a == 1 && current.has_tee() {
                continue;
            }
            if a == 1 && b > 1 {
                return Err(ParseError::stage(
                    i,
                    format!(
                        "stage has 1 element but stage {} has {} (use 'tee' to branch)",
                        i + 1,
                        b
                    ),
                ));
            }
            return Err(ParseError::stage(
                i,
                format!(
                    "stage has {} elements but stage {} has {} (widths must match, or \
                     use 'collect')",
                    a,
                    i + 1,
                    b
                ),
            ));
        }

        // An explicit --output without an extension cannot name more than
        // one terminal file.
        if let Some(output) = &self.core_options.output {
            let terminal = self
                .stages
                .last()
                .map(PipelineStage::cardinality)
                .unwrap_or(0);
            if terminal > 1 && output.extension().is_none() {
                return Err(ParseError::stage(
                    self.stages.len() - 1,
                    "--output without an extension is ambiguous for a terminal stage with \
                     multiple elements",
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join(" | "))
    }
}

/// Outcome of one executed node, reported per stage element.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: usize,
    pub target: String,
    pub plugin: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Structured result of a complete pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub pipeline: Vec<StageResult>,
    pub final_outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
