//! file: core/src/error.rs
//! description: error taxonomy for the pipeline subsystem and plugin layer.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed pipeline expression or failed structural validation. Always
/// surfaced before any execution starts.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("invalid pipeline syntax: {0}")]
    Syntax(String),

    #[error("pipeline has no stages")]
    Empty,

    #[error("stage {stage}: {message}")]
    Stage { stage: usize, message: String },
}

impl ParseError {
    pub fn stage(stage: usize, message: impl Into<String>) -> Self {
        ParseError::Stage { stage, message: message.into() }
    }
}

/// No plugin could be selected for a stage element.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("plugin '{hint}' not found or does not support target '{target}'")]
    ExplicitNotFound { hint: String, target: String },

    #[error("no plugin found for target '{target}'")]
    NoPlugin { target: String },
}

/// A plugin invocation failed: process-level, protocol-level or reported by
/// the plugin itself.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("failed to open plugin library {path}: {reason}")]
    LibraryOpen { path: PathBuf, reason: String },

    #[error("missing required symbol '{symbol}' in {path}")]
    MissingSymbol { symbol: String, path: PathBuf },

    #[error("plugin ABI version {found} does not match host version {expected}")]
    AbiMismatch { found: u32, expected: u32 },

    #[error("plugin execution timed out after {0} seconds")]
    Timeout(u64),

    #[error("plugin produced invalid output: {0}")]
    Protocol(String),

    #[error("plugin '{0}' is unusable: dependency installation failed")]
    Unusable(String),

    #[error("plugin reported an error: {0}")]
    Reported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Dependency environment problems. Checks produce warnings rather than
/// errors; installs can fail hard.
#[derive(Debug, Error)]
pub enum DepError {
    #[error("failed to create environment for '{plugin}': {reason}")]
    EnvCreate { plugin: String, reason: String },

    #[error("failed to install {package}: {reason}")]
    Install { package: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("stage {stage} ({target}): {source}")]
    Resolve {
        stage: usize,
        target: String,
        #[source]
        source: ResolveError,
    },

    #[error("stage {stage} ({target}): {source}")]
    Plugin {
        stage: usize,
        target: String,
        #[source]
        source: PluginError,
    },

    #[error("stage {stage} ({target}): {message}")]
    Stage { stage: usize, target: String, message: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }
}
