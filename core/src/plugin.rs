//! file: core/src/plugin.rs
//! description: the uniform plugin handle trait implemented by both loader
//! backends.
//!
//! The resolver and executor only ever see `Arc<dyn Plugin>`; whether a
//! handle spawns a subprocess or calls into a shared library is a loader
//! detail.

use crate::error::PluginError;
use crate::types::{ConvertOutcome, ConvertRequest, PluginInfo};
use async_trait::async_trait;

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Identity and capability projection of this plugin.
    fn info(&self) -> PluginInfo;

    /// Case-insensitive membership test against the manifest's target list.
    fn supports_target(&self, target: &str) -> bool {
        let lower = target.to_ascii_lowercase();
        self.info().targets.iter().any(|t| t.to_ascii_lowercase() == lower)
    }

    /// Accepted-input test. An empty accepted-formats list means accept all.
    fn supports_input(&self, format: &str) -> bool {
        let info = self.info();
        if info.input_formats.is_empty() {
            return true;
        }
        let lower = format.to_ascii_lowercase();
        info.input_formats.iter().any(|f| f.to_ascii_lowercase() == lower)
    }

    /// Run one conversion. Each invocation is independent; CLI-backed
    /// plugins spawn a fresh process per call.
    async fn execute(&self, request: &ConvertRequest) -> Result<ConvertOutcome, PluginError>;
}
