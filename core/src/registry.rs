//! file: core/src/registry.rs
//! description: in-memory index of loaded plugin handles.
//!
//! The registry owns the `Arc<dyn Plugin>` handles built from discovered
//! manifests, the user-configurable `target -> group` default mapping, and
//! the set of plugins marked unusable by a failed dependency install.

use crate::cli_loader::{is_cli_manifest, CliPlugin};
use crate::deps::DepManager;
use crate::manifest::PluginManifest;
use crate::native_loader::{is_native_manifest, NativePlugin};
use crate::plugin::Plugin;
use crate::types::{EtlKind, PluginInfo};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub struct PluginRegistry {
    /// Registration order is resolution order.
    plugins: Vec<Arc<dyn Plugin>>,
    /// target (lowercase) -> plugin group (lowercase).
    defaults: BTreeMap<String, String>,
    /// Plugin names whose dependency install failed.
    unusable: HashSet<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry {
            plugins: Vec::new(),
            defaults: BTreeMap::new(),
            unusable: HashSet::new(),
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        debug!("registering plugin '{}'", plugin.info().id);
        self.plugins.push(plugin);
    }

    /// Build handles for a batch of discovered manifests. Manifests that
    /// match neither loader are skipped with a warning. CLI plugins get
    /// pointed at their dependency environment when one exists.
    pub fn load_manifests(&mut self, manifests: Vec<PluginManifest>, deps: Option<&DepManager>) {
        for manifest in manifests {
            if is_cli_manifest(&manifest) {
                let mut plugin = CliPlugin::new(manifest);
                if let Some(deps) = deps {
                    if let Some(env) = deps.get_env(&plugin.manifest().name) {
                        plugin.set_dep_env_dir(Some(env.env_dir.clone()));
                    }
                }
                self.register(Arc::new(plugin));
            } else if is_native_manifest(&manifest) {
                self.register(Arc::new(NativePlugin::new(manifest)));
            } else {
                warn!(
                    "manifest '{}' matches no loader backend (interface/locator mismatch)",
                    manifest.name
                );
            }
        }
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let lower = name.to_ascii_lowercase();
        self.plugins
            .iter()
            .find(|p| p.info().name.to_ascii_lowercase() == lower)
            .cloned()
    }

    pub fn list_info(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|p| p.info()).collect()
    }

    pub fn list_for_target(&self, target: &str) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .filter(|p| p.supports_target(target))
            .map(|p| p.info())
            .collect()
    }

    /// Union of targets across plugins of one ETL kind, sorted and deduped.
    pub fn supported_targets(&self, etl: EtlKind) -> Vec<String> {
        let mut targets: Vec<String> = self
            .plugins
            .iter()
            .map(|p| p.info())
            .filter(|info| info.etl == etl)
            .flat_map(|info| info.targets)
            .map(|t| t.to_ascii_lowercase())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Union of accepted input formats across plugins of one ETL kind.
    pub fn supported_inputs(&self, etl: EtlKind) -> Vec<String> {
        let mut formats: Vec<String> = self
            .plugins
            .iter()
            .map(|p| p.info())
            .filter(|info| info.etl == etl)
            .flat_map(|info| info.input_formats)
            .map(|f| f.to_ascii_lowercase())
            .collect();
        formats.sort();
        formats.dedup();
        formats
    }

    pub fn set_default(&mut self, target: &str, group: &str) {
        self.defaults
            .insert(target.to_ascii_lowercase(), group.to_ascii_lowercase());
    }

    pub fn get_default(&self, target: &str) -> Option<&str> {
        self.defaults.get(&target.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn mark_unusable(&mut self, plugin_name: &str) {
        self.unusable.insert(plugin_name.to_string());
    }

    pub fn is_unusable(&self, plugin_name: &str) -> bool {
        self.unusable.contains(plugin_name)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::types::{ConvertOutcome, ConvertRequest, DataKind};
    use async_trait::async_trait;

    struct MockPlugin {
        info: PluginInfo,
    }

    #[async_trait]
    impl Plugin for MockPlugin {
        fn info(&self) -> PluginInfo {
            self.info.clone()
        }

        async fn execute(
            &self,
            _request: &ConvertRequest,
        ) -> Result<ConvertOutcome, PluginError> {
            Ok(ConvertOutcome::success("out", None))
        }
    }

    fn mock(name: &str, etl: EtlKind, targets: &[&str], inputs: &[&str]) -> Arc<dyn Plugin> {
        Arc::new(MockPlugin {
            info: PluginInfo {
                id: format!("{}.{}", name, etl),
                name: name.to_string(),
                group: name.to_string(),
                etl,
                targets: targets.iter().map(|s| s.to_string()).collect(),
                input_formats: inputs.iter().map(|s| s.to_string()).collect(),
                version: "1.0.0".to_string(),
                description: String::new(),
                builtin: false,
                input_types: vec![DataKind::File],
                output_types: vec![DataKind::File],
            },
        })
    }

    #[test]
    fn lookup_by_name_and_target() {
        let mut registry = PluginRegistry::new();
        registry.register(mock("magick", EtlKind::Transform, &["jpg", "png"], &["heic"]));
        registry.register(mock("ffmpeg", EtlKind::Transform, &["mp4", "gif"], &[]));

        assert!(registry.get_by_name("MAGICK").is_some());
        assert!(registry.get_by_name("vips").is_none());
        assert_eq!(registry.list_for_target("gif").len(), 1);
        assert_eq!(registry.list_for_target("tiff").len(), 0);
    }

    #[test]
    fn format_unions_are_etl_scoped() {
        let mut registry = PluginRegistry::new();
        registry.register(mock("magick", EtlKind::Transform, &["JPG", "png"], &["heic"]));
        registry.register(mock("faces", EtlKind::Extract, &["faces"], &["jpg", "png"]));

        assert_eq!(registry.supported_targets(EtlKind::Transform), vec!["jpg", "png"]);
        assert_eq!(registry.supported_targets(EtlKind::Extract), vec!["faces"]);
        assert_eq!(registry.supported_inputs(EtlKind::Extract), vec!["jpg", "png"]);
    }

    #[test]
    fn defaults_are_case_insensitive() {
        let mut registry = PluginRegistry::new();
        registry.set_default("JPG", "Magick");
        assert_eq!(registry.get_default("jpg"), Some("magick"));
    }

    #[test]
    fn unusable_marking() {
        let mut registry = PluginRegistry::new();
        assert!(!registry.is_unusable("magick"));
        registry.mark_unusable("magick");
        assert!(registry.is_unusable("magick"));
    }
}
