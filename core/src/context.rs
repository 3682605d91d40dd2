//! file: core/src/context.rs
//! description: explicit execution context threaded through call sites.
//!
//! No global mutable state anywhere: discovery results, the registry, the
//! clipboard bridge and the dependency base directory all live here and are
//! passed by reference.

use crate::clipboard::{ClipboardSink, SystemClipboard};
use crate::deps::DepManager;
use crate::discovery::PluginDiscovery;
use crate::registry::PluginRegistry;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Context {
    pub registry: PluginRegistry,
    pub clipboard: Arc<dyn ClipboardSink>,
    pub deps: DepManager,
}

impl Context {
    pub fn new(registry: PluginRegistry) -> Self {
        Context {
            registry,
            clipboard: Arc::new(SystemClipboard),
            deps: DepManager::new(DepManager::default_base_dir()),
        }
    }

    /// Discover plugins and build a ready-to-run context. `plugin_dir`
    /// overrides the standard search path when given.
    pub fn discover(plugin_dir: Option<PathBuf>) -> Self {
        let discovery = match plugin_dir {
            Some(dir) => PluginDiscovery::with_dirs(vec![dir]),
            None => PluginDiscovery::new(),
        };
        let deps = DepManager::new(DepManager::default_base_dir());
        let mut registry = PluginRegistry::new();
        registry.load_manifests(discovery.discover_all(), Some(&deps));
        Context { registry, clipboard: Arc::new(SystemClipboard), deps }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardSink>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_deps(mut self, deps: DepManager) -> Self {
        self.deps = deps;
        self
    }
}
