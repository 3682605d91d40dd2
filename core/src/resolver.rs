//! file: core/src/resolver.rs
//! description: priority-ordered plugin selection for a stage element.
//!
//! Resolution rules, first match wins:
//!   1. explicit `@plugin` hint — if the named plugin is missing or does not
//!      support the target, fail immediately, no fall-through
//!   2. user default mapping for the target
//!   3. target + compatible data types + accepted input format
//!   4. target + compatible data types
//!   5. target membership alone
//! All comparisons are case-insensitive. The matched rule is reported for
//! debug output.

use crate::error::ResolveError;
use crate::plugin::Plugin;
use crate::registry::PluginRegistry;
use crate::types::DataKind;
use log::debug;
use std::sync::Arc;

/// Everything known about the pipeline position being resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub target: String,
    /// Sniffed format of the node's input, when known.
    pub input_format: Option<String>,
    /// Coarse data types of the input, when known.
    pub input_types: Vec<DataKind>,
    /// Explicit `name` or `group/name` hint from the pipeline expression.
    pub explicit_plugin: Option<String>,
}

/// Which rule produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Explicit,
    Default,
    TypeAndFormat,
    Type,
    Target,
}

impl MatchedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedBy::Explicit => "explicit",
            MatchedBy::Default => "default",
            MatchedBy::TypeAndFormat => "type+format",
            MatchedBy::Type => "type",
            MatchedBy::Target => "target",
        }
    }
}

pub struct Resolution {
    pub plugin: Arc<dyn Plugin>,
    pub matched_by: MatchedBy,
}

pub struct PluginResolver;

impl PluginResolver {
    pub fn resolve(
        registry: &PluginRegistry,
        context: &ResolutionContext,
    ) -> Result<Resolution, ResolveError> {
        let target = context.target.to_ascii_lowercase();

        if let Some(hint) = &context.explicit_plugin {
            return match find_by_explicit(registry, hint, &target) {
                Some(plugin) => Ok(done(plugin, MatchedBy::Explicit, context)),
                None => Err(ResolveError::ExplicitNotFound {
                    hint: hint.clone(),
                    target: context.target.clone(),
                }),
            };
        }

        if let Some(plugin) = find_by_default(registry, &target) {
            return Ok(done(plugin, MatchedBy::Default, context));
        }

        if let Some(format) = context.input_format.as_deref().filter(|f| !f.is_empty()) {
            if let Some(plugin) = find_by_type_and_format(registry, context, &target, format) {
                return Ok(done(plugin, MatchedBy::TypeAndFormat, context));
            }
        }

        if !context.input_types.is_empty() {
            if let Some(plugin) = find_by_type(registry, context, &target) {
                return Ok(done(plugin, MatchedBy::Type, context));
            }
        }

        match registry.plugins().iter().find(|p| p.supports_target(&target)) {
            Some(plugin) => Ok(done(Arc::clone(plugin), MatchedBy::Target, context)),
            None => Err(ResolveError::NoPlugin { target: context.target.clone() }),
        }
    }
}

fn done(plugin: Arc<dyn Plugin>, matched_by: MatchedBy, context: &ResolutionContext) -> Resolution {
    debug!(
        "resolved target '{}' to plugin '{}' via {}",
        context.target,
        plugin.info().name,
        matched_by.as_str()
    );
    Resolution { plugin, matched_by }
}

fn find_by_explicit(
    registry: &PluginRegistry,
    hint: &str,
    target: &str,
) -> Option<Arc<dyn Plugin>> {
    let hint = hint.to_ascii_lowercase();
    let (want_group, want_name) = match hint.split_once('/') {
        Some((group, name)) => (Some(group.to_string()), name.to_string()),
        None => (None, hint),
    };

    registry
        .plugins()
        .iter()
        .find(|p| {
            let info = p.info();
            let name_match = info.name.to_ascii_lowercase() == want_name;
            let group_match = want_group
                .as_deref()
                .map_or(true, |g| info.group.to_ascii_lowercase() == g);
            name_match && group_match && p.supports_target(target)
        })
        .cloned()
}

fn find_by_default(registry: &PluginRegistry, target: &str) -> Option<Arc<dyn Plugin>> {
    let group = registry.get_default(target)?.to_string();
    registry
        .plugins()
        .iter()
        .find(|p| p.info().group.to_ascii_lowercase() == group && p.supports_target(target))
        .cloned()
}

fn find_by_type_and_format(
    registry: &PluginRegistry,
    context: &ResolutionContext,
    target: &str,
    format: &str,
) -> Option<Arc<dyn Plugin>> {
    registry
        .plugins()
        .iter()
        .find(|p| {
            p.supports_target(target)
                && types_compatible(&context.input_types, &p.info().input_types)
                && p.supports_input(format)
        })
        .cloned()
}

fn find_by_type(
    registry: &PluginRegistry,
    context: &ResolutionContext,
    target: &str,
) -> Option<Arc<dyn Plugin>> {
    registry
        .plugins()
        .iter()
        .find(|p| {
            p.supports_target(target)
                && types_compatible(&context.input_types, &p.info().input_types)
        })
        .cloned()
}

/// Empty on either side means "unknown"/"accepts anything"; the generic
/// `File` tag is compatible with everything.
fn types_compatible(input_types: &[DataKind], plugin_types: &[DataKind]) -> bool {
    if input_types.is_empty() || plugin_types.is_empty() {
        return true;
    }
    input_types
        .iter()
        .any(|a| plugin_types.iter().any(|b| DataKind::compatible(*a, *b)))
}
