//! Provider registry: maps a model id to the adapter that should serve it.
//!
//! Built once by the host and read-only afterwards; runs share it freely.
//! Explicit model routes always win. The naming heuristic is only a last
//! resort and lives here, never in the iteration loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use turnwright_config::{EngineConfig, ProviderConfig, ProviderKind};
use turnwright_core::{ProviderAdapter, ProviderError, ProviderHandle};

use crate::anthropic::AnthropicAdapter;
use crate::local::LocalAdapter;
use crate::responses::{ResponsesAdapter, ResponsesVariant};

struct Entry {
    name: String,
    kind: ProviderKind,
    adapter: Arc<dyn ProviderAdapter>,
}

/// Routes model ids to registered adapters.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, Entry>,
    routes: HashMap<String, String>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: ProviderKind,
        adapter: Arc<dyn ProviderAdapter>,
    ) {
        let id = adapter.id().to_string();
        self.entries.insert(
            id,
            Entry {
                name: name.into(),
                kind,
                adapter,
            },
        );
    }

    /// Route a model id to a registered provider explicitly.
    pub fn route(&mut self, model: impl Into<String>, provider_id: impl Into<String>) {
        self.routes.insert(model.into(), provider_id.into());
    }

    pub fn set_default(&mut self, provider_id: impl Into<String>) {
        self.default_provider = Some(provider_id.into());
    }

    /// Get a specific provider by id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.entries.get(provider_id).map(|e| e.adapter.clone())
    }

    /// List all registered provider ids with their kinds.
    pub fn list(&self) -> Vec<(&str, ProviderKind)> {
        self.entries
            .iter()
            .map(|(id, e)| (id.as_str(), e.kind))
            .collect()
    }

    /// Explicit model routes, sorted by model id.
    pub fn routes(&self) -> Vec<(&str, &str)> {
        let mut routes: Vec<(&str, &str)> = self
            .routes
            .iter()
            .map(|(m, p)| (m.as_str(), p.as_str()))
            .collect();
        routes.sort_unstable();
        routes
    }

    /// Resolve a model id to a provider handle.
    ///
    /// Precedence: explicit route, then the naming heuristic, then the
    /// default provider.
    pub fn resolve(&self, model: &str) -> Option<ProviderHandle> {
        if let Some(entry) = self.routes.get(model).and_then(|id| self.entries.get(id)) {
            debug!(model, provider = %entry.adapter.id(), "Resolved by explicit route");
            return Some(self.handle(entry, model));
        }

        let wire_model = strip_routing_prefix(model);
        if let Some(kind) = guess_kind(model) {
            if let Some(entry) = self.entries.values().find(|e| e.kind == kind) {
                debug!(model, provider = %entry.adapter.id(), ?kind, "Resolved by model name");
                return Some(self.handle(entry, wire_model));
            }
        }

        let entry = self
            .default_provider
            .as_deref()
            .and_then(|id| self.entries.get(id))?;
        debug!(model, provider = %entry.adapter.id(), "Resolved to default provider");
        Some(self.handle(entry, wire_model))
    }

    fn handle(&self, entry: &Entry, model: &str) -> ProviderHandle {
        ProviderHandle::new(entry.name.clone(), model, entry.adapter.clone())
    }
}

/// Fixed-precedence naming heuristic.
///
/// Local markers beat vendor names so `ollama/claude-distill` stays local.
fn guess_kind(model: &str) -> Option<ProviderKind> {
    let m = model.to_lowercase();

    if m.starts_with("ollama/") || m.starts_with("local/") || m.contains(':') {
        return Some(ProviderKind::Local);
    }
    if m.starts_with("anthropic/") || m.contains("claude") {
        return Some(ProviderKind::Anthropic);
    }
    if m.starts_with("openai/")
        || m.starts_with("gpt-")
        || ["o1", "o3", "o4"]
            .iter()
            .any(|p| m == *p || m.starts_with(&format!("{p}-")))
    {
        return Some(ProviderKind::Responses);
    }
    if m.starts_with("grok") || m.starts_with("xai/") || m.starts_with("azure/") {
        return Some(ProviderKind::ResponsesCompat);
    }
    None
}

/// Drop a routing prefix the backend itself would not recognize.
fn strip_routing_prefix(model: &str) -> &str {
    for prefix in ["ollama/", "local/", "anthropic/", "openai/"] {
        if let Some(rest) = model.strip_prefix(prefix) {
            return rest;
        }
    }
    model
}

/// Build one adapter from its configuration section.
fn build_adapter(
    id: &str,
    config: &ProviderConfig,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        ProviderKind::Anthropic => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| ProviderError::NotConfigured(format!("{id}: missing api_key")))?;
            let base = AnthropicAdapter::new(key)?;
            let hints = apply_override(config, base.performance_hints(""));
            Arc::new(
                base.with_id(id)
                    .with_base_url(config.api_url())
                    .with_hints(hints),
            )
        }
        ProviderKind::Responses | ProviderKind::ResponsesCompat => {
            let variant = if config.kind == ProviderKind::Responses {
                ResponsesVariant::Native
            } else {
                ResponsesVariant::Compat
            };
            if variant == ResponsesVariant::Native && config.api_key.is_none() {
                return Err(ProviderError::NotConfigured(format!("{id}: missing api_key")));
            }
            let base = ResponsesAdapter::new(variant, config.api_key.clone())?;
            let hints = apply_override(config, base.performance_hints(""));
            Arc::new(
                base.with_id(id)
                    .with_base_url(config.api_url())
                    .with_hints(hints),
            )
        }
        ProviderKind::Local => {
            let base = LocalAdapter::new(Some(config.api_url()))?;
            let hints = apply_override(config, base.performance_hints(""));
            Arc::new(
                base.with_id(id)
                    .with_api_key(config.api_key.clone())
                    .with_no_tool_models(config.no_tool_models.clone())
                    .with_hints(hints),
            )
        }
    };
    Ok(adapter)
}

fn apply_override(
    config: &ProviderConfig,
    hints: turnwright_core::PerformanceHints,
) -> turnwright_core::PerformanceHints {
    match &config.hints {
        Some(o) => o.apply(hints),
        None => hints,
    }
}

/// Build the registry from configuration.
///
/// Providers that cannot be built (e.g. no API key) are skipped with a
/// warning; the rest stay usable.
pub fn build_from_config(config: &EngineConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    for (id, provider_config) in &config.providers {
        match build_adapter(id, provider_config) {
            Ok(adapter) => {
                let name = provider_config.name.clone().unwrap_or_else(|| id.clone());
                registry.register(name, provider_config.kind, adapter);
                for model in &provider_config.models {
                    registry.route(model.clone(), id.clone());
                }
            }
            Err(e) => warn!(provider = %id, error = %e, "Skipping provider"),
        }
    }

    if let Some(handle) = registry.resolve(&config.default_model) {
        registry.set_default(handle.id);
    } else if let Some(first) = registry.entries.keys().next().cloned() {
        registry.set_default(first);
    }

    info!(
        providers = registry.entries.len(),
        routes = registry.routes.len(),
        "Provider registry ready"
    );
    registry
}
