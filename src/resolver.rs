//! Profile Resolver: recursive composition of upstream servers and nested
//! profiles into a flat, first-wins, cycle-checked resolved profile. The
//! ordered maps are built from `Vec<(String, T)>` rather than `indexmap`
//! (absent from this crate's dependency stack) to keep deterministic
//! insertion order.

use std::collections::HashMap;

use anyhow::{Result, bail};
use rmcp::model::{Prompt, Tool};

use crate::config::{GatewayConfig, ProfileSelection};
use crate::connector::Connector;
use crate::registry::ConnectorRegistry;

/// A resolved tool or prompt entry.
#[derive(Clone)]
pub struct ResolvedEntry<D> {
    pub connector_id: String,
    pub descriptor: D,
    pub original_name: String,
}

pub type ToolEntry = ResolvedEntry<Tool>;
pub type PromptEntry = ResolvedEntry<Prompt>;

/// The immutable, flat mapping produced by the resolver. Ordered maps
/// preserve resolution (first-wins) order.
#[derive(Clone, Default)]
pub struct ResolvedProfile {
    pub name: String,
    pub tools: Vec<(String, ToolEntry)>,
    pub prompts: Vec<(String, PromptEntry)>,
}

impl ResolvedProfile {
    pub fn tool(&self, exported_name: &str) -> Option<&ToolEntry> {
        self.tools
            .iter()
            .find(|(name, _)| name == exported_name)
            .map(|(_, entry)| entry)
    }

    pub fn prompt(&self, exported_name: &str) -> Option<&PromptEntry> {
        self.prompts
            .iter()
            .find(|(name, _)| name == exported_name)
            .map(|(_, entry)| entry)
    }
}

/// Resolves profile names against a live config + registry. One resolver per
/// request; its cache is never shared across requests.
pub struct ProfileResolver<'a> {
    config: &'a GatewayConfig,
    registry: &'a ConnectorRegistry,
    cache: HashMap<String, ResolvedProfile>,
}

impl<'a> ProfileResolver<'a> {
    pub fn new(config: &'a GatewayConfig, registry: &'a ConnectorRegistry) -> Self {
        Self {
            config,
            registry,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, name: &str) -> Result<ResolvedProfile> {
        let mut stack = Vec::new();
        self.resolve_inner(name, &mut stack).await
    }

    async fn resolve_inner(&mut self, name: &str, stack: &mut Vec<String>) -> Result<ResolvedProfile> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }

        if let Some(pos) = stack.iter().position(|entry| entry == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            bail!("circular profile reference: {}", cycle.join(" -> "));
        }

        let definition = self
            .config
            .profiles
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown profile: {name}"))?
            .clone();

        stack.push(name.to_string());

        let mut resolved = ResolvedProfile {
            name: name.to_string(),
            tools: Vec::new(),
            prompts: Vec::new(),
        };

        for (entry_name, selection) in &definition {
            if let Ok(connector) = self.registry.get(entry_name) {
                self.apply_server_entry(&mut resolved, connector, selection, name)
                    .await;
            } else if self.config.profiles.contains_key(entry_name) {
                let nested = Box::pin(self.resolve_inner(entry_name, stack)).await?;
                Self::apply_nested_profile(&mut resolved, &nested, selection);
            } else {
                stack.pop();
                bail!("profile '{name}': unknown server or profile '{entry_name}'");
            }
        }

        stack.pop();
        self.cache.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    async fn apply_server_entry(
        &self,
        resolved: &mut ResolvedProfile,
        connector: &Connector,
        selection: &ProfileSelection,
        profile_name: &str,
    ) {
        if let Err(error) = connector.ensure_ready().await {
            tracing::warn!(
                server = %connector.id(),
                profile = %profile_name,
                error = %error,
                "connector failed to initialise; contributing nothing to profile"
            );
            return;
        }

        let prefix = selection.prefix.resolve(&format!("{}__", connector.id()));

        let tools = match connector.list_tools().await {
            Ok(tools) => tools,
            Err(error) => {
                log_listing_failure(connector.id(), profile_name, &error, "tools");
                Vec::new()
            }
        };
        for tool in tools {
            let original_name = tool.name.to_string();
            if let Some(allow) = &selection.tools {
                if !allow.iter().any(|name| name == &original_name) {
                    continue;
                }
            }
            let exported = format!("{prefix}{original_name}");
            if resolved.tools.iter().any(|(name, _)| name == &exported) {
                continue;
            }
            let mut descriptor = tool;
            descriptor.name = exported.clone().into();
            resolved.tools.push((
                exported,
                ToolEntry {
                    connector_id: connector.id().to_string(),
                    descriptor,
                    original_name,
                },
            ));
        }

        let prompts = match connector.list_prompts().await {
            Ok(prompts) => prompts,
            Err(error) => {
                log_listing_failure(connector.id(), profile_name, &error, "prompts");
                Vec::new()
            }
        };
        for prompt in prompts {
            let original_name = prompt.name.clone();
            if let Some(allow) = &selection.prompts {
                if !allow.iter().any(|name| name == &original_name) {
                    continue;
                }
            }
            let exported = format!("{prefix}{original_name}");
            if resolved.prompts.iter().any(|(name, _)| name == &exported) {
                continue;
            }
            let mut descriptor = prompt;
            descriptor.name = exported.clone();
            resolved.prompts.push((
                exported,
                PromptEntry {
                    connector_id: connector.id().to_string(),
                    descriptor,
                    original_name,
                },
            ));
        }
    }

    fn apply_nested_profile(
        resolved: &mut ResolvedProfile,
        nested: &ResolvedProfile,
        selection: &ProfileSelection,
    ) {
        // Nested profiles default to no extra prefix — they were already
        // prefixed at their own level.
        let prefix = selection.prefix.resolve("");

        for (nested_exported, entry) in &nested.tools {
            if let Some(allow) = &selection.tools {
                if !allow.iter().any(|name| name == nested_exported) {
                    continue;
                }
            }
            let exported = format!("{prefix}{nested_exported}");
            if resolved.tools.iter().any(|(name, _)| name == &exported) {
                continue;
            }
            let mut descriptor = entry.descriptor.clone();
            descriptor.name = exported.clone().into();
            resolved.tools.push((
                exported,
                ToolEntry {
                    connector_id: entry.connector_id.clone(),
                    descriptor,
                    original_name: entry.original_name.clone(),
                },
            ));
        }

        for (nested_exported, entry) in &nested.prompts {
            if let Some(allow) = &selection.prompts {
                if !allow.iter().any(|name| name == nested_exported) {
                    continue;
                }
            }
            let exported = format!("{prefix}{nested_exported}");
            if resolved.prompts.iter().any(|(name, _)| name == &exported) {
                continue;
            }
            let mut descriptor = entry.descriptor.clone();
            descriptor.name = exported.clone();
            resolved.prompts.push((
                exported,
                PromptEntry {
                    connector_id: entry.connector_id.clone(),
                    descriptor,
                    original_name: entry.original_name.clone(),
                },
            ));
        }
    }
}

/// Method-not-found upstream listings become an empty contribution silently;
/// any other listing failure warns.
fn log_listing_failure(server_id: &str, profile: &str, error: &anyhow::Error, capability: &str) {
    let message = error.to_string();
    if message.to_ascii_lowercase().contains("method not found") {
        return;
    }
    tracing::warn!(
        server = %server_id,
        profile = %profile,
        error = %message,
        capability,
        "listing failed; treated as empty"
    );
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
