//! Metadata merging.
//!
//! Effective metadata for a render call is built from, in order:
//! 1. A copy of the document's metadata
//! 2. The explicitly set fields of the caller's override metadata
//! 3. The engine's default model, when no model is set
//! 4. The engine's per-model config table, when it has an entry for the model
//! 5. Tool definitions resolved from `tools`
//! 6. Schemas resolved from string references in `input.schema` / `output.schema`

use dotprompt_core::AppResult;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Metadata, ToolDefinition};

/// Caller-supplied lookup of tool definitions by name.
pub type ToolResolver = Arc<dyn Fn(&str) -> AppResult<Option<ToolDefinition>> + Send + Sync>;

/// Caller-supplied lookup of JSON schemas by name.
pub type SchemaResolver = Arc<dyn Fn(&str) -> AppResult<Option<Value>> + Send + Sync>;

/// Engine-level defaults and lookups used during the merge.
#[derive(Clone, Default)]
pub struct MetadataResolver {
    pub default_model: Option<String>,
    pub model_configs: HashMap<String, Map<String, Value>>,
    pub tools: HashMap<String, ToolDefinition>,
    pub tool_resolver: Option<ToolResolver>,
    pub schemas: HashMap<String, Value>,
    pub schema_resolver: Option<SchemaResolver>,
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("default_model", &self.default_model)
            .field("model_configs", &self.model_configs.keys())
            .field("tools", &self.tools.keys())
            .field("tool_resolver", &self.tool_resolver.is_some())
            .field("schemas", &self.schemas.keys())
            .field("schema_resolver", &self.schema_resolver.is_some())
            .finish()
    }
}

/// Per-merge memo so each resolver is asked about a name at most once.
#[derive(Default)]
struct LookupCache {
    tools: HashMap<String, Option<ToolDefinition>>,
    schemas: HashMap<String, Option<Value>>,
}

impl MetadataResolver {
    /// Merge document metadata with override metadata and engine defaults.
    ///
    /// Neither input is modified.
    pub fn merge(
        &self,
        document: Option<&Metadata>,
        overrides: Option<&Metadata>,
    ) -> AppResult<Metadata> {
        let mut merged = document.cloned().unwrap_or_default();

        if let Some(overrides) = overrides {
            merged.overlay(overrides);
        }

        if merged.model.is_none() {
            merged.model = self.default_model.clone();
        }

        if let Some(model) = &merged.model {
            if let Some(config) = self.model_configs.get(model) {
                tracing::trace!("Applying model config for '{}'", model);
                merged.config = Some(config.clone());
            }
        }

        let mut cache = LookupCache::default();

        if let Some(tools) = merged.tools.as_ref().filter(|t| !t.is_empty()) {
            let mut tool_defs = Vec::with_capacity(tools.len());
            for name in tools {
                match self.resolve_tool(name, &mut cache)? {
                    Some(def) => tool_defs.push(def),
                    None => tracing::warn!("Tool '{}' could not be resolved, dropping it", name),
                }
            }
            merged.tool_defs = Some(tool_defs);
        }

        if let Some(input) = merged.input.as_mut() {
            self.resolve_schema_ref(input, &mut cache)?;
        }
        if let Some(output) = merged.output.as_mut() {
            self.resolve_schema_ref(output, &mut cache)?;
        }

        Ok(merged)
    }

    /// Local tool map first, then the tool resolver.
    fn resolve_tool(
        &self,
        name: &str,
        cache: &mut LookupCache,
    ) -> AppResult<Option<ToolDefinition>> {
        if let Some(def) = self.tools.get(name) {
            return Ok(Some(def.clone()));
        }

        if let Some(cached) = cache.tools.get(name) {
            return Ok(cached.clone());
        }

        let resolved = match &self.tool_resolver {
            Some(resolver) => resolver(name)?,
            None => None,
        };
        cache.tools.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Local schema map first, then the schema resolver.
    fn resolve_schema(&self, name: &str, cache: &mut LookupCache) -> AppResult<Option<Value>> {
        if let Some(schema) = self.schemas.get(name) {
            return Ok(Some(schema.clone()));
        }

        if let Some(cached) = cache.schemas.get(name) {
            return Ok(cached.clone());
        }

        let resolved = match &self.schema_resolver {
            Some(resolver) => resolver(name)?,
            None => None,
        };
        cache.schemas.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Replace a string `schema` entry with the schema it names, if found.
    fn resolve_schema_ref(
        &self,
        section: &mut Map<String, Value>,
        cache: &mut LookupCache,
    ) -> AppResult<()> {
        let name = match section.get("schema") {
            Some(Value::String(name)) => name.clone(),
            _ => return Ok(()),
        };

        if let Some(schema) = self.resolve_schema(&name, cache)? {
            section.insert("schema".to_string(), schema);
        }
        Ok(())
    }
}
