//! Render context construction.
//!
//! The context handed to Handlebars is a flat JSON object. Keys are layered,
//! later layers overriding earlier ones:
//! 1. `@metadata` (`prompt`, `docs`, `messages`)
//! 2. Built-in defaults (`name`)
//! 3. State: defaults, then `data.context.state`, then `metadata.ext.state`,
//!    exposed whole under `@state` and flattened one level into the context
//! 4. `metadata.input.default`
//! 5. `data.input`

use serde_json::{json, Map, Value};

use crate::types::{DataArgument, Metadata};

/// Reserved key holding the merged state object.
pub const STATE_KEY: &str = "@state";

/// Reserved key holding effective metadata, docs and history.
pub const METADATA_KEY: &str = "@metadata";

/// Extension namespace whose fields are merged into state.
const STATE_NAMESPACE: &str = "state";

fn default_context() -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("name".to_string(), json!("User"));
    context
}

fn default_state() -> Map<String, Value> {
    let mut state = Map::new();
    state.insert("count".to_string(), json!(0));
    state.insert("status".to_string(), json!(""));
    state
}

fn merge_into(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Merge default, caller and metadata state, in that order.
pub fn build_state(data: &DataArgument, metadata: &Metadata) -> Map<String, Value> {
    let mut state = default_state();

    if let Some(caller_state) = data.state() {
        merge_into(&mut state, caller_state);
    }

    if let Some(ext_state) = metadata.ext_namespace(STATE_NAMESPACE) {
        merge_into(&mut state, ext_state);
    }

    state
}

/// Build the flat render context for one render call.
pub fn build_context(data: &DataArgument, metadata: &Metadata) -> Map<String, Value> {
    let mut context = Map::new();

    context.insert(
        METADATA_KEY.to_string(),
        json!({
            "prompt": metadata,
            "docs": data.docs,
            "messages": data.messages,
        }),
    );

    merge_into(&mut context, &default_context());

    let state = build_state(data, metadata);
    for (key, value) in &state {
        match value {
            // Nested objects lose their outer key
            Value::Object(nested) => merge_into(&mut context, nested),
            other => {
                context.insert(key.clone(), other.clone());
            }
        }
    }
    context.insert(STATE_KEY.to_string(), Value::Object(state));

    if let Some(Value::Object(defaults)) = metadata.input.as_ref().and_then(|i| i.get("default")) {
        merge_into(&mut context, defaults);
    }

    if let Some(input) = &data.input {
        merge_into(&mut context, input);
    }

    tracing::trace!("Built render context with {} keys", context.len());
    context
}
