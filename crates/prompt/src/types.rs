//! Prompt types for the dotprompt pipeline.
//!
//! This module defines the documents, metadata, data arguments and messages
//! that flow through compile and render.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use dotprompt_core::AppResult;

/// A parsed prompt document: front-matter metadata plus the template body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Metadata from the front matter
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Handlebars template body
    pub template: String,
}

impl Document {
    /// Create a document from metadata and a template body.
    pub fn new(metadata: Metadata, template: impl Into<String>) -> Self {
        Self {
            metadata,
            template: template.into(),
        }
    }
}

/// Prompt metadata.
///
/// Every field is optional: `None` means unset (eligible for defaults and
/// overrides), `Some` means explicitly set, even when the value is empty.
/// Unknown front-matter keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model identifier (e.g. "googleai/gemini-1.5-pro")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Model configuration (temperature, topK, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,

    /// Names of tools the prompt may call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,

    /// Resolved tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_defs: Option<Vec<ToolDefinition>>,

    /// Input settings (`schema`, `default`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,

    /// Output settings (`format`, `schema`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,

    /// The front matter exactly as parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,

    /// Namespaced extension fields (`ns.field` keys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<BTreeMap<String, Map<String, Value>>>,

    /// Arbitrary user metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Pass-through fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! overlay_fields {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$source.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

impl Metadata {
    /// Copy every explicitly set field of `other` onto `self`.
    ///
    /// Unset fields in `other` never erase fields of `self`.
    pub fn overlay(&mut self, other: &Metadata) {
        overlay_fields!(
            self,
            other,
            name,
            variant,
            version,
            description,
            model,
            config,
            tools,
            tool_defs,
            input,
            output,
            raw,
            ext,
            metadata,
        );

        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Look up one namespace of extension fields.
    pub fn ext_namespace(&self, namespace: &str) -> Option<&Map<String, Value>> {
        self.ext.as_ref().and_then(|ext| ext.get(namespace))
    }

    /// Builder: set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builder: set the model configuration.
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builder: set the tool names.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: set one extension namespace.
    pub fn with_ext(mut self, namespace: impl Into<String>, fields: Map<String, Value>) -> Self {
        self.ext
            .get_or_insert_with(BTreeMap::new)
            .insert(namespace.into(), fields);
        self
    }
}

/// A tool the model may call.
///
/// Two definitions are equal when their names are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolDefinition {
    /// Create a tool definition with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            extra: Map::new(),
        }
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl PartialEq for ToolDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ToolDefinition {}

/// Runtime data passed to a render call.
///
/// Build it with [`DataArgument::new`] and the `with_*` methods, or from a
/// JSON mapping with [`DataArgument::from_value`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataArgument {
    /// Template input variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,

    /// Ambient context, including `state`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextData>,

    /// Conversation history, expanded at `{{history}}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    /// Retrieved documents exposed under `@metadata.docs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<Vec<Value>>,
}

/// The `context` portion of a [`DataArgument`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataArgument {
    /// Create an empty data argument.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a data argument from a JSON mapping.
    pub fn from_value(value: Value) -> AppResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Builder: set the input variables.
    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = Some(input);
        self
    }

    /// Builder: set `context.state`.
    pub fn with_state(mut self, state: Map<String, Value>) -> Self {
        self.context.get_or_insert_with(ContextData::default).state = Some(state);
        self
    }

    /// Builder: set the conversation history.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// The caller-supplied state, if any.
    pub fn state(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref().and_then(|c| c.state.as_ref())
    }
}

/// A message role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
    Tool,
    #[serde(untagged)]
    Custom(String),
}

impl Role {
    /// Parse a role name as written in a role marker.
    pub fn from_name(name: &str) -> Self {
        match name {
            "user" => Role::User,
            "model" => Role::Model,
            "system" => Role::System,
            "tool" => Role::Tool,
            other => Role::Custom(other.to_string()),
        }
    }

    /// The role name as written in a role marker.
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media reference inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPart {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    Media { media: MediaPart },
    Pending { metadata: Map<String, Value> },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// The text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A structured prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: Vec<Part>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Create a message from a role and parts.
    pub fn new(role: Role, content: Vec<Part>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Part::as_text).collect()
    }

    /// The `metadata.purpose` tag, if set.
    pub fn purpose(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("purpose"))
            .and_then(Value::as_str)
    }
}

/// The result of rendering a compiled prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    /// Effective metadata after merging
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Assembled messages
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_keeps_unset_fields() {
        let mut base = Metadata::default().with_model("m1");
        let mut config = Map::new();
        config.insert("temp".to_string(), json!(0.5));
        let over = Metadata::default().with_config(config.clone());

        base.overlay(&over);

        assert_eq!(base.model.as_deref(), Some("m1"));
        assert_eq!(base.config, Some(config));
    }

    #[test]
    fn test_overlay_explicit_empty_wins() {
        let mut base = Metadata::default().with_tools(["search"]);
        let over = Metadata {
            tools: Some(Vec::new()),
            ..Default::default()
        };

        base.overlay(&over);

        assert_eq!(base.tools, Some(Vec::new()));
    }

    #[test]
    fn test_metadata_deserialization() {
        let meta: Metadata = serde_json::from_value(json!({
            "model": "m1",
            "toolDefs": [{"name": "search", "description": "web"}],
            "custom": true
        }))
        .unwrap();

        assert_eq!(meta.model.as_deref(), Some("m1"));
        assert_eq!(meta.tool_defs.unwrap()[0].name, "search");
        assert_eq!(meta.extra["custom"], json!(true));
        assert!(meta.config.is_none());
    }

    #[test]
    fn test_tool_equality_by_name() {
        let a = ToolDefinition::new("search").with_description("one");
        let b = ToolDefinition::new("search").with_description("two");
        assert_eq!(a, b);
        assert_ne!(a, ToolDefinition::new("other"));
    }

    #[test]
    fn test_data_argument_from_value() {
        let data = DataArgument::from_value(json!({
            "input": {"name": "Bob"},
            "context": {"state": {"count": 5}, "auth": "x"}
        }))
        .unwrap();

        assert_eq!(data.input.as_ref().unwrap()["name"], json!("Bob"));
        assert_eq!(data.state().unwrap()["count"], json!(5));
        assert_eq!(data.context.unwrap().extra["auth"], json!("x"));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_value(Role::Model).unwrap(), json!("model"));
        assert_eq!(
            serde_json::from_value::<Role>(json!("narrator")).unwrap(),
            Role::Custom("narrator".to_string())
        );
        assert_eq!(Role::from_name("system"), Role::System);
    }
}
