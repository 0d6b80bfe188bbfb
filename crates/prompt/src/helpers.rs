//! Marker helpers for the Handlebars engine.
//!
//! Helpers emit `<<<dotprompt:...>>>` sentinel tokens that the message
//! assembler later turns into roles, history, sections and media parts:
//!
//! | Helper         | Output                                      |
//! |----------------|---------------------------------------------|
//! | `role`         | `<<<dotprompt:role:{name}>>>`               |
//! | `history`      | `<<<dotprompt:history>>>`                   |
//! | `section`      | `<<<dotprompt:section {name}>>>`            |
//! | `media`        | `<<<dotprompt:media:url {url} [{type}]>>>`  |
//! | `json`         | JSON serialization of a value               |
//! | `ifEquals`     | block when both values are equal            |
//! | `unlessEquals` | block when both values differ               |
//!
//! The marker logic lives in plain functions over `serde_json` values; the
//! `HelperDef` adapters at the bottom only bridge them into `handlebars`.

use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Renderable, StringOutput, Template,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Prefix shared by every marker token.
pub const MARKER_PREFIX: &str = "<<<dotprompt:";

/// Suffix shared by every marker token.
pub const MARKER_SUFFIX: &str = ">>>";

/// Block rendering capability handed to conditional helpers.
///
/// Each method returns `Ok(None)` when the corresponding block is absent.
pub trait BlockRenderer {
    type Error;

    /// Render the main block (`{{#helper}}...{{else}}`).
    fn render_block(&mut self) -> Result<Option<String>, Self::Error>;

    /// Render the else block (`{{else}}...{{/helper}}`).
    fn render_else_block(&mut self) -> Result<Option<String>, Self::Error>;
}

/// Render a value as marker text: strings verbatim, everything else as JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Create a role marker, e.g. `{{role "system"}}`.
pub fn role(params: &[Value]) -> String {
    match params.first() {
        Some(name) => format!("{}role:{}{}", MARKER_PREFIX, display_value(name), MARKER_SUFFIX),
        None => String::new(),
    }
}

/// Create a history marker, `{{history}}`.
pub fn history() -> String {
    format!("{}history{}", MARKER_PREFIX, MARKER_SUFFIX)
}

/// Create a section marker, e.g. `{{section "output"}}`.
pub fn section(params: &[Value]) -> String {
    match params.first() {
        Some(name) => format!(
            "{}section {}{}",
            MARKER_PREFIX,
            display_value(name),
            MARKER_SUFFIX
        ),
        None => String::new(),
    }
}

/// Create a media marker, e.g. `{{media url=image contentType="image/png"}}`.
///
/// Returns an empty string when `url` is missing or empty.
pub fn media(hash: &Map<String, Value>) -> String {
    let Some(url) = hash_text(hash, "url") else {
        return String::new();
    };

    match hash_text(hash, "contentType") {
        Some(content_type) => format!(
            "{}media:url {} {}{}",
            MARKER_PREFIX, url, content_type, MARKER_SUFFIX
        ),
        None => format!("{}media:url {}{}", MARKER_PREFIX, url, MARKER_SUFFIX),
    }
}

/// A hash argument as marker text; absent, null and empty values are `None`.
fn hash_text(hash: &Map<String, Value>, key: &str) -> Option<String> {
    match hash.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(display_value(other)),
    }
}

/// Parse the `indent` hash argument. Anything but a non-negative integer
/// (or a string holding one) means no indentation.
fn parse_indent(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<usize>().unwrap_or(0),
        _ => 0,
    }
}

/// Serialize a value to JSON, e.g. `{{json data indent=2}}`.
///
/// An indent of 0 produces compact single-line output rather than one
/// unindented element per line. Serialization failure yields `{}`.
pub fn json(params: &[Value], hash: &Map<String, Value>) -> String {
    let Some(value) = params.first() else {
        return String::new();
    };

    let indent = parse_indent(hash.get("indent"));
    let serialized = if indent == 0 {
        serde_json::to_string(value)
    } else {
        to_string_indented(value, indent)
    };

    serialized.unwrap_or_else(|e| {
        tracing::debug!("json helper could not serialize value: {}", e);
        "{}".to_string()
    })
}

fn to_string_indented(value: &Value, indent: usize) -> serde_json::Result<String> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    // serde_json only ever writes valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Render the main block when `matched`, otherwise the else block.
fn choose_block<B: BlockRenderer>(matched: bool, block: &mut B) -> Result<String, B::Error> {
    let rendered = if matched {
        block.render_block()?
    } else {
        block.render_else_block()?
    };
    Ok(rendered.unwrap_or_default())
}

/// `{{#ifEquals a b}}...{{else}}...{{/ifEquals}}`
pub fn if_equals<B: BlockRenderer>(params: &[Value], block: &mut B) -> Result<String, B::Error> {
    match params {
        [a, b, ..] => choose_block(a == b, block),
        _ => Ok(String::new()),
    }
}

/// `{{#unlessEquals a b}}...{{else}}...{{/unlessEquals}}`
pub fn unless_equals<B: BlockRenderer>(
    params: &[Value],
    block: &mut B,
) -> Result<String, B::Error> {
    match params {
        [a, b, ..] => choose_block(a != b, block),
        _ => Ok(String::new()),
    }
}

// Handlebars adapters

fn positional(h: &Helper<'_>) -> Vec<Value> {
    h.params().iter().map(|p| p.value().clone()).collect()
}

fn named(h: &Helper<'_>) -> Map<String, Value> {
    h.hash()
        .iter()
        .map(|(k, v)| (k.to_string(), v.value().clone()))
        .collect()
}

/// [`BlockRenderer`] over the templates handlebars attached to a block helper.
struct HandlebarsBlock<'a, 'reg: 'rc, 'rc> {
    template: Option<&'rc Template>,
    inverse: Option<&'rc Template>,
    registry: &'reg Handlebars<'reg>,
    context: &'rc Context,
    render_context: &'a mut RenderContext<'reg, 'rc>,
}

impl<'a, 'reg: 'rc, 'rc> HandlebarsBlock<'a, 'reg, 'rc> {
    fn render(&mut self, template: Option<&'rc Template>) -> Result<Option<String>, RenderError> {
        let Some(template) = template else {
            return Ok(None);
        };

        let mut out = StringOutput::new();
        template.render(self.registry, self.context, self.render_context, &mut out)?;
        out.into_string()
            .map(Some)
            .map_err(|e| RenderErrorReason::Other(e.to_string()).into())
    }
}

impl<'a, 'reg: 'rc, 'rc> BlockRenderer for HandlebarsBlock<'a, 'reg, 'rc> {
    type Error = RenderError;

    fn render_block(&mut self) -> Result<Option<String>, RenderError> {
        self.render(self.template)
    }

    fn render_else_block(&mut self) -> Result<Option<String>, RenderError> {
        self.render(self.inverse)
    }
}

/// The marker helpers, as registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerHelper {
    Role,
    History,
    Section,
    Media,
    Json,
    IfEquals,
    UnlessEquals,
}

impl MarkerHelper {
    /// Every marker helper, in registration order.
    pub const ALL: [MarkerHelper; 7] = [
        MarkerHelper::History,
        MarkerHelper::IfEquals,
        MarkerHelper::Json,
        MarkerHelper::Media,
        MarkerHelper::Role,
        MarkerHelper::Section,
        MarkerHelper::UnlessEquals,
    ];

    /// The name templates use to invoke the helper.
    pub fn name(self) -> &'static str {
        match self {
            MarkerHelper::Role => "role",
            MarkerHelper::History => "history",
            MarkerHelper::Section => "section",
            MarkerHelper::Media => "media",
            MarkerHelper::Json => "json",
            MarkerHelper::IfEquals => "ifEquals",
            MarkerHelper::UnlessEquals => "unlessEquals",
        }
    }
}

impl HelperDef for MarkerHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let rendered = match self {
            MarkerHelper::Role => role(&positional(h)),
            MarkerHelper::History => history(),
            MarkerHelper::Section => section(&positional(h)),
            MarkerHelper::Media => media(&named(h)),
            MarkerHelper::Json => json(&positional(h), &named(h)),
            MarkerHelper::IfEquals | MarkerHelper::UnlessEquals => {
                let params = positional(h);
                let mut block = HandlebarsBlock {
                    template: h.template(),
                    inverse: h.inverse(),
                    registry: r,
                    context: ctx,
                    render_context: rc,
                };
                if *self == MarkerHelper::IfEquals {
                    if_equals(&params, &mut block)?
                } else {
                    unless_equals(&params, &mut block)?
                }
            }
        };

        out.write(&rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::convert::Infallible;

    struct StaticBlock {
        block: Option<&'static str>,
        inverse: Option<&'static str>,
    }

    impl BlockRenderer for StaticBlock {
        type Error = Infallible;

        fn render_block(&mut self) -> Result<Option<String>, Infallible> {
            Ok(self.block.map(String::from))
        }

        fn render_else_block(&mut self) -> Result<Option<String>, Infallible> {
            Ok(self.inverse.map(String::from))
        }
    }

    fn hash(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_role_marker() {
        assert_eq!(role(&[json!("system")]), "<<<dotprompt:role:system>>>");
        assert_eq!(role(&[]), "");
    }

    #[test]
    fn test_history_marker() {
        assert_eq!(history(), "<<<dotprompt:history>>>");
    }

    #[test]
    fn test_section_marker() {
        assert_eq!(section(&[json!("output")]), "<<<dotprompt:section output>>>");
        assert_eq!(section(&[]), "");
    }

    #[test]
    fn test_media_marker() {
        assert_eq!(
            media(&hash(json!({"url": "u"}))),
            "<<<dotprompt:media:url u>>>"
        );
        assert_eq!(
            media(&hash(json!({"url": "u", "contentType": "t"}))),
            "<<<dotprompt:media:url u t>>>"
        );
        assert_eq!(media(&Map::new()), "");
        assert_eq!(media(&hash(json!({"url": ""}))), "");
    }

    #[test]
    fn test_media_literal_null_string_is_a_url() {
        assert_eq!(
            media(&hash(json!({"url": "null"}))),
            "<<<dotprompt:media:url null>>>"
        );
        assert_eq!(
            media(&hash(json!({"url": "u", "contentType": "null"}))),
            "<<<dotprompt:media:url u null>>>"
        );
        assert_eq!(media(&hash(json!({"url": null}))), "");
        assert_eq!(
            media(&hash(json!({"url": "u", "contentType": null}))),
            "<<<dotprompt:media:url u>>>"
        );
    }

    #[test]
    fn test_json_round_trip() {
        let out = json(&[json!({"a": 1})], &Map::new());
        assert_eq!(out, r#"{"a":1}"#);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn test_json_indent() {
        let value = json!({"a": [1]});
        assert_eq!(
            json(&[value.clone()], &hash(json!({"indent": 2}))),
            "{\n  \"a\": [\n    1\n  ]\n}"
        );
        assert_eq!(
            json(&[value.clone()], &hash(json!({"indent": "2"}))),
            json(&[value.clone()], &hash(json!({"indent": 2})))
        );
        assert_eq!(
            json(&[value.clone()], &hash(json!({"indent": "wide"}))),
            r#"{"a":[1]}"#
        );
        assert_eq!(json(&[value], &hash(json!({"indent": -4}))), r#"{"a":[1]}"#);
    }

    #[test]
    fn test_json_without_value() {
        assert_eq!(json(&[], &Map::new()), "");
    }

    #[test]
    fn test_if_equals() {
        let mut block = StaticBlock {
            block: Some("X"),
            inverse: None,
        };
        assert_eq!(if_equals(&[json!("a"), json!("a")], &mut block).unwrap(), "X");
        assert_eq!(if_equals(&[json!("a"), json!("b")], &mut block).unwrap(), "");

        let mut with_else = StaticBlock {
            block: Some("X"),
            inverse: Some("Y"),
        };
        assert_eq!(
            if_equals(&[json!("a"), json!("b")], &mut with_else).unwrap(),
            "Y"
        );
    }

    #[test]
    fn test_if_equals_missing_params() {
        let mut block = StaticBlock {
            block: Some("X"),
            inverse: Some("Y"),
        };
        assert_eq!(if_equals(&[], &mut block).unwrap(), "");
        assert_eq!(if_equals(&[json!("a")], &mut block).unwrap(), "");
    }

    #[test]
    fn test_if_equals_no_coercion() {
        let mut block = StaticBlock {
            block: Some("X"),
            inverse: Some("Y"),
        };
        assert_eq!(if_equals(&[json!(1), json!("1")], &mut block).unwrap(), "Y");
    }

    #[test]
    fn test_unless_equals() {
        let mut block = StaticBlock {
            block: Some("X"),
            inverse: Some("Y"),
        };
        assert_eq!(
            unless_equals(&[json!("a"), json!("b")], &mut block).unwrap(),
            "X"
        );
        assert_eq!(
            unless_equals(&[json!("a"), json!("a")], &mut block).unwrap(),
            "Y"
        );
        assert_eq!(unless_equals(&[json!("a")], &mut block).unwrap(), "");
    }

    fn engine() -> Handlebars<'static> {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        for helper in MarkerHelper::ALL {
            hb.register_helper(helper.name(), Box::new(helper));
        }
        hb
    }

    #[test]
    fn test_helpers_through_handlebars() {
        let hb = engine();
        let data = json!({"kind": "cat", "img": "http://x/a.png"});

        let out = hb
            .render_template(
                r#"{{role "system"}}{{media url=img contentType="image/png"}}{{json kind}}"#,
                &data,
            )
            .unwrap();
        assert_eq!(
            out,
            "<<<dotprompt:role:system>>><<<dotprompt:media:url http://x/a.png image/png>>>\"cat\""
        );
    }

    #[test]
    fn test_block_helpers_through_handlebars() {
        let hb = engine();
        let template = r#"{{#ifEquals kind "cat"}}meow{{else}}woof{{/ifEquals}}"#;

        assert_eq!(
            hb.render_template(template, &json!({"kind": "cat"})).unwrap(),
            "meow"
        );
        assert_eq!(
            hb.render_template(template, &json!({"kind": "dog"})).unwrap(),
            "woof"
        );
        assert_eq!(
            hb.render_template(
                r#"{{#unlessEquals kind "cat"}}not a {{kind}}{{/unlessEquals}}"#,
                &json!({"kind": "dog"})
            )
            .unwrap(),
            "not a dog"
        );
    }
}
