//! Document parsing: YAML front matter plus a template body.
//!
//! ```text
//! ---
//! model: googleai/gemini-1.5-flash
//! config:
//!   temperature: 0.2
//! myext.flavor: spicy
//! ---
//! {{role "system"}} You are a helpful assistant.
//! ```
//!
//! Dotted keys (`ns.field`) are collected into `ext[ns][field]`.

use dotprompt_core::{AppError, AppResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::types::{Document, Metadata};

/// Front matter delimited by `---` lines, followed by the body.
static FRONTMATTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---\s*\n([\s\S]*?)\n---\s*\n([\s\S]*)$").expect("Invalid front matter regex")
});

/// Turns raw prompt source into a [`Document`].
pub trait DocumentParser: Send + Sync {
    fn parse(&self, source: &str) -> AppResult<Document>;
}

/// The default parser for `.prompt` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontMatterParser;

impl DocumentParser for FrontMatterParser {
    fn parse(&self, source: &str) -> AppResult<Document> {
        parse_document(source)
    }
}

/// Parse a prompt source with optional YAML front matter.
///
/// A source without front matter is returned as a template verbatim.
pub fn parse_document(source: &str) -> AppResult<Document> {
    let Some(caps) = FRONTMATTER_REGEX.captures(source) else {
        return Ok(Document::new(Metadata::default(), source));
    };

    let front = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    let raw = parse_front_matter(front)?;
    let metadata = split_metadata(raw)?;

    tracing::debug!(
        "Parsed document (model: {:?}, {} template bytes)",
        metadata.model,
        body.trim().len()
    );

    Ok(Document::new(metadata, body.trim()))
}

fn parse_front_matter(front: &str) -> AppResult<Map<String, Value>> {
    let value: Value = serde_yaml::from_str(front)
        .map_err(|e| AppError::Parse(format!("Failed to parse front matter YAML: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(AppError::Parse(format!(
            "Front matter must be a mapping, found: {}",
            other
        ))),
    }
}

/// Separate dotted extension keys from regular metadata fields.
fn split_metadata(raw: Map<String, Value>) -> AppResult<Metadata> {
    let mut fields = Map::new();
    let mut ext: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for (key, value) in &raw {
        match key.rsplit_once('.') {
            Some((namespace, field)) => {
                ext.entry(namespace.to_string())
                    .or_default()
                    .insert(field.to_string(), value.clone());
            }
            None => {
                fields.insert(key.clone(), value.clone());
            }
        }
    }

    let mut metadata: Metadata = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::Parse(format!("Invalid front matter field: {}", e)))?;

    if !ext.is_empty() {
        // Explicit `ext:` entries and dotted keys are combined
        let combined = metadata.ext.get_or_insert_with(BTreeMap::new);
        for (namespace, entries) in ext {
            combined.entry(namespace).or_default().extend(entries);
        }
    }
    metadata.raw = Some(raw);

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_with_front_matter() {
        let source = "---\nmodel: m1\nconfig:\n  temperature: 0.2\ntools: [search]\n---\n\nHello {{name}}!\n";

        let doc = parse_document(source).unwrap();

        assert_eq!(doc.template, "Hello {{name}}!");
        assert_eq!(doc.metadata.model.as_deref(), Some("m1"));
        assert_eq!(doc.metadata.config.unwrap()["temperature"], json!(0.2));
        assert_eq!(doc.metadata.tools, Some(vec!["search".to_string()]));
        assert_eq!(doc.metadata.raw.unwrap()["model"], json!("m1"));
    }

    #[test]
    fn test_parse_without_front_matter() {
        let doc = parse_document("  Just {{text}}\n").unwrap();
        assert_eq!(doc.template, "  Just {{text}}\n");
        assert_eq!(doc.metadata, Metadata::default());
    }

    #[test]
    fn test_dotted_keys_go_to_ext() {
        let source = "---\nstate.status: ok\nstate.count: 3\nvendor.deep.flag: true\n---\nbody";

        let doc = parse_document(source).unwrap();
        let ext = doc.metadata.ext.unwrap();

        assert_eq!(ext["state"]["status"], json!("ok"));
        assert_eq!(ext["state"]["count"], json!(3));
        assert_eq!(ext["vendor.deep"]["flag"], json!(true));
        assert!(doc.metadata.extra.is_empty());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let doc = parse_document("---\nowner: docs-team\n---\nbody").unwrap();
        assert_eq!(doc.metadata.extra["owner"], json!("docs-team"));
    }

    #[test]
    fn test_empty_front_matter() {
        let doc = parse_document("---\n\n---\nbody").unwrap();
        assert_eq!(doc.template, "body");
        assert!(doc.metadata.model.is_none());
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let result = parse_document("---\nmodel: [unclosed\n---\nbody");
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn test_non_mapping_front_matter_is_error() {
        let result = parse_document("---\n- a\n- b\n---\nbody");
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn test_parser_trait() {
        let doc = FrontMatterParser.parse("---\nmodel: m2\n---\nhi").unwrap();
        assert_eq!(doc.metadata.model.as_deref(), Some("m2"));
    }
}
