//! Template, helper and partial registry.
//!
//! Wraps a `Handlebars` instance and remembers which helpers and partials
//! were registered, so that each name reaches the engine at most once.

use dotprompt_core::{AppError, AppResult};
use handlebars::{Handlebars, HelperDef};
use serde::Serialize;
use std::collections::HashSet;

use crate::helpers::MarkerHelper;

/// Prefix of generated template names.
const TEMPLATE_NAME_PREFIX: &str = "prompt";

/// Per-engine registration state.
pub struct Registry {
    handlebars: Handlebars<'static>,
    known_helpers: HashSet<String>,
    known_partials: HashSet<String>,
    next_template_id: u64,
}

impl Registry {
    /// Create a registry with HTML escaping disabled and the marker
    /// helpers already defined.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        // Prompts are plain text
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut registry = Self {
            handlebars,
            known_helpers: HashSet::new(),
            known_partials: HashSet::new(),
            next_template_id: 0,
        };

        for helper in MarkerHelper::ALL {
            registry.define_helper(helper.name(), helper);
        }

        registry
    }

    /// Register a helper unless one with the same name is already known.
    ///
    /// Returns `true` if the helper was registered.
    pub fn define_helper<H>(&mut self, name: &str, helper: H) -> bool
    where
        H: HelperDef + Send + Sync + 'static,
    {
        self.define_boxed_helper(name, Box::new(helper))
    }

    /// Boxed variant of [`Registry::define_helper`].
    pub fn define_boxed_helper(
        &mut self,
        name: &str,
        helper: Box<dyn HelperDef + Send + Sync + 'static>,
    ) -> bool {
        if self.known_helpers.contains(name) {
            tracing::trace!("Helper '{}' already defined, skipping", name);
            return false;
        }

        self.handlebars.register_helper(name, helper);
        self.known_helpers.insert(name.to_string());
        true
    }

    /// Register a partial unless one with the same name is already known.
    ///
    /// Returns `Ok(true)` if the partial was registered.
    pub fn define_partial(&mut self, name: &str, source: &str) -> AppResult<bool> {
        if self.known_partials.contains(name) {
            tracing::trace!("Partial '{}' already defined, skipping", name);
            return Ok(false);
        }

        self.handlebars
            .register_partial(name, source)
            .map_err(|e| {
                AppError::Template(format!("Failed to register partial '{}': {}", name, e))
            })?;
        self.known_partials.insert(name.to_string());

        tracing::debug!("Registered partial '{}'", name);
        Ok(true)
    }

    /// Whether a helper with this name is registered.
    pub fn has_helper(&self, name: &str) -> bool {
        self.known_helpers.contains(name)
    }

    /// Whether a partial with this name is registered.
    pub fn has_partial(&self, name: &str) -> bool {
        self.known_partials.contains(name)
    }

    /// Compile and register a template body under a fresh, unique name.
    pub fn register_template(&mut self, source: &str) -> AppResult<String> {
        self.next_template_id += 1;
        let name = format!("{}-{}", TEMPLATE_NAME_PREFIX, self.next_template_id);

        self.handlebars
            .register_template_string(&name, source)
            .map_err(|e| AppError::Template(format!("Failed to register template: {}", e)))?;

        tracing::debug!("Registered template '{}'", name);
        Ok(name)
    }

    /// Render a registered template against a context.
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> AppResult<String> {
        self.handlebars
            .render(name, context)
            .map_err(|e| AppError::Render(format!("Failed to render template: {}", e)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlebars::{Context, Helper, HelperResult, Output, RenderContext};
    use serde_json::json;

    fn shout(
        h: &Helper,
        _: &Handlebars,
        _: &Context,
        _: &mut RenderContext,
        out: &mut dyn Output,
    ) -> HelperResult {
        let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
        out.write(&param.to_uppercase())?;
        Ok(())
    }

    fn whisper(
        h: &Helper,
        _: &Handlebars,
        _: &Context,
        _: &mut RenderContext,
        out: &mut dyn Output,
    ) -> HelperResult {
        let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
        out.write(&param.to_lowercase())?;
        Ok(())
    }

    #[test]
    fn test_marker_helpers_predefined() {
        let registry = Registry::new();
        for helper in MarkerHelper::ALL {
            assert!(registry.has_helper(helper.name()));
        }
    }

    #[test]
    fn test_define_helper_once() {
        let mut registry = Registry::new();
        assert!(registry.define_helper("voice", shout));
        assert!(!registry.define_helper("voice", whisper));

        let name = registry.register_template(r#"{{voice "Hi"}}"#).unwrap();
        assert_eq!(registry.render(&name, &json!({})).unwrap(), "HI");
    }

    #[test]
    fn test_marker_helper_cannot_be_replaced() {
        let mut registry = Registry::new();
        assert!(!registry.define_helper("role", shout));

        let name = registry.register_template(r#"{{role "user"}}"#).unwrap();
        assert_eq!(
            registry.render(&name, &json!({})).unwrap(),
            "<<<dotprompt:role:user>>>"
        );
    }

    #[test]
    fn test_define_partial_once() {
        let mut registry = Registry::new();
        assert!(registry.define_partial("greeting", "one").unwrap());
        assert!(!registry.define_partial("greeting", "two").unwrap());

        let name = registry.register_template("{{> greeting}}").unwrap();
        assert_eq!(registry.render(&name, &json!({})).unwrap(), "one");
    }

    #[test]
    fn test_invalid_partial_is_not_marked_known() {
        let mut registry = Registry::new();
        assert!(registry.define_partial("broken", "{{#if}}").is_err());
        assert!(!registry.has_partial("broken"));
    }

    #[test]
    fn test_identical_templates_get_distinct_names() {
        let mut registry = Registry::new();
        let first = registry.register_template("Hello {{name}}").unwrap();
        let second = registry.register_template("Hello {{name}}").unwrap();
        assert_ne!(first, second);
        assert_eq!(
            registry.render(&second, &json!({"name": "Ada"})).unwrap(),
            "Hello Ada"
        );
    }

    #[test]
    fn test_missing_partial_fails_at_render() {
        let mut registry = Registry::new();
        let name = registry.register_template("{{> nowhere}}").unwrap();
        assert!(matches!(
            registry.render(&name, &json!({})),
            Err(AppError::Render(_))
        ));
    }
}
