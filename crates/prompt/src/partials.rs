//! Recursive partial resolution.
//!
//! Before a template is compiled, every `{{> name}}` it references (directly
//! or through other partials) is looked up with the partial resolver and
//! registered. Lookups are deduplicated within one top-level call, and a
//! partial that includes itself, directly or transitively, is fetched once.

use dotprompt_core::AppResult;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use crate::registry::Registry;

/// Pattern for partial references: `{{> name}}`.
static PARTIAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{>\s*([A-Za-z0-9_-]+)\s*\}\}").expect("Invalid partial regex")
});

/// Find the distinct partial names referenced by a template.
pub fn identify_partials(template: &str) -> BTreeSet<String> {
    PARTIAL_REGEX
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// State of one top-level resolution call.
#[derive(Debug, Default)]
pub struct ResolutionSession {
    /// Names currently being fetched, for cycle detection
    processing: HashSet<String>,
    /// Names looked up at least once during this call
    attempted: HashSet<String>,
    /// Partials fetched and registered during this call
    resolved: BTreeMap<String, String>,
}

impl ResolutionSession {
    /// Partials fetched and registered during this call.
    pub fn resolved(&self) -> &BTreeMap<String, String> {
        &self.resolved
    }

    /// Names looked up during this call, found or not.
    pub fn attempted(&self) -> &HashSet<String> {
        &self.attempted
    }

    /// Consume the session, keeping the resolved partials.
    pub fn into_resolved(self) -> BTreeMap<String, String> {
        self.resolved
    }

    fn should_skip(&self, registry: &Registry, name: &str) -> bool {
        registry.has_partial(name)
            || self.attempted.contains(name)
            || self.processing.contains(name)
    }
}

/// Resolves partial references against a registry.
pub struct PartialResolution<'a, F>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    registry: &'a mut Registry,
    lookup: F,
}

impl<'a, F> PartialResolution<'a, F>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    /// Create a resolution over `registry` using `lookup` to fetch content.
    ///
    /// `lookup` returns `Ok(None)` (or empty content) for unknown partials.
    pub fn new(registry: &'a mut Registry, lookup: F) -> Self {
        Self { registry, lookup }
    }

    /// Register every partial transitively referenced by `template`.
    ///
    /// Unresolvable references are left unregistered; rendering reports them.
    pub fn resolve(mut self, template: &str) -> AppResult<ResolutionSession> {
        let mut session = ResolutionSession::default();
        self.resolve_into(template, &mut session)?;
        tracing::debug!(
            "Partial resolution done: {} resolved, {} attempted",
            session.resolved.len(),
            session.attempted.len()
        );
        Ok(session)
    }

    fn resolve_into(&mut self, template: &str, session: &mut ResolutionSession) -> AppResult<()> {
        for name in identify_partials(template) {
            if session.should_skip(self.registry, &name) {
                continue;
            }

            session.attempted.insert(name.clone());
            session.processing.insert(name.clone());

            let outcome = self.fetch(&name, session);

            // Cleared on every path so sibling branches are not blocked
            session.processing.remove(&name);
            outcome?;
        }

        Ok(())
    }

    fn fetch(&mut self, name: &str, session: &mut ResolutionSession) -> AppResult<()> {
        let content = match (self.lookup)(name)? {
            Some(content) if !content.is_empty() => content,
            _ => {
                tracing::warn!("Partial '{}' could not be resolved", name);
                return Ok(());
            }
        };

        tracing::trace!("Resolved partial '{}' ({} bytes)", name, content.len());
        session.resolved.insert(name.to_string(), content.clone());
        self.registry.define_partial(name, &content)?;
        self.resolve_into(&content, session)
    }
}

/// Resolve partials in `template`; a no-op when there is no lookup.
pub fn resolve_partials<F>(
    registry: &mut Registry,
    lookup: Option<F>,
    template: &str,
) -> AppResult<ResolutionSession>
where
    F: Fn(&str) -> AppResult<Option<String>>,
{
    match lookup {
        Some(lookup) => PartialResolution::new(registry, lookup).resolve(template),
        None => Ok(ResolutionSession::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotprompt_core::AppError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn library(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_identify_partials() {
        let names = identify_partials("{{> header}} {{>footer }} {{>  header}} {{ name }}");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["footer".to_string(), "header".to_string()]
        );
    }

    #[test]
    fn test_identify_partials_name_charset() {
        let names = identify_partials("{{> my-part_2}} {{> bad.name}}");
        assert!(names.contains("my-part_2"));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_no_lookup_is_noop() {
        let mut registry = Registry::new();
        let session = resolve_partials(
            &mut registry,
            None::<fn(&str) -> AppResult<Option<String>>>,
            "{{> a}}",
        )
        .unwrap();
        assert!(session.resolved().is_empty());
        assert!(!registry.has_partial("a"));
    }

    #[test]
    fn test_nested_partials_render() {
        let parts = library(&[("outer", "[{{> inner}}]"), ("inner", "Hi {{name}}")]);
        let mut registry = Registry::new();

        PartialResolution::new(&mut registry, |name: &str| Ok(parts.get(name).cloned()))
            .resolve("{{> outer}}")
            .unwrap();

        let tpl = registry.register_template("{{> outer}}").unwrap();
        assert_eq!(
            registry.render(&tpl, &json!({"name": "Ada"})).unwrap(),
            "[Hi Ada]"
        );
    }

    #[test]
    fn test_cycle_terminates() {
        let parts = library(&[("a", "A {{> b}}"), ("b", "B {{> a}}")]);
        let calls = RefCell::new(Vec::new());
        let mut registry = Registry::new();

        let session = PartialResolution::new(&mut registry, |name: &str| {
            calls.borrow_mut().push(name.to_string());
            Ok(parts.get(name).cloned())
        })
        .resolve("{{> a}}")
        .unwrap();

        assert_eq!(*calls.borrow(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.has_partial("a"));
        assert!(registry.has_partial("b"));
        assert_eq!(session.resolved().len(), 2);
    }

    #[test]
    fn test_self_reference_terminates() {
        let parts = library(&[("loop", "again {{> loop}}")]);
        let calls = RefCell::new(0);
        let mut registry = Registry::new();

        PartialResolution::new(&mut registry, |name: &str| {
            *calls.borrow_mut() += 1;
            Ok(parts.get(name).cloned())
        })
        .resolve("{{> loop}}")
        .unwrap();

        assert_eq!(*calls.borrow(), 1);
        assert!(registry.has_partial("loop"));
    }

    #[test]
    fn test_diamond_fetches_shared_partial_once() {
        let parts = library(&[("a", "{{> c}}"), ("b", "{{> c}}"), ("c", "shared")]);
        let calls = RefCell::new(Vec::new());
        let mut registry = Registry::new();

        PartialResolution::new(&mut registry, |name: &str| {
            calls.borrow_mut().push(name.to_string());
            Ok(parts.get(name).cloned())
        })
        .resolve("{{> a}}{{> b}}")
        .unwrap();

        let calls = calls.into_inner();
        assert_eq!(calls.iter().filter(|n| n.as_str() == "c").count(), 1);
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn test_missing_partial_attempted_once_and_not_registered() {
        let parts = library(&[("a", "{{> ghost}}"), ("b", "{{> ghost}}")]);
        let calls = RefCell::new(Vec::new());
        let mut registry = Registry::new();

        let session = PartialResolution::new(&mut registry, |name: &str| {
            calls.borrow_mut().push(name.to_string());
            Ok(parts.get(name).cloned())
        })
        .resolve("{{> a}}{{> b}}")
        .unwrap();

        let calls = calls.into_inner();
        assert_eq!(calls.iter().filter(|n| n.as_str() == "ghost").count(), 1);
        assert!(!registry.has_partial("ghost"));
        assert!(session.attempted().contains("ghost"));
        assert!(!session.resolved().contains_key("ghost"));
    }

    #[test]
    fn test_empty_content_is_not_found() {
        let mut registry = Registry::new();
        PartialResolution::new(&mut registry, |_: &str| Ok(Some(String::new())))
            .resolve("{{> blank}}")
            .unwrap();
        assert!(!registry.has_partial("blank"));
    }

    #[test]
    fn test_retry_across_calls() {
        let available = RefCell::new(false);
        let mut registry = Registry::new();
        let lookup = |_: &str| -> AppResult<Option<String>> {
            Ok(available.borrow().then(|| "late".to_string()))
        };

        PartialResolution::new(&mut registry, lookup)
            .resolve("{{> late}}")
            .unwrap();
        assert!(!registry.has_partial("late"));

        *available.borrow_mut() = true;
        PartialResolution::new(&mut registry, lookup)
            .resolve("{{> late}}")
            .unwrap();
        assert!(registry.has_partial("late"));
    }

    #[test]
    fn test_known_partial_not_fetched() {
        let mut registry = Registry::new();
        registry.define_partial("known", "already").unwrap();
        let calls = RefCell::new(0);

        PartialResolution::new(&mut registry, |_: &str| {
            *calls.borrow_mut() += 1;
            Ok(Some("fetched".to_string()))
        })
        .resolve("{{> known}}")
        .unwrap();

        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_resolver_error_propagates_and_clears_processing() {
        let mut registry = Registry::new();
        let mut resolution = PartialResolution::new(&mut registry, |name: &str| {
            if name == "bad" {
                Err(AppError::Resolver("backend offline".to_string()))
            } else {
                Ok(Some(format!("ok {}", name)))
            }
        });
        let mut session = ResolutionSession::default();

        let result = resolution.resolve_into("{{> bad}}", &mut session);
        assert!(matches!(result, Err(AppError::Resolver(_))));
        assert!(session.processing.is_empty());
        assert!(session.attempted.contains("bad"));

        // Siblings resolve normally afterwards in the same session
        resolution.resolve_into("{{> good}}", &mut session).unwrap();
        assert!(session.resolved.contains_key("good"));
    }

    #[test]
    fn test_nested_resolver_error_clears_whole_chain() {
        let parts = library(&[("a", "{{> b}}"), ("b", "{{> broken}}")]);
        let mut registry = Registry::new();
        let mut resolution = PartialResolution::new(&mut registry, |name: &str| {
            if name == "broken" {
                Err(AppError::Resolver("nope".to_string()))
            } else {
                Ok(parts.get(name).cloned())
            }
        });
        let mut session = ResolutionSession::default();

        assert!(resolution.resolve_into("{{> a}}", &mut session).is_err());
        assert!(session.processing.is_empty());
    }
}
