//! The dotprompt engine.
//!
//! [`Dotprompt`] owns the template registry and the engine-level defaults.
//! Compiling a prompt resolves its partials, registers its template and
//! returns a [`PromptFunction`] that can be rendered any number of times.

use dotprompt_core::{AppConfig, AppError, AppResult};
use handlebars::HelperDef;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::context::build_context;
use crate::messages::{MarkerAssembler, MessageAssembler};
use crate::metadata::{MetadataResolver, SchemaResolver, ToolResolver};
use crate::parse::{DocumentParser, FrontMatterParser};
use crate::partials::PartialResolution;
use crate::registry::Registry;
use crate::store::DirStore;
use crate::types::{DataArgument, Document, Metadata, RenderedPrompt, ToolDefinition};

/// Caller-supplied lookup of partial sources by name.
pub type PartialResolver = Arc<dyn Fn(&str) -> AppResult<Option<String>> + Send + Sync>;

type BoxedHelper = Box<dyn HelperDef + Send + Sync + 'static>;

/// Options for constructing a [`Dotprompt`] engine.
#[derive(Default)]
pub struct DotpromptOptions {
    /// Model used when neither the prompt nor the caller names one
    pub default_model: Option<String>,
    /// Configuration applied per model name
    pub model_configs: HashMap<String, Map<String, Value>>,
    /// Helpers to pre-register
    pub helpers: Vec<(String, BoxedHelper)>,
    /// Partials to pre-register
    pub partials: HashMap<String, String>,
    /// Static tool definitions, consulted before `tool_resolver`
    pub tools: HashMap<String, ToolDefinition>,
    pub tool_resolver: Option<ToolResolver>,
    /// Static schemas, consulted before `schema_resolver`
    pub schemas: HashMap<String, Value>,
    pub schema_resolver: Option<SchemaResolver>,
    /// Consulted before `store` when a partial is missing. Runs while the
    /// registry is locked, so it must not call back into the engine.
    pub partial_resolver: Option<PartialResolver>,
    /// Prompt and partial store
    pub store: Option<DirStore>,
    /// Replaces the front matter parser
    pub parser: Option<Box<dyn DocumentParser>>,
    /// Replaces the marker message assembler
    pub assembler: Option<Box<dyn MessageAssembler>>,
}

impl DotpromptOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed options from the application configuration.
    ///
    /// The prompt directory becomes the store when it exists.
    pub fn from_config(config: &AppConfig) -> Self {
        let store = config
            .prompt_dir
            .is_dir()
            .then(|| DirStore::new(&config.prompt_dir));

        Self {
            default_model: config.default_model.clone(),
            model_configs: config.model_configs.clone(),
            store,
            ..Self::default()
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_model_config(mut self, model: impl Into<String>, config: Map<String, Value>) -> Self {
        self.model_configs.insert(model.into(), config);
        self
    }

    pub fn with_helper<H>(mut self, name: impl Into<String>, helper: H) -> Self
    where
        H: HelperDef + Send + Sync + 'static,
    {
        self.helpers.push((name.into(), Box::new(helper)));
        self
    }

    pub fn with_partial(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.partials.insert(name.into(), source.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    pub fn with_tool_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> AppResult<Option<ToolDefinition>> + Send + Sync + 'static,
    {
        self.tool_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    pub fn with_schema_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> AppResult<Option<Value>> + Send + Sync + 'static,
    {
        self.schema_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_partial_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> AppResult<Option<String>> + Send + Sync + 'static,
    {
        self.partial_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_store(mut self, store: DirStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_parser(mut self, parser: impl DocumentParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    pub fn with_assembler(mut self, assembler: impl MessageAssembler + 'static) -> Self {
        self.assembler = Some(Box::new(assembler));
        self
    }
}

/// State shared by an engine and every prompt compiled from it.
struct EngineInner {
    registry: RwLock<Registry>,
    resolver: RwLock<MetadataResolver>,
    partial_resolver: Option<PartialResolver>,
    store: Option<DirStore>,
    parser: Box<dyn DocumentParser>,
    assembler: Box<dyn MessageAssembler>,
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> AppResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| AppError::Other(format!("Engine {} lock poisoned", what)))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> AppResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| AppError::Other(format!("Engine {} lock poisoned", what)))
}

impl EngineInner {
    /// Copy of the merge tables, so tool and schema resolvers run unlocked
    /// and may define tools or schemas on this engine.
    fn resolver_snapshot(&self) -> AppResult<MetadataResolver> {
        Ok(read(&self.resolver, "resolver")?.clone())
    }

    fn has_partial_source(&self) -> bool {
        self.partial_resolver.is_some() || self.store.is_some()
    }

    /// Partial resolver first, then the store.
    fn lookup_partial(&self, name: &str) -> AppResult<Option<String>> {
        if let Some(resolver) = &self.partial_resolver {
            let found = resolver(name).map_err(|e| {
                AppError::Resolver(format!("Partial resolver failed for '{}': {}", name, e))
            })?;
            if found.as_deref().is_some_and(|s| !s.is_empty()) {
                return Ok(found);
            }
        }

        match &self.store {
            Some(store) => store.load_partial(name),
            None => Ok(None),
        }
    }

    fn compile(self: &Arc<Self>, document: Document) -> AppResult<PromptFunction> {
        let template_name = {
            let mut registry = write(&self.registry, "registry")?;

            if self.has_partial_source() {
                PartialResolution::new(&mut registry, |name: &str| self.lookup_partial(name))
                    .resolve(&document.template)?;
            }

            registry.register_template(&document.template)?
        };

        tracing::debug!("Compiled prompt as '{}'", template_name);

        Ok(PromptFunction {
            engine: Arc::clone(self),
            template_name,
            document: Arc::new(document),
        })
    }
}

/// A template engine for `.prompt` documents.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Dotprompt {
    inner: Arc<EngineInner>,
}

impl Dotprompt {
    /// Create an engine from options.
    ///
    /// Fails if a pre-registered partial does not compile.
    pub fn new(options: DotpromptOptions) -> AppResult<Self> {
        let mut registry = Registry::new();

        for (name, helper) in options.helpers {
            registry.define_boxed_helper(&name, helper);
        }

        for (name, source) in &options.partials {
            registry.define_partial(name, source)?;
        }

        let resolver = MetadataResolver {
            default_model: options.default_model,
            model_configs: options.model_configs,
            tools: options.tools,
            tool_resolver: options.tool_resolver,
            schemas: options.schemas,
            schema_resolver: options.schema_resolver,
        };

        tracing::debug!("Created engine: {:?}", resolver);

        Ok(Self {
            inner: Arc::new(EngineInner {
                registry: RwLock::new(registry),
                resolver: RwLock::new(resolver),
                partial_resolver: options.partial_resolver,
                store: options.store,
                parser: options
                    .parser
                    .unwrap_or_else(|| Box::new(FrontMatterParser)),
                assembler: options
                    .assembler
                    .unwrap_or_else(|| Box::new(MarkerAssembler)),
            }),
        })
    }

    /// Register a helper; a name already known to the engine is ignored.
    pub fn define_helper<H>(&self, name: &str, helper: H) -> AppResult<bool>
    where
        H: HelperDef + Send + Sync + 'static,
    {
        Ok(write(&self.inner.registry, "registry")?.define_helper(name, helper))
    }

    /// Register a partial; a name already known to the engine is ignored.
    pub fn define_partial(&self, name: &str, source: &str) -> AppResult<bool> {
        write(&self.inner.registry, "registry")?.define_partial(name, source)
    }

    /// Add or replace a static tool definition.
    pub fn define_tool(&self, tool: ToolDefinition) -> AppResult<()> {
        write(&self.inner.resolver, "resolver")?
            .tools
            .insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Add or replace a static schema.
    pub fn define_schema(&self, name: &str, schema: Value) -> AppResult<()> {
        write(&self.inner.resolver, "resolver")?
            .schemas
            .insert(name.to_string(), schema);
        Ok(())
    }

    /// Parse prompt source into a document.
    pub fn parse(&self, source: &str) -> AppResult<Document> {
        self.inner.parser.parse(source)
    }

    /// Parse and compile prompt source.
    pub fn compile(&self, source: &str) -> AppResult<PromptFunction> {
        let document = self.parse(source)?;
        self.inner.compile(document)
    }

    /// Compile an already parsed document.
    pub fn compile_document(&self, document: Document) -> AppResult<PromptFunction> {
        self.inner.compile(document)
    }

    /// Compile a document with extra metadata layered over its own.
    pub fn compile_with_metadata(
        &self,
        mut document: Document,
        metadata: &Metadata,
    ) -> AppResult<PromptFunction> {
        document.metadata.overlay(metadata);
        self.inner.compile(document)
    }

    /// Compile and render prompt source in one step.
    pub fn render(
        &self,
        source: &str,
        data: &DataArgument,
        options: Option<&Metadata>,
    ) -> AppResult<RenderedPrompt> {
        self.compile(source)?.render(data, options)
    }

    /// Effective metadata for a document, without rendering it.
    pub fn render_metadata(
        &self,
        document: &Document,
        additional: Option<&Metadata>,
    ) -> AppResult<Metadata> {
        self.inner
            .resolver_snapshot()?
            .merge(Some(&document.metadata), additional)
    }

    /// Load a prompt from the store and compile it.
    pub fn load(&self, name: &str, variant: Option<&str>) -> AppResult<PromptFunction> {
        let store = self.inner.store.as_ref().ok_or_else(|| {
            AppError::Store("A store is required to load prompts by name".to_string())
        })?;

        let prompt = store.load(name, variant)?;
        let mut document = self.parse(&prompt.source)?;
        document.metadata.name.get_or_insert(prompt.name);
        if let Some(variant) = prompt.variant {
            document.metadata.variant.get_or_insert(variant);
        }

        self.inner.compile(document)
    }

    /// The configured store, if any.
    pub fn store(&self) -> Option<&DirStore> {
        self.inner.store.as_ref()
    }
}

/// A compiled prompt, ready to render.
#[derive(Clone)]
pub struct PromptFunction {
    engine: Arc<EngineInner>,
    template_name: String,
    document: Arc<Document>,
}

impl PromptFunction {
    /// The document this prompt was compiled from.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The registry name of the compiled template.
    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    /// Render with input data and optional metadata overrides.
    pub fn render(
        &self,
        data: &DataArgument,
        options: Option<&Metadata>,
    ) -> AppResult<RenderedPrompt> {
        let metadata = self
            .engine
            .resolver_snapshot()?
            .merge(Some(&self.document.metadata), options)?;

        let context = build_context(data, &metadata);

        let rendered = read(&self.engine.registry, "registry")?
            .render(&self.template_name, &Value::Object(context))?;

        let messages = self.engine.assembler.assemble(&rendered, data);

        tracing::debug!(
            "Rendered '{}' into {} messages",
            self.template_name,
            messages.len()
        );

        Ok(RenderedPrompt { metadata, messages })
    }
}

impl std::fmt::Debug for PromptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptFunction")
            .field("template_name", &self.template_name)
            .field("document", &self.document)
            .finish()
    }
}
