//! Dotprompt template compilation.
//!
//! This crate turns `.prompt` documents into rendered message lists:
//! - YAML front matter parsing
//! - Recursive partial resolution with cycle detection
//! - Metadata merging (defaults, model configs, tools, schemas)
//! - Handlebars rendering with marker helpers
//! - Message assembly from role, history, media and section markers

pub mod context;
pub mod engine;
pub mod helpers;
pub mod messages;
pub mod metadata;
pub mod parse;
pub mod partials;
pub mod registry;
pub mod store;
pub mod types;

// Re-export main types
pub use engine::{Dotprompt, DotpromptOptions, PartialResolver, PromptFunction};
pub use messages::{MarkerAssembler, MessageAssembler};
pub use metadata::{MetadataResolver, SchemaResolver, ToolResolver};
pub use parse::{parse_document, DocumentParser, FrontMatterParser};
pub use partials::{identify_partials, resolve_partials, PartialResolution, ResolutionSession};
pub use registry::Registry;
pub use store::{DirStore, PromptSource};
pub use types::{
    ContextData, DataArgument, Document, MediaPart, Message, Metadata, Part, RenderedPrompt,
    Role, ToolDefinition,
};
