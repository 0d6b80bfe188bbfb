//! Command handlers for the dotprompt CLI.

pub mod list;
pub mod render;

// Re-export command types for convenience
pub use list::ListCommand;
pub use render::RenderCommand;
