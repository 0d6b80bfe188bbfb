//! Render command handler.
//!
//! Renders a `.prompt` file, or a named prompt from the prompt directory,
//! and prints the resulting messages.

use clap::Args;
use dotprompt::{DataArgument, Dotprompt, DotpromptOptions, Message, Metadata, Part, PromptFunction};
use dotprompt_core::{config::AppConfig, AppError, AppResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Render a prompt
#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Path to a .prompt file, or a prompt name in the prompt directory
    pub prompt: String,

    /// Variant of a named prompt
    #[arg(long)]
    pub variant: Option<String>,

    /// Input variables as a JSON object
    #[arg(short, long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read input variables from a JSON file
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Session state as a JSON object
    #[arg(long)]
    pub state: Option<String>,

    /// Conversation history as a JSON array of messages
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Override the prompt's model
    #[arg(long)]
    pub with_model: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RenderCommand {
    /// Execute the render command.
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing render command");
        tracing::debug!("Render options: {:?}", self);

        let engine = Dotprompt::new(DotpromptOptions::from_config(config))?;
        let prompt = self.compile(&engine)?;
        let data = self.data_argument()?;

        let overrides = self
            .with_model
            .as_ref()
            .map(|model| Metadata::default().with_model(model));

        let rendered = prompt.render(&data, overrides.as_ref())?;

        tracing::debug!(
            "Rendered {} messages (model: {:?})",
            rendered.messages.len(),
            rendered.metadata.model
        );

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        } else {
            if let Some(model) = &rendered.metadata.model {
                println!("# model: {}", model);
            }
            for message in &rendered.messages {
                println!("{}", format_message(message));
            }
        }

        Ok(())
    }

    fn compile(&self, engine: &Dotprompt) -> AppResult<PromptFunction> {
        let path = Path::new(&self.prompt);

        if path.is_file() {
            tracing::debug!("Rendering prompt file {:?}", path);
            let source = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read prompt file {:?}: {}", path, e))
            })?;
            return engine.compile(&source);
        }

        engine.load(&self.prompt, self.variant.as_deref())
    }

    fn data_argument(&self) -> AppResult<DataArgument> {
        let input = match (&self.input, &self.input_file) {
            (Some(json), _) => Some(parse_object(json, "--input")?),
            (None, Some(path)) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("Failed to read input file {:?}: {}", path, e))
                })?;
                Some(parse_object(&contents, "--input-file")?)
            }
            (None, None) => None,
        };

        let mut data = match input {
            Some(object) if DATA_KEYS.iter().any(|key| object.contains_key(*key)) => {
                DataArgument::from_value(Value::Object(object))?
            }
            Some(object) => DataArgument::new().with_input(object),
            None => DataArgument::new(),
        };

        if let Some(state) = &self.state {
            data = data.with_state(parse_object(state, "--state")?);
        }

        if let Some(path) = &self.history_file {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read history file {:?}: {}", path, e))
            })?;
            let messages: Vec<Message> = serde_json::from_str(&contents).map_err(|e| {
                AppError::Config(format!("Invalid history in {:?}: {}", path, e))
            })?;
            data = data.with_messages(messages);
        }

        Ok(data)
    }
}

/// Top-level keys marking an input object as a full data argument.
const DATA_KEYS: [&str; 4] = ["input", "context", "messages", "docs"];

/// Parse a JSON object given on the command line.
fn parse_object(json: &str, flag: &str) -> AppResult<Map<String, Value>> {
    match serde_json::from_str(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::Config(format!("{} must be a JSON object", flag))),
        Err(e) => Err(AppError::Config(format!("Invalid JSON for {}: {}", flag, e))),
    }
}

fn format_message(message: &Message) -> String {
    let body: Vec<String> = message
        .content
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.clone(),
            Part::Media { media } => format!("[media: {}]", media.url),
            Part::Pending { metadata } => format!(
                "[pending: {}]",
                metadata
                    .get("purpose")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
            ),
        })
        .collect();

    format!("[{}]\n{}", message.role, body.join(""))
}
