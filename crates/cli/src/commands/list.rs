//! List command handler.

use clap::Args;
use dotprompt::DirStore;
use dotprompt_core::{config::AppConfig, AppResult};

/// List prompts in the prompt directory
#[derive(Args, Debug)]
pub struct ListCommand {
    /// List partials instead of prompts
    #[arg(long)]
    pub partials: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ListCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing list command");
        tracing::debug!("List options: {:?}", self);

        config.validate()?;
        let store = DirStore::new(&config.prompt_dir);

        let names = if self.partials {
            store.list_partials()?
        } else {
            store.list()?
        };

        tracing::debug!("Found {} entries in {:?}", names.len(), store.root());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&names)?);
        } else {
            for name in &names {
                println!("{}", name);
            }
        }

        Ok(())
    }
}
