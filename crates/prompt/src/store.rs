//! Directory-backed prompt store.
//!
//! Layout:
//! - `<dir>/<name>.prompt` is a prompt
//! - `<dir>/<name>.<variant>.prompt` is a variant of a prompt
//! - `<dir>/_<name>.prompt` is a partial
//!
//! Prompts in subdirectories are named with `/`, e.g. `support/triage`.

use dotprompt_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

/// File extension of prompt files.
pub const PROMPT_EXTENSION: &str = "prompt";

/// Prefix marking a file as a partial.
const PARTIAL_PREFIX: char = '_';

/// A prompt loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSource {
    pub name: String,
    pub variant: Option<String>,
    pub source: String,
}

/// Read-only store of prompts and partials in a directory tree.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_name(name: &str) -> AppResult<()> {
        let invalid = name.is_empty()
            || name.starts_with('/')
            || name.split('/').any(|segment| segment.is_empty() || segment == "..");
        if invalid {
            return Err(AppError::Store(format!("Invalid prompt name: '{}'", name)));
        }
        Ok(())
    }

    /// A variant is a single path segment.
    fn validate_variant(variant: &str) -> AppResult<()> {
        if variant.is_empty() || variant.contains('/') || variant.contains('\\') || variant == ".." {
            return Err(AppError::Store(format!("Invalid prompt variant: '{}'", variant)));
        }
        Ok(())
    }

    fn prompt_path(&self, name: &str, variant: Option<&str>) -> PathBuf {
        let file = match variant {
            Some(variant) => format!("{}.{}.{}", name, variant, PROMPT_EXTENSION),
            None => format!("{}.{}", name, PROMPT_EXTENSION),
        };
        self.root.join(file)
    }

    fn partial_path(&self, name: &str) -> PathBuf {
        let (dir, base) = match name.rsplit_once('/') {
            Some((dir, base)) => (self.root.join(dir), base),
            None => (self.root.clone(), name),
        };
        dir.join(format!("{}{}.{}", PARTIAL_PREFIX, base, PROMPT_EXTENSION))
    }

    /// Load a prompt by name, optionally a specific variant.
    pub fn load(&self, name: &str, variant: Option<&str>) -> AppResult<PromptSource> {
        Self::validate_name(name)?;
        if let Some(variant) = variant {
            Self::validate_variant(variant)?;
        }
        let path = self.prompt_path(name, variant);

        tracing::debug!("Loading prompt from: {:?}", path);

        if !path.is_file() {
            return Err(AppError::Store(format!("Prompt file not found: {:?}", path)));
        }

        let source = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Store(format!("Failed to read prompt file {:?}: {}", path, e))
        })?;

        Ok(PromptSource {
            name: name.to_string(),
            variant: variant.map(str::to_string),
            source,
        })
    }

    /// Load a partial's source, or `None` if the store has no such partial.
    pub fn load_partial(&self, name: &str) -> AppResult<Option<String>> {
        if Self::validate_name(name).is_err() {
            return Ok(None);
        }

        let path = self.partial_path(name);
        if !path.is_file() {
            return Ok(None);
        }

        let source = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Store(format!("Failed to read partial file {:?}: {}", path, e))
        })?;
        Ok(Some(source))
    }

    /// List every prompt name (variants included as `name.variant`), sorted.
    pub fn list(&self) -> AppResult<Vec<String>> {
        self.collect_names(false)
    }

    /// List every partial name, sorted.
    pub fn list_partials(&self) -> AppResult<Vec<String>> {
        self.collect_names(true)
    }

    fn collect_names(&self, partials: bool) -> AppResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();

        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry =
                entry.map_err(|e| AppError::Store(format!("Failed to walk prompt dir: {}", e)))?;
            let path = entry.path();

            if !entry.file_type().is_file()
                || path.extension().and_then(|s| s.to_str()) != Some(PROMPT_EXTENSION)
            {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with(PARTIAL_PREFIX) != partials {
                continue;
            }
            let stem = if partials { &stem[1..] } else { stem };

            let relative_dir = path
                .parent()
                .and_then(|p| p.strip_prefix(&self.root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();

            names.push(if relative_dir.is_empty() {
                stem.to_string()
            } else {
                format!("{}/{}", relative_dir, stem)
            });
        }

        names.sort();
        Ok(names)
    }
}
