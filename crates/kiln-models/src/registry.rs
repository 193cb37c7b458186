//! Model name resolution.
//!
//! Maps short model names (the identifiers request handlers see) to the full
//! model paths the loader understands. Resolution is a plain in-memory
//! lookup; the table comes from the builtin defaults, a config file, or both.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// The requested name does not resolve to a known model.
///
/// Raised before any eviction of a resident model, so a doomed request can
/// never destroy state on its way out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid model '{requested}'. Available models: {}", available.join(", "))]
pub struct UnknownModelError {
    /// The name that failed to resolve.
    pub requested: String,
    /// Every name the registry knows, sorted.
    pub available: Vec<String>,
}

/// Errors that can occur while loading a registry from a config file.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A `[models]` entry whose value is not a string path.
    #[error("Invalid [models] entry '{0}': expected a string model path")]
    InvalidEntry(String),
}

/// Registry of loadable models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    models: BTreeMap<String, String>,
}

impl ModelRegistry {
    /// Creates a registry from an explicit name → path table.
    #[must_use]
    pub fn new(models: BTreeMap<String, String>) -> Self {
        Self { models }
    }

    /// The builtin table of known models.
    #[must_use]
    pub fn builtin() -> Self {
        let models = [
            ("deepseek-r1-14b", "mlx-community/DeepSeek-R1-Distill-Qwen-14B-4bit"),
            ("dolphin-llama3.1-8b", "mlx-community/Dolphin3.0-Llama3.1-8B-4bit"),
            ("dolphin-llama3.2-3b", "mlx-community/dolphin3.0-llama3.2-3B-4Bit"),
            ("gemma3-1b", "mlx-community/gemma-3-1b-it-4bit"),
            ("gemma3-4b", "mlx-community/gemma-3-4b-it-4bit"),
            ("gemma3-12b", "mlx-community/gemma-3-12b-it-4bit"),
            ("llama3.1-8b", "mlx-community/Llama-3.1-8B-Instruct-4bit"),
            ("llama3.2-3b", "mlx-community/Llama-3.2-3B-Instruct-4bit"),
            ("mistral-nemo", "mlx-community/Mistral-Nemo-Instruct-2407-4bit"),
            ("phi3.5-mini", "mlx-community/Phi-3.5-mini-instruct-4bit"),
            ("phi4", "mlx-community/phi-4-4bit"),
            ("qwen2.5-7b", "mlx-community/Qwen2.5-7B-Instruct-4bit"),
            ("qwen2.5-14b", "mlx-community/Qwen2.5-14B-Instruct-4bit"),
            ("qwen2.5-coder-14b", "mlx-community/Qwen2.5-Coder-14B-Instruct-4bit"),
        ];

        Self {
            models: models
                .into_iter()
                .map(|(name, path)| (name.to_string(), path.to_string()))
                .collect(),
        }
    }

    /// Loads the registry from a TOML config file.
    ///
    /// Entries in the file's `[models]` table are merged over the builtin
    /// table, so a deployment can add models or repoint existing names. A
    /// missing file or missing section yields the builtin table unchanged.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if a `[models]` value is not a string.
    pub fn from_config_file(path: &Path) -> Result<Self, RegistryError> {
        let mut registry = Self::builtin();

        if !path.exists() {
            return Ok(registry);
        }

        let content = std::fs::read_to_string(path)?;
        let table: toml::Table = toml::from_str(&content)?;

        if let Some(models) = table.get("models") {
            if let Some(models_table) = models.as_table() {
                for (name, value) in models_table {
                    let model_path = value
                        .as_str()
                        .ok_or_else(|| RegistryError::InvalidEntry(name.clone()))?;
                    registry.insert(name.clone(), model_path.to_string());
                }
                debug!(
                    config = %path.display(),
                    model_count = registry.len(),
                    "Merged [models] table from config file"
                );
            }
        }

        Ok(registry)
    }

    /// Resolves a short name to its model path.
    ///
    /// # Errors
    /// Returns `UnknownModelError` listing the available names when `name`
    /// is not registered.
    pub fn resolve(&self, name: &str) -> Result<&str, UnknownModelError> {
        self.models
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| UnknownModelError {
                requested: name.to_string(),
                available: self.names(),
            })
    }

    /// Adds or replaces a model entry.
    pub fn insert(&mut self, name: String, path: String) {
        self.models.insert(name, path);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// All registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
