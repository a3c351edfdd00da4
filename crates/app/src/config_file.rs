use rag_core::{ConfigError, StoreKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_FILE_NAME: &str = ".rag.toml";

/// Defaults read from a TOML file. Flags and environment variables win.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub database_name: Option<String>,
    pub ollama_url: Option<String>,
    pub embedding_model: Option<String>,
    pub model: Option<String>,
    pub store: Option<StoreKind>,
}

impl FileConfig {
    /// An explicit path must exist; the default `~/.rag.toml` is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::read(path),
            None => match default_path() {
                Some(path) if path.is_file() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|error| file_error(error.to_string()))?;
        toml::from_str(&content).map_err(|error| file_error(error.to_string()))
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_FILE_NAME))
}
