use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::NotebookConfig;

pub const CONFIG_FILE: &str = "notegraph.toml";

const CONFIG_TEMPLATE: &str = r##"# notegraph settings for this notes directory

[notes]
# files with these extensions are read as notes
extensions = ["txt", "html", "md"]

[watch]
# how often `ng watch` drains file events
poll_interval_ms = 250
"##;

/// Error type for reading and writing notegraph.toml
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse notegraph.toml: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
}

/// Load the notebook config from `root`. A missing file yields the defaults.
pub fn load_config(root: &Path) -> Result<NotebookConfig, ConfigError> {
    let path = root.join(CONFIG_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(NotebookConfig::default());
        }
        Err(e) => return Err(ConfigError::ReadError { path, source: e }),
    };
    Ok(toml::from_str(&text)?)
}

/// Write the default config into `root`, refusing to overwrite an existing one
pub fn write_default_config(root: &Path) -> Result<PathBuf, ConfigError> {
    let path = root.join(CONFIG_FILE);
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path));
    }
    fs::write(&path, CONFIG_TEMPLATE).map_err(|e| ConfigError::WriteError {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}
