use std::path::Path;

use crate::io::config_io::{self, ConfigError};

/// Write a commented notegraph.toml into `root`
pub fn cmd_init(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !root.is_dir() {
        return Err(format!("{} is not a directory", root.display()).into());
    }
    match config_io::write_default_config(root) {
        Ok(path) => {
            println!("created {}", path.display());
            Ok(())
        }
        Err(ConfigError::AlreadyExists(path)) => {
            Err(format!("{} already exists, leaving it alone", path.display()).into())
        }
        Err(e) => Err(e.into()),
    }
}
