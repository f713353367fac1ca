use serde::{Deserialize, Serialize};

/// Configuration from notegraph.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookConfig {
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesConfig {
    /// File extensions treated as notes (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for NotesConfig {
    fn default() -> Self {
        NotesConfig {
            extensions: default_extensions(),
        }
    }
}

impl NotesConfig {
    /// Whether a file name has one of the configured note extensions
    pub fn is_note_file(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            return false;
        }
        match file_name.rsplit_once('.') {
            Some((_, ext)) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// How often the watch loop drains file events
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["txt".into(), "html".into(), "md".into()]
}

fn default_poll_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: NotebookConfig = toml::from_str("").unwrap();
        assert_eq!(config.notes.extensions, vec!["txt", "html", "md"]);
        assert_eq!(config.watch.poll_interval_ms, 250);
    }

    #[test]
    fn unknown_note_keys_are_ignored() {
        let config: NotebookConfig =
            toml::from_str("[notes]\nextensions = [\"md\"]\ndefault_extension = \"md\"\n").unwrap();
        assert_eq!(config.notes.extensions, vec!["md"]);
    }

    #[test]
    fn note_file_filter() {
        let notes = NotesConfig::default();
        assert!(notes.is_note_file("[Work] Plan.txt"));
        assert!(notes.is_note_file("todo.MD"));
        assert!(!notes.is_note_file("notegraph.toml"));
        assert!(!notes.is_note_file(".hidden.txt"));
        assert!(!notes.is_note_file("README"));
    }
}
