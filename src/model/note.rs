use std::fmt;

use serde::{Deserialize, Serialize};

use super::tag::HIERARCHY_SEPARATOR;

/// Identity of a tracked note. Survives renames; never reused within a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "note#{}", self.0)
    }
}

/// A note's file name split into its parts:
/// `[Group~Sub] Name.ext`, or `Name.ext` when the note is ungrouped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteName {
    /// External name of the group, `None` for NotGrouped
    pub group: Option<String>,
    pub name: String,
    /// Extension without the leading dot (may be empty)
    pub extension: String,
}

impl NoteName {
    pub fn new(group: Option<&str>, name: &str, extension: &str) -> Self {
        NoteName {
            group: group.map(str::to_string).filter(|g| !g.is_empty()),
            name: name.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Parse a file name. Returns `None` for names that cannot be a note
    /// (empty stem, unterminated group bracket, empty group).
    pub fn parse(file_name: &str) -> Option<NoteName> {
        let (stem, extension) = match file_name.rfind('.') {
            Some(dot) if dot > 0 => (&file_name[..dot], &file_name[dot + 1..]),
            _ => (file_name, ""),
        };

        let (group, name) = if let Some(rest) = stem.strip_prefix('[') {
            let close = rest.find(']')?;
            let group = rest[..close].trim();
            if group.is_empty() {
                return None;
            }
            let name = rest[close + 1..].strip_prefix(' ').unwrap_or(&rest[close + 1..]);
            (Some(group.to_string()), name)
        } else {
            (None, stem)
        };

        if name.trim().is_empty() {
            return None;
        }

        Some(NoteName {
            group,
            name: name.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Group path segments (empty for NotGrouped)
    pub fn group_segments(&self) -> Vec<&str> {
        match &self.group {
            Some(g) => g
                .split(HIERARCHY_SEPARATOR)
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn with_group(&self, group: Option<&str>) -> NoteName {
        NoteName::new(group, &self.name, &self.extension)
    }

    pub fn with_name(&self, name: &str) -> NoteName {
        NoteName {
            group: self.group.clone(),
            name: name.to_string(),
            extension: self.extension.clone(),
        }
    }

    /// This name if its file name is not in `taken`, otherwise the first
    /// free `Name (n)` in the same group
    pub fn unique_in<'a, I>(&self, taken: I) -> NoteName
    where
        I: IntoIterator<Item = &'a str>,
    {
        let taken: Vec<&str> = taken.into_iter().collect();
        if !taken.contains(&self.to_string().as_str()) {
            return self.clone();
        }
        let mut n = 1;
        loop {
            let candidate = self.with_name(&format!("{} ({})", self.name, n));
            if !taken.contains(&candidate.to_string().as_str()) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = &self.group {
            write!(f, "[{}] ", group)?;
        }
        f.write_str(&self.name)?;
        if !self.extension.is_empty() {
            write!(f, ".{}", self.extension)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_grouped_name() {
        let n = NoteName::parse("[Work~Meetings] Weekly sync.txt").unwrap();
        assert_eq!(n.group.as_deref(), Some("Work~Meetings"));
        assert_eq!(n.name, "Weekly sync");
        assert_eq!(n.extension, "txt");
        assert_eq!(n.group_segments(), vec!["Work", "Meetings"]);
        assert_eq!(n.to_string(), "[Work~Meetings] Weekly sync.txt");
    }

    #[test]
    fn parse_ungrouped_name() {
        let n = NoteName::parse("shopping.md").unwrap();
        assert_eq!(n.group, None);
        assert_eq!(n.name, "shopping");
        assert_eq!(n.to_string(), "shopping.md");
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert_eq!(NoteName::parse("[Unclosed note.txt"), None);
        assert_eq!(NoteName::parse("[] note.txt"), None);
        assert_eq!(NoteName::parse("[Work] .txt"), None);
    }

    #[test]
    fn dotfile_has_no_extension() {
        let n = NoteName::parse(".hidden").unwrap();
        assert_eq!(n.name, ".hidden");
        assert_eq!(n.extension, "");
    }

    #[test]
    fn unique_name_skips_taken() {
        let base = NoteName::parse("[Work] Plan.txt").unwrap();
        let taken = ["[Work] Plan.txt", "[Work] Plan (1).txt", "Plan.txt"];
        assert_eq!(base.unique_in(taken).to_string(), "[Work] Plan (2).txt");
        assert_eq!(base.with_group(None).unique_in(["x.txt"]).to_string(), "Plan.txt");
    }
}
