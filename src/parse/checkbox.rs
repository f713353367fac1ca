/// Common prefix of every checkbox serialization
pub const CHECKBOX_PREFIX: &str = r#"<input type="checkbox""#;

/// Serializations of a checked box. The editor emits both forms.
pub const CHECKED_BOXES: [&str; 2] = [
    r#"<input type="checkbox" checked="checked" />"#,
    r#"<input type="checkbox" checked="checked">"#,
];

/// Serializations of an unchecked box
pub const UNCHECKED_BOXES: [&str; 2] = [
    r#"<input type="checkbox" />"#,
    r#"<input type="checkbox">"#,
];

/// Canonical form written back into notes
pub fn canonical_marker(checked: bool) -> &'static str {
    if checked {
        CHECKED_BOXES[0]
    } else {
        UNCHECKED_BOXES[0]
    }
}

/// A recognized marker at the start of some text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub checked: bool,
    /// Length in bytes of the marker as written
    pub len: usize,
}

/// Match one of the known serializations at the start of `s`.
/// Longest forms are tried first so the self-closing variant wins.
pub fn match_marker(s: &str) -> Option<Marker> {
    let candidates = CHECKED_BOXES
        .iter()
        .map(|m| (true, *m))
        .chain(UNCHECKED_BOXES.iter().map(|m| (false, *m)));
    candidates
        .filter(|(_, m)| s.starts_with(m))
        .max_by_key(|(_, m)| m.len())
        .map(|(checked, m)| Marker {
            checked,
            len: m.len(),
        })
}

/// Byte offsets of every checkbox prefix occurrence in `text`
pub fn marker_offsets(text: &str) -> Vec<usize> {
    text.match_indices(CHECKBOX_PREFIX).map(|(i, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_all_serializations() {
        for m in CHECKED_BOXES {
            let found = match_marker(&format!("{} rest", m)).unwrap();
            assert!(found.checked);
            assert_eq!(found.len, m.len());
        }
        for m in UNCHECKED_BOXES {
            let found = match_marker(&format!("{}rest", m)).unwrap();
            assert!(!found.checked);
            assert_eq!(found.len, m.len());
        }
    }

    #[test]
    fn rejects_unknown_attributes() {
        assert_eq!(match_marker(r#"<input type="checkbox" disabled />"#), None);
        assert_eq!(match_marker("plain text"), None);
    }

    #[test]
    fn offsets_cover_every_prefix() {
        let text = format!("{}a\n{}b", UNCHECKED_BOXES[0], CHECKED_BOXES[1]);
        assert_eq!(marker_offsets(&text), vec![0, UNCHECKED_BOXES[0].len() + 2]);
    }
}
