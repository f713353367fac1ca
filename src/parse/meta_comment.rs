use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use regex::Regex;

use crate::model::task::{Priority, TaskStatus};
use crate::util::markup::{decode_entities, escape_attribute};

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";
/// Separator between entries of the `tags` value
pub const TAG_LIST_SEPARATOR: char = ';';

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("valid pair regex")
});

/// Attributes carried by the metadata comment after a checkbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaComment {
    pub id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub tags: Vec<String>,
}

/// Result of looking for a metadata comment at the start of task content
#[derive(Debug)]
pub struct SplitContent<'a> {
    pub meta: Option<MetaComment>,
    /// Content following the comment (or all content if there is none)
    pub rest: &'a str,
}

/// Split a leading metadata comment off `content`. Leading spaces before the
/// comment are allowed. An unterminated comment is not metadata.
pub fn split_meta_comment(content: &str) -> SplitContent<'_> {
    let trimmed = content.trim_start_matches([' ', '\t']);
    let Some(after_open) = trimmed.strip_prefix(COMMENT_OPEN) else {
        return SplitContent {
            meta: None,
            rest: content,
        };
    };
    let Some(close) = after_open.find(COMMENT_CLOSE) else {
        tracing::debug!("unterminated metadata comment, treating as text");
        return SplitContent {
            meta: None,
            rest: content,
        };
    };
    let body = &after_open[..close];
    SplitContent {
        meta: Some(parse_meta_body(body)),
        rest: &after_open[close + COMMENT_CLOSE.len()..],
    }
}

/// Parse the `key="value"` tokens of a comment body
pub fn parse_meta_body(body: &str) -> MetaComment {
    let mut meta = MetaComment::default();
    for caps in PAIR_RE.captures_iter(body) {
        let key = &caps[1];
        let value = decode_entities(&caps[2]).into_owned();
        match key {
            "id" => {
                if !value.trim().is_empty() {
                    meta.id = Some(value.trim().to_string());
                }
            }
            "status" => match TaskStatus::parse(&value) {
                Some(s) => meta.status = Some(s),
                None => tracing::warn!(value = %value, "ignoring unknown task status"),
            },
            "priority" => match Priority::parse(&value) {
                Some(p) => meta.priority = Some(p),
                None => tracing::warn!(value = %value, "ignoring unknown task priority"),
            },
            "due" => match parse_due(&value) {
                Some(d) => meta.due = Some(d),
                None => tracing::warn!(value = %value, "ignoring malformed due date"),
            },
            "comment" => {
                if !value.is_empty() {
                    meta.comment = Some(value);
                }
            }
            "tags" => {
                meta.tags = value
                    .split(TAG_LIST_SEPARATOR)
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            other => tracing::debug!(key = other, "ignoring unknown metadata key"),
        }
    }
    meta
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC)
pub fn parse_due(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

pub fn format_due(due: &DateTime<Utc>) -> String {
    if due.time() == NaiveTime::MIN {
        due.format("%Y-%m-%d").to_string()
    } else {
        due.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl MetaComment {
    /// Render as a comment. Keys appear in a fixed order; empty optional
    /// values are omitted.
    pub fn render(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(id) = &self.id {
            pairs.push(("id", id.clone()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            pairs.push(("priority", priority.as_str().to_string()));
        }
        if let Some(due) = &self.due {
            pairs.push(("due", format_due(due)));
        }
        if let Some(comment) = &self.comment {
            pairs.push(("comment", comment.clone()));
        }
        if !self.tags.is_empty() {
            pairs.push(("tags", self.tags.join(&TAG_LIST_SEPARATOR.to_string())));
        }

        let mut out = String::from(COMMENT_OPEN);
        for (key, value) in pairs {
            out.push_str(&format!(" {}=\"{}\"", key, escape_attribute(&value)));
        }
        out.push(' ');
        out.push_str(COMMENT_CLOSE);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn split_without_comment() {
        let split = split_meta_comment(" buy milk");
        assert!(split.meta.is_none());
        assert_eq!(split.rest, " buy milk");
    }

    #[test]
    fn split_full_comment() {
        let content = r#" <!-- id="t1" status="Blocked" priority="High" due="2026-03-01" comment="ask &quot;Bob&quot;" tags="home;Errands~Shop" -->call plumber"#;
        let split = split_meta_comment(content);
        let meta = split.meta.unwrap();
        assert_eq!(meta.id.as_deref(), Some("t1"));
        assert_eq!(meta.status, Some(TaskStatus::Blocked));
        assert_eq!(meta.priority, Some(Priority::High));
        assert_eq!(
            meta.due,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(meta.comment.as_deref(), Some(r#"ask "Bob""#));
        assert_eq!(meta.tags, vec!["home", "Errands~Shop"]);
        assert_eq!(split.rest, "call plumber");
    }

    #[test]
    fn unterminated_comment_is_text() {
        let split = split_meta_comment(r#"<!-- id="x" still typing"#);
        assert!(split.meta.is_none());
    }

    #[test]
    fn bad_values_are_ignored() {
        let meta = parse_meta_body(r#"status="Someday" due="tomorrow" colour="red" id="  ""#);
        assert_eq!(meta, MetaComment::default());
    }

    #[test]
    fn render_is_parseable() {
        let meta = MetaComment {
            id: Some("abc".into()),
            status: Some(TaskStatus::InProgress),
            priority: Some(Priority::Low),
            due: Some(Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap()),
            comment: Some("a < b".into()),
            tags: vec!["x".into(), "y".into()],
        };
        let rendered = meta.render();
        assert_eq!(
            rendered,
            r#"<!-- id="abc" status="InProgress" priority="Low" due="2026-01-02T09:30:00Z" comment="a &lt; b" tags="x;y" -->"#
        );
        let split = split_meta_comment(&rendered);
        assert_eq!(split.meta.unwrap(), meta);
        assert_eq!(split.rest, "");
    }
}
