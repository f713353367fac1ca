use crate::model::task::{Priority, TaskRecord, TaskStatus};
use crate::parse::checkbox::{canonical_marker, match_marker};
use crate::parse::meta_comment::{MetaComment, split_meta_comment};

/// Error type for in-text task edits
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("task {id} no longer matches the note text at offset {offset}")]
    Stale { id: String, offset: usize },
}

/// Metadata comment describing `record`. Status is written when it was
/// set explicitly or is not implied by the checkbox; priority only when
/// it is not the default.
pub fn meta_for(record: &TaskRecord, tag_paths: Vec<String>) -> MetaComment {
    let status = match record.status {
        TaskStatus::Open | TaskStatus::Done if !record.status_explicit => None,
        s => Some(s),
    };
    let priority = match record.priority {
        Priority::Medium => None,
        p => Some(p),
    };
    MetaComment {
        id: Some(record.id.to_string()),
        status,
        priority,
        due: record.due_date,
        comment: record.comment.clone(),
        tags: tag_paths,
    }
}

/// Canonical serialization of a task: self-closing marker, metadata comment,
/// then the record's content as written (its own comment replaced).
pub fn render_task(record: &TaskRecord, tag_paths: Vec<String>) -> String {
    let content = match match_marker(&record.raw_text) {
        Some(marker) => &record.raw_text[marker.len..],
        None => record.raw_text.as_str(),
    };
    let split = split_meta_comment(content);
    let rest = if split.meta.is_some() {
        split.rest
    } else {
        content
    };

    let mut out = String::from(canonical_marker(record.completed));
    out.push_str(&meta_for(record, tag_paths).render());
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        out.push(' ');
    }
    out.push_str(rest);
    out
}

/// Replace a task's span in `text` with `replacement`. Fails if the text
/// at the record's offset is no longer the record's raw text.
pub fn splice_task(
    text: &str,
    record: &TaskRecord,
    replacement: &str,
) -> Result<String, SerializeError> {
    let start = record.text_offset;
    let end = start + record.raw_text.len();
    if text.get(start..end) != Some(record.raw_text.as_str()) {
        return Err(SerializeError::Stale {
            id: record.id.to_string(),
            offset: start,
        });
    }
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..start]);
    out.push_str(replacement);
    out.push_str(&text[end..]);
    Ok(out)
}
