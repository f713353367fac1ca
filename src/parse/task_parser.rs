use crate::model::note::NoteId;
use crate::model::tag::TagId;
use crate::model::task::{TaskId, TaskRecord};
use crate::parse::checkbox::{marker_offsets, match_marker};
use crate::parse::meta_comment::{MetaComment, split_meta_comment};
use crate::util::markup::plain_text;

/// Resolves the tag paths written in a metadata comment to tag ids,
/// creating tags where the implementation allows it.
pub trait TagResolver {
    fn resolve_tag(&mut self, path: &str) -> Option<TagId>;
}

/// Resolver that knows no tags; every tag path is left unresolved
pub struct NoTags;

impl TagResolver for NoTags {
    fn resolve_tag(&mut self, _path: &str) -> Option<TagId> {
        None
    }
}

/// Extract every task record from a note's raw text, in text order.
///
/// A record spans from its checkbox marker to the first line break, the next
/// marker, or the end of the text, whichever comes first. Occurrences of the
/// checkbox prefix that are not a recognized marker are skipped.
pub fn extract(note: NoteId, raw_text: &str, tags: &mut dyn TagResolver) -> Vec<TaskRecord> {
    let offsets = marker_offsets(raw_text);
    let mut records = Vec::with_capacity(offsets.len());

    for (i, &start) in offsets.iter().enumerate() {
        let next_marker = offsets.get(i + 1).copied().unwrap_or(raw_text.len());
        let line_end = raw_text[start..]
            .find(['\n', '\r'])
            .map(|p| start + p)
            .unwrap_or(raw_text.len());
        let end = next_marker.min(line_end);
        let span = &raw_text[start..end];

        let Some(marker) = match_marker(span) else {
            tracing::warn!(%note, offset = start, "skipping unrecognized checkbox marker");
            continue;
        };

        let mut record = TaskRecord::new(note, start, span.to_string(), marker.checked);
        let split = split_meta_comment(&span[marker.len..]);
        if let Some(meta) = split.meta {
            apply_meta(&mut record, meta, tags);
        }
        records.push(record);
    }

    tracing::debug!(%note, count = records.len(), "extracted tasks");
    records
}

fn apply_meta(record: &mut TaskRecord, meta: MetaComment, tags: &mut dyn TagResolver) {
    if let Some(id) = meta.id {
        record.id = TaskId(id);
        record.id_from_text = true;
    }
    if let Some(status) = meta.status {
        record.status = status.with_completed(record.completed);
        record.status_explicit = true;
    }
    if let Some(priority) = meta.priority {
        record.priority = priority;
    }
    record.due_date = meta.due;
    record.comment = meta.comment;
    for path in meta.tags {
        match tags.resolve_tag(&path) {
            Some(tag) => {
                record.tags.insert(tag);
            }
            None => tracing::warn!(tag = %path, task = %record.id, "unresolved task tag"),
        }
        record.tag_paths.push(path);
    }
}

/// Plain-text description of a task's raw text: marker and metadata comment
/// removed, markup stripped, entities decoded.
pub fn describe(raw_text: &str) -> String {
    let content = match match_marker(raw_text) {
        Some(marker) => &raw_text[marker.len..],
        None => raw_text,
    };
    plain_text(split_meta_comment(content).rest)
}
