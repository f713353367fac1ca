use serde::Serialize;

use crate::model::note::NoteId;
use crate::model::tag::TagId;
use crate::model::task::{Priority, TaskRecord, TaskStatus};
use crate::ops::notebook::{EventOutcome, NoteEntry};
use crate::ops::tag_graph::TagGraph;
use crate::parse::meta_comment::format_due;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TaskJson {
    pub id: String,
    pub note: String,
    pub description: String,
    pub status: String,
    pub completed: bool,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Serialize)]
pub struct TagTreeJson {
    pub name: String,
    pub path: String,
    pub group: bool,
    pub archived: bool,
    pub notes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TagTreeJson>,
}

#[derive(Serialize)]
pub struct CheckJson {
    pub ok: bool,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub struct EventJson {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

pub fn task_to_json(task: &TaskRecord, note: Option<&NoteEntry>, graph: &TagGraph) -> TaskJson {
    TaskJson {
        id: task.id.to_string(),
        note: note.map(|n| n.file_name.clone()).unwrap_or_default(),
        description: task.description(),
        status: task.status.to_string(),
        completed: task.completed,
        priority: task.priority.to_string(),
        due: task.due_date.as_ref().map(format_due),
        comment: task.comment.clone(),
        tags: task
            .tags
            .iter()
            .filter_map(|t| graph.external_name(*t))
            .collect(),
    }
}

pub fn tag_tree_json(graph: &TagGraph) -> Vec<TagTreeJson> {
    graph
        .children_of(None)
        .iter()
        .filter_map(|id| tag_node_json(graph, *id))
        .collect()
}

fn tag_node_json(graph: &TagGraph, id: TagId) -> Option<TagTreeJson> {
    let node = graph.node(id)?;
    Some(TagTreeJson {
        name: node.name.clone(),
        path: graph.external_name(id).unwrap_or_default(),
        group: node.is_group,
        archived: node.is_archived,
        notes: node.linked_notes.len(),
        children: node
            .children
            .iter()
            .filter_map(|c| tag_node_json(graph, *c))
            .collect(),
    })
}

pub fn event_to_json(outcome: &EventOutcome, file_of: impl Fn(NoteId) -> Option<String>) -> EventJson {
    let (kind, note, detail) = match outcome {
        EventOutcome::Ignored => ("ignored", None, None),
        EventOutcome::Unchanged(n) => ("unchanged", Some(*n), None),
        EventOutcome::Added(n) => ("added", Some(*n), None),
        EventOutcome::Updated(n, report) => (
            "updated",
            Some(*n),
            Some(format!(
                "{} inserted, {} removed, {} updated",
                report.inserted.len(),
                report.removed.len(),
                report.updated.len()
            )),
        ),
        EventOutcome::Removed(n) => ("removed", Some(*n), None),
        EventOutcome::Conflict(n) => ("conflict", Some(*n), None),
        EventOutcome::Coalesced(n) => ("coalesced", Some(*n), None),
        EventOutcome::Failed { filename, error } => {
            ("failed", None, Some(format!("{}: {}", filename, error)))
        }
    };
    EventJson {
        outcome: kind,
        note: note.map(|n| file_of(n).unwrap_or_else(|| n.to_string())),
        detail,
    }
}

// ---------------------------------------------------------------------------
// Text formatting
// ---------------------------------------------------------------------------

/// One line per task: `[x] description  (id)` plus non-default attributes
pub fn format_task_line(task: &TaskRecord, graph: &TagGraph) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!("[{}] {}", mark, task.description());
    let mut extras = Vec::new();
    if !matches!(task.status, TaskStatus::Open | TaskStatus::Done) {
        extras.push(task.status.to_string());
    }
    if task.priority != Priority::Medium {
        extras.push(format!("priority {}", task.priority));
    }
    if let Some(due) = &task.due_date {
        extras.push(format!("due {}", format_due(due)));
    }
    for tag in &task.tags {
        if let Some(path) = graph.external_name(*tag) {
            extras.push(format!("#{}", path));
        }
    }
    if !extras.is_empty() {
        line.push_str(&format!("  {{{}}}", extras.join(", ")));
    }
    line.push_str(&format!("  ({})", task.id));
    line
}

pub fn format_event(event: &EventJson) -> String {
    let mut line = event.outcome.to_string();
    if let Some(note) = &event.note {
        line.push(' ');
        line.push_str(note);
    }
    if let Some(detail) = &event.detail {
        line.push_str(&format!(" ({})", detail));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::task_parser::extract;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_line_shows_attributes() {
        let mut graph = TagGraph::new();
        let text = r#"<input type="checkbox" /><!-- id="t1" status="Blocked" priority="High" due="2026-03-01" tags="home" --> fix sink"#;
        let task = extract(NoteId(1), text, &mut graph).remove(0);
        assert_eq!(
            format_task_line(&task, &graph),
            "[ ] fix sink  {Blocked, priority High, due 2026-03-01, #home}  (t1)"
        );
    }

    #[test]
    fn event_line_names_the_note() {
        let json = event_to_json(&EventOutcome::Added(NoteId(3)), |_| Some("a.txt".into()));
        assert_eq!(format_event(&json), "added a.txt");
        let json = event_to_json(&EventOutcome::Ignored, |_| None);
        assert_eq!(format_event(&json), "ignored");
    }
}
