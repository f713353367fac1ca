use std::collections::BTreeSet;

use crate::model::note::NoteId;
use crate::model::tag::TagId;
use crate::model::task::{TaskId, TaskRecord};
use crate::ops::tag_graph::TagGraph;
use crate::ops::task_index::TaskIndex;

/// What a reconciliation did to the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Indexed tasks matched to a fresh record by id
    pub matched_by_id: Vec<TaskId>,
    /// Indexed tasks matched to a fresh record by text offset
    pub matched_by_offset: Vec<TaskId>,
    /// Matched tasks whose fields actually changed
    pub updated: Vec<TaskId>,
    pub inserted: Vec<TaskId>,
    pub removed: Vec<TaskId>,
    pub tags_linked: Vec<TagId>,
    pub tags_unlinked: Vec<TagId>,
}

impl ReconcileReport {
    /// True when the index and tag links were left untouched
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty()
            && self.inserted.is_empty()
            && self.removed.is_empty()
            && self.tags_linked.is_empty()
            && self.tags_unlinked.is_empty()
    }
}

/// Merge a freshly parsed task set for `note` into the index, preserving the
/// identity of every indexed task that can be matched.
///
/// Matching runs in three passes, each removing matched items from both
/// pools: by id (only ids read from the text), then by text offset, then the
/// remainder becomes deletions and insertions.
pub fn reconcile(
    index: &mut TaskIndex,
    graph: &mut TagGraph,
    note: NoteId,
    fresh: Vec<TaskRecord>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let tags_before = index.tags_used_by(note);
    let mut old_pool = index.task_ids_of(note);
    let mut pairs: Vec<(TaskId, TaskRecord)> = Vec::new();

    // Pass 1: by id
    let mut by_offset = Vec::new();
    for record in fresh {
        let pos = if record.id_from_text {
            old_pool.iter().position(|id| *id == record.id)
        } else {
            None
        };
        match pos {
            Some(pos) => {
                let old = old_pool.remove(pos);
                report.matched_by_id.push(old.clone());
                pairs.push((old, record));
            }
            None => by_offset.push(record),
        }
    }

    // Pass 2: by offset, against the offsets the index still holds
    let mut unmatched = Vec::new();
    for record in by_offset {
        let pos = old_pool.iter().position(|id| {
            index
                .get(id)
                .is_some_and(|t| t.text_offset == record.text_offset)
        });
        match pos {
            Some(pos) => {
                let old = old_pool.remove(pos);
                report.matched_by_offset.push(old.clone());
                pairs.push((old, record));
            }
            None => unmatched.push(record),
        }
    }

    for (old, record) in &pairs {
        if index.update(old, record) {
            report.updated.push(old.clone());
        }
    }

    // Pass 3: remainder
    for id in old_pool {
        if index.remove(&id).is_some() {
            report.removed.push(id);
        }
    }
    for mut record in unmatched {
        if index.contains(&record.id) {
            tracing::warn!(%note, task = %record.id, "duplicate task id in note, assigning a new one");
            record.id = TaskId::generate();
            record.id_from_text = false;
        }
        report.inserted.push(index.insert(record));
    }

    let tags_after = index.tags_used_by(note);
    for &tag in tags_before.difference(&tags_after) {
        if graph.unlink_note(tag, note) {
            report.tags_unlinked.push(tag);
        }
    }
    for &tag in tags_after.difference(&tags_before) {
        if graph.link_note(tag, note) {
            report.tags_linked.push(tag);
        }
    }

    tracing::debug!(
        %note,
        by_id = report.matched_by_id.len(),
        by_offset = report.matched_by_offset.len(),
        updated = report.updated.len(),
        inserted = report.inserted.len(),
        removed = report.removed.len(),
        "reconciled tasks"
    );
    report
}

/// Remove every task of a note from the index and unlink the note from the
/// tags those tasks referenced
pub fn forget_note(index: &mut TaskIndex, graph: &mut TagGraph, note: NoteId) -> Vec<TaskId> {
    let tags: BTreeSet<TagId> = index.tags_used_by(note);
    let removed: Vec<TaskId> = index
        .remove_note(note)
        .into_iter()
        .map(|t| t.id)
        .collect();
    for tag in tags {
        graph.unlink_note(tag, note);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskStatus;
    use crate::parse::task_parser::extract;
    use pretty_assertions::assert_eq;

    const NOTE: NoteId = NoteId(1);

    fn setup(text: &str) -> (TaskIndex, TagGraph, ReconcileReport) {
        let mut index = TaskIndex::new();
        let mut graph = TagGraph::new();
        let fresh = extract(NOTE, text, &mut graph);
        let report = reconcile(&mut index, &mut graph, NOTE, fresh);
        (index, graph, report)
    }

    fn rescan(index: &mut TaskIndex, graph: &mut TagGraph, text: &str) -> ReconcileReport {
        let fresh = extract(NOTE, text, graph);
        reconcile(index, graph, NOTE, fresh)
    }

    fn ids(index: &TaskIndex) -> Vec<TaskId> {
        index.tasks_of(NOTE).iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn rescanning_unchanged_text_is_a_noop() {
        let text = "<input type=\"checkbox\" /> a\n<input type=\"checkbox\" checked=\"checked\"> b";
        let (mut index, mut graph, first) = setup(text);
        assert_eq!(first.inserted.len(), 2);
        let before = ids(&index);

        let again = rescan(&mut index, &mut graph, text);
        assert!(again.is_noop(), "{:?}", again);
        assert_eq!(again.matched_by_offset, before);
        assert_eq!(ids(&index), before);
    }

    #[test]
    fn id_match_wins_over_offset() {
        let old_text = format!("{}<input type=\"checkbox\" /><!-- id=\"X\" --> task", " ".repeat(10));
        let (mut index, mut graph, _) = setup(&old_text);
        let x = TaskId("X".into());
        assert_eq!(index.get(&x).unwrap().text_offset, 10);

        let new_text = format!("{}<input type=\"checkbox\" /><!-- id=\"X\" --> task", " ".repeat(40));
        let report = rescan(&mut index, &mut graph, &new_text);
        assert_eq!(report.matched_by_id, vec![x.clone()]);
        assert!(report.inserted.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(index.get(&x).unwrap().text_offset, 40);
    }

    #[test]
    fn offset_match_keeps_identity_on_text_edit() {
        let (mut index, mut graph, _) = setup("<input type=\"checkbox\" /><!-- id=\"A\" --> old words");
        let report = rescan(&mut index, &mut graph, "<input type=\"checkbox\" /> new words");
        let a = TaskId("A".into());
        assert_eq!(report.matched_by_offset, vec![a.clone()]);
        assert_eq!(report.updated, vec![a.clone()]);
        assert_eq!(index.get(&a).unwrap().description(), "new words");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn inserting_a_task_above_keeps_the_lower_one() {
        let (mut index, mut graph, _) = setup("<input type=\"checkbox\" /><!-- id=\"low\" --> low");
        let report = rescan(
            &mut index,
            &mut graph,
            "<input type=\"checkbox\" /> high\n<input type=\"checkbox\" /><!-- id=\"low\" --> low",
        );
        assert_eq!(report.matched_by_id, vec![TaskId("low".into())]);
        assert_eq!(report.inserted.len(), 1);
        assert!(report.removed.is_empty());
        let order: Vec<String> = index.tasks_of(NOTE).iter().map(|t| t.description()).collect();
        assert_eq!(order, vec!["high", "low"]);
    }

    #[test]
    fn deleted_tasks_are_removed() {
        let (mut index, mut graph, _) =
            setup("<input type=\"checkbox\" /> a\n<input type=\"checkbox\" /> b");
        let report = rescan(&mut index, &mut graph, "<input type=\"checkbox\" /> a");
        assert_eq!(report.removed.len(), 1);
        assert_eq!(index.len(), 1);

        let report = rescan(&mut index, &mut graph, "");
        assert_eq!(report.removed.len(), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn duplicated_id_gets_fresh_identity() {
        let line = "<input type=\"checkbox\" /><!-- id=\"D\" --> copy";
        let (index, _, report) = setup(&format!("{}\n{}", line, line));
        assert_eq!(report.inserted.len(), 2);
        assert_eq!(index.len(), 2);
        assert!(index.contains(&TaskId("D".into())));
    }

    #[test]
    fn status_survives_edit_without_metadata() {
        let (mut index, mut graph, _) =
            setup("<input type=\"checkbox\" /><!-- id=\"S\" status=\"Blocked\" --> wait");
        let s = TaskId("S".into());
        assert_eq!(index.get(&s).unwrap().status, TaskStatus::Blocked);

        rescan(&mut index, &mut graph, "<input type=\"checkbox\" /> wait longer");
        assert_eq!(index.get(&s).unwrap().status, TaskStatus::Blocked);

        rescan(&mut index, &mut graph, "<input type=\"checkbox\" checked=\"checked\" /> wait longer");
        assert_eq!(index.get(&s).unwrap().status, TaskStatus::Done);

        rescan(&mut index, &mut graph, "<input type=\"checkbox\" /> wait longer");
        assert_eq!(index.get(&s).unwrap().status, TaskStatus::Open);
    }

    #[test]
    fn tag_links_follow_remaining_tasks() {
        let text = "<input type=\"checkbox\" /><!-- tags=\"home\" --> a\n<input type=\"checkbox\" /><!-- tags=\"home\" --> b";
        let (mut index, mut graph, report) = setup(text);
        let home = graph.resolve_tag_path("home", false).unwrap();
        assert_eq!(report.tags_linked, vec![home]);
        assert!(graph.notes_of(home).any(|n| n == NOTE));

        rescan(&mut index, &mut graph, "<input type=\"checkbox\" /><!-- tags=\"home\" --> a");
        assert!(graph.notes_of(home).any(|n| n == NOTE));

        let report = rescan(&mut index, &mut graph, "<input type=\"checkbox\" /> a");
        assert_eq!(report.tags_unlinked, vec![home]);
        assert_eq!(graph.notes_of(home).count(), 0);
    }

    #[test]
    fn forget_note_unlinks_tags() {
        let (mut index, mut graph, _) = setup("<input type=\"checkbox\" /><!-- tags=\"x\" --> a");
        let x = graph.resolve_tag_path("x", false).unwrap();
        let removed = forget_note(&mut index, &mut graph, NOTE);
        assert_eq!(removed.len(), 1);
        assert!(index.is_empty());
        assert_eq!(graph.notes_of(x).count(), 0);
    }
}
