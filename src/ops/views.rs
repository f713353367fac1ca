use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc;

use serde::Serialize;

use crate::model::event::IndexEvent;
use crate::model::note::NoteId;
use crate::model::tag::{ReservedTag, TagId};
use crate::model::task::{TaskRecord, TaskStatus};
use crate::ops::tag_graph::TagGraph;
use crate::ops::task_index::TaskIndex;

/// Number of notes shown under one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: TagId,
    pub path: String,
    pub notes: usize,
}

/// Notes per tag in tree order. `All` counts every note; `Groups` is skipped.
pub fn tag_counts(graph: &TagGraph, total_notes: usize) -> Vec<TagCount> {
    let groups = graph.reserved(ReservedTag::Groups);
    let all = graph.reserved(ReservedTag::All);
    graph
        .preorder()
        .into_iter()
        .filter(|id| *id != groups)
        .map(|id| TagCount {
            tag: id,
            path: graph.external_name(id).unwrap_or_default(),
            notes: if id == all {
                total_notes
            } else {
                graph.notes_of(id).count()
            },
        })
        .collect()
}

/// Cached tag counts that recompute only after a tag event arrives
pub struct CountsView {
    rx: mpsc::Receiver<IndexEvent>,
    counts: Vec<TagCount>,
    stale: bool,
}

impl CountsView {
    /// `rx` should be a tag-graph subscription
    pub fn new(rx: mpsc::Receiver<IndexEvent>) -> Self {
        CountsView {
            rx,
            counts: Vec::new(),
            stale: true,
        }
    }

    /// Drain pending events and recompute if any touched tags. Returns
    /// whether the counts were recomputed.
    pub fn refresh(&mut self, graph: &TagGraph, total_notes: usize) -> bool {
        while let Ok(event) = self.rx.try_recv() {
            if matches!(
                event,
                IndexEvent::TagAdded(_)
                    | IndexEvent::TagRemoved(_)
                    | IndexEvent::TagChanged(_)
                    | IndexEvent::TagLinksChanged(_)
                    | IndexEvent::GroupListChanged
            ) {
                self.stale = true;
            }
        }
        let all = graph.reserved(ReservedTag::All);
        let all_changed = self
            .counts
            .iter()
            .any(|c| c.tag == all && c.notes != total_notes);
        if !self.stale && !all_changed {
            return false;
        }
        self.counts = tag_counts(graph, total_notes);
        self.stale = false;
        true
    }

    pub fn counts(&self) -> &[TagCount] {
        &self.counts
    }
}

/// Which tasks to show
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Group to show, including its subgroups. `None` or `All` shows every note.
    pub group: Option<TagId>,
    /// Free tag to require, including its sub-tags
    pub tag: Option<TagId>,
    pub status: Option<TaskStatus>,
    pub hide_completed: bool,
}

impl TaskFilter {
    pub fn apply<'a>(&self, graph: &TagGraph, index: &'a TaskIndex) -> Vec<&'a TaskRecord> {
        let notes: Option<HashSet<NoteId>> = self
            .group
            .filter(|g| *g != graph.reserved(ReservedTag::All))
            .map(|g| {
                graph
                    .subtree(g)
                    .into_iter()
                    .flat_map(|t| graph.notes_of(t))
                    .collect()
            });
        let tags: Option<HashSet<TagId>> = self.tag.map(|t| graph.subtree(t).into_iter().collect());

        // keep notes together, in text order
        let mut by_note: BTreeMap<NoteId, Vec<&'a TaskRecord>> = BTreeMap::new();
        for task in index.iter() {
            if notes.as_ref().is_some_and(|n| !n.contains(&task.note)) {
                continue;
            }
            if tags
                .as_ref()
                .is_some_and(|t| !task.tags.iter().any(|id| t.contains(id)))
            {
                continue;
            }
            if self.status.is_some_and(|s| s != task.status) {
                continue;
            }
            if self.hide_completed && task.completed {
                continue;
            }
            by_note.entry(task.note).or_default().push(task);
        }
        by_note
            .into_values()
            .flat_map(|mut tasks| {
                tasks.sort_by_key(|t| t.text_offset);
                tasks
            })
            .collect()
    }
}
