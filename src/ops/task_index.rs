use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc;

use indexmap::IndexMap;

use crate::model::event::{IndexEvent, Notifier};
use crate::model::note::NoteId;
use crate::model::tag::TagId;
use crate::model::task::{TaskId, TaskRecord};

/// Global flat index of task records across all notes
#[derive(Debug, Default)]
pub struct TaskIndex {
    tasks: IndexMap<TaskId, TaskRecord>,
    /// Task ids per note, in text order
    by_note: HashMap<NoteId, Vec<TaskId>>,
    notifier: Notifier,
}

impl TaskIndex {
    pub fn new() -> Self {
        TaskIndex::default()
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<IndexEvent> {
        self.notifier.subscribe()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    /// Tasks of one note in text order
    pub fn tasks_of(&self, note: NoteId) -> Vec<&TaskRecord> {
        self.by_note
            .get(&note)
            .map(|ids| ids.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn task_ids_of(&self, note: NoteId) -> Vec<TaskId> {
        self.by_note.get(&note).cloned().unwrap_or_default()
    }

    /// Every tag referenced by a task of `note`
    pub fn tags_used_by(&self, note: NoteId) -> BTreeSet<TagId> {
        self.tasks_of(note)
            .into_iter()
            .flat_map(|t| t.tags.iter().copied())
            .collect()
    }

    /// Add a record. The caller guarantees the id is not already indexed.
    pub(crate) fn insert(&mut self, record: TaskRecord) -> TaskId {
        let id = record.id.clone();
        let note = record.note;
        self.tasks.insert(id.clone(), record);
        self.by_note.entry(note).or_default().push(id.clone());
        self.resort(note);
        self.notifier.emit(IndexEvent::TaskAdded(id.clone()));
        id
    }

    /// Absorb a freshly parsed record into an indexed one, keeping its identity
    pub(crate) fn update(&mut self, id: &TaskId, fresh: &TaskRecord) -> bool {
        let Some(record) = self.tasks.get_mut(id) else {
            return false;
        };
        let note = record.note;
        let changed = record.absorb(fresh);
        if changed {
            self.resort(note);
            self.notifier.emit(IndexEvent::TaskUpdated(id.clone()));
        }
        changed
    }

    pub(crate) fn remove(&mut self, id: &TaskId) -> Option<TaskRecord> {
        let record = self.tasks.shift_remove(id)?;
        if let Some(ids) = self.by_note.get_mut(&record.note) {
            ids.retain(|t| t != id);
            if ids.is_empty() {
                self.by_note.remove(&record.note);
            }
        }
        self.notifier.emit(IndexEvent::TaskRemoved(id.clone()));
        Some(record)
    }

    /// Remove every task of a note
    pub(crate) fn remove_note(&mut self, note: NoteId) -> Vec<TaskRecord> {
        self.task_ids_of(note)
            .iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Drop a deleted tag from every record that references it
    pub(crate) fn strip_tag(&mut self, tag: TagId) -> Vec<TaskId> {
        let mut touched = Vec::new();
        for (id, record) in self.tasks.iter_mut() {
            if record.tags.remove(&tag) {
                touched.push(id.clone());
            }
        }
        for id in &touched {
            self.notifier.emit(IndexEvent::TaskUpdated(id.clone()));
        }
        touched
    }

    fn resort(&mut self, note: NoteId) {
        let tasks = &self.tasks;
        if let Some(ids) = self.by_note.get_mut(&note) {
            ids.sort_by_key(|id| tasks.get(id).map(|t| t.text_offset).unwrap_or(usize::MAX));
        }
    }
}
