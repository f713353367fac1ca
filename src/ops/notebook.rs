use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::mpsc;

use crate::io::config_io::{ConfigError, load_config};
use crate::io::storage::{FsStorage, NoteStorage, StorageError};
use crate::io::watcher::WatchEvent;
use crate::model::config::NotebookConfig;
use crate::model::event::{IndexEvent, Notifier};
use crate::model::note::{NoteId, NoteName};
use crate::model::tag::{HIERARCHY_SEPARATOR, ReservedTag, TagError, TagId, validate_tag_name};
use crate::model::task::{TaskId, TaskRecord, TaskStatus};
use crate::ops::conflict::{
    ConflictAction, ConflictError, ConflictOutcome, ConflictResolver, ConflictState,
    ExternalChange, Resolution,
};
use crate::ops::reconcile::{ReconcileReport, forget_note, reconcile};
use crate::ops::tag_graph::TagGraph;
use crate::ops::task_index::TaskIndex;
use crate::parse::task_parser::extract;
use crate::parse::task_serializer::{SerializeError, render_task, splice_task};

/// Error type for notebook operations
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("unknown note {0}")]
    NoteNotFound(NoteId),
    #[error("unknown task {0}")]
    TaskNotFound(TaskId),
    #[error("{0:?} is not a group that can hold notes")]
    NotAGroup(String),
    #[error("group {0:?} is already archived")]
    AlreadyArchived(String),
    #[error("group {0:?} is not archived")]
    NotArchived(String),
    #[error("no note is open in the editor")]
    EditorClosed,
    #[error("{0} has unsaved edits")]
    UnsavedEdits(NoteId),
}

/// A note known to the notebook
#[derive(Debug, Clone)]
pub struct NoteEntry {
    pub id: NoteId,
    pub file_name: String,
    pub name: NoteName,
    /// Group tag the note is linked to (NotGrouped when ungrouped)
    pub group: TagId,
    /// Last saved text
    pub text: String,
}

#[derive(Debug, Clone)]
struct EditorState {
    note: NoteId,
    /// Text as last loaded or saved
    base: String,
    text: String,
}

impl EditorState {
    fn is_dirty(&self) -> bool {
        self.text != self.base
    }
}

/// What processing one file event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored,
    /// The file matches what the notebook already knows
    Unchanged(NoteId),
    Added(NoteId),
    Updated(NoteId, ReconcileReport),
    Removed(NoteId),
    /// The change collided with unsaved edits and now awaits a decision
    Conflict(NoteId),
    /// Folded into an outstanding conflict
    Coalesced(NoteId),
    Failed { filename: String, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Queued file events dropped because the rescan superseded them
    pub superseded: usize,
}

#[derive(Debug, Clone)]
struct PlannedRename {
    note: NoteId,
    from: String,
    to: String,
    name: NoteName,
}

#[derive(Debug, Clone)]
struct PlannedWrite {
    note: NoteId,
    file_name: String,
    old_text: String,
    new_text: String,
}

/// The single writer over a notes directory: owns the tag graph, the task
/// index, the note registry, the editor buffer and the conflict state.
/// File events are queued with [`submit`](Self::submit) and applied in
/// arrival order by [`process_events`](Self::process_events). A file has at
/// most one queued event, so its changes are applied one at a time.
pub struct Notebook<S: NoteStorage> {
    storage: S,
    config: NotebookConfig,
    graph: TagGraph,
    index: TaskIndex,
    notes: BTreeMap<NoteId, NoteEntry>,
    by_file: HashMap<String, NoteId>,
    next_note: u64,
    editor: Option<EditorState>,
    conflicts: ConflictResolver,
    queue: VecDeque<WatchEvent>,
    notifier: Notifier,
}

impl Notebook<FsStorage> {
    /// Open the notes directory at `root`, reading notegraph.toml if present
    pub fn open_dir(root: &Path) -> Result<Self, NotebookError> {
        let config = load_config(root)?;
        Notebook::open(FsStorage::new(root), config)
    }
}

impl<S: NoteStorage> Notebook<S> {
    /// Build the indexes from every note in `storage`
    pub fn open(storage: S, config: NotebookConfig) -> Result<Self, NotebookError> {
        let mut notebook = Notebook {
            storage,
            config,
            graph: TagGraph::new(),
            index: TaskIndex::new(),
            notes: BTreeMap::new(),
            by_file: HashMap::new(),
            next_note: 1,
            editor: None,
            conflicts: ConflictResolver::new(),
            queue: VecDeque::new(),
            notifier: Notifier::new(),
        };
        notebook.graph.refresh_structure();
        let summary = notebook.rescan()?;
        tracing::info!(notes = summary.added, tasks = notebook.index.len(), "opened notebook");
        Ok(notebook)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn graph(&self) -> &TagGraph {
        &self.graph
    }

    pub fn index(&self) -> &TaskIndex {
        &self.index
    }

    pub fn config(&self) -> &NotebookConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Direct access to the backing store, bypassing the indexes
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn notes(&self) -> impl Iterator<Item = &NoteEntry> {
        self.notes.values()
    }

    pub fn note(&self, id: NoteId) -> Option<&NoteEntry> {
        self.notes.get(&id)
    }

    pub fn note_by_file(&self, file_name: &str) -> Option<NoteId> {
        self.by_file.get(file_name).copied()
    }

    pub fn conflict_state(&self, note: NoteId) -> ConflictState {
        self.conflicts.state(note)
    }

    /// Note events (added, removed, renamed, conflicts, rescans)
    pub fn subscribe(&mut self) -> mpsc::Receiver<IndexEvent> {
        self.notifier.subscribe()
    }

    pub fn subscribe_tags(&mut self) -> mpsc::Receiver<IndexEvent> {
        self.graph.subscribe()
    }

    pub fn subscribe_tasks(&mut self) -> mpsc::Receiver<IndexEvent> {
        self.index.subscribe()
    }

    fn entry(&self, note: NoteId) -> Result<&NoteEntry, NotebookError> {
        self.notes.get(&note).ok_or(NotebookError::NoteNotFound(note))
    }

    fn editor_dirty_on(&self, note: NoteId) -> bool {
        self.editor
            .as_ref()
            .is_some_and(|e| e.note == note && e.is_dirty())
    }

    // -----------------------------------------------------------------------
    // Note registry
    // -----------------------------------------------------------------------

    fn add_note(&mut self, file_name: &str, text: String) -> Option<NoteId> {
        let Some(name) = NoteName::parse(file_name) else {
            tracing::warn!(file = %file_name, "file name is not a valid note name, skipping");
            return None;
        };
        let group = match self.graph.group_for_note(name.group.as_deref(), true) {
            Some(g) => g,
            None => {
                tracing::warn!(file = %file_name, "note group cannot be created, treating note as ungrouped");
                self.graph.reserved(ReservedTag::NotGrouped)
            }
        };
        let id = NoteId(self.next_note);
        self.next_note += 1;
        self.graph.link_note(group, id);
        self.by_file.insert(file_name.to_string(), id);
        self.notes.insert(
            id,
            NoteEntry {
                id,
                file_name: file_name.to_string(),
                name,
                group,
                text: text.clone(),
            },
        );
        self.notifier.emit(IndexEvent::NoteAdded(id));
        self.reparse(id, &text);
        tracing::debug!(note = %id, file = %file_name, "added note");
        Some(id)
    }

    fn remove_note(&mut self, note: NoteId) {
        let Some(entry) = self.notes.remove(&note) else {
            return;
        };
        self.by_file.remove(&entry.file_name);
        forget_note(&mut self.index, &mut self.graph, note);
        self.graph.unlink_note_everywhere(note);
        if self.editor.as_ref().is_some_and(|e| e.note == note) {
            self.editor = None;
        }
        self.notifier.emit(IndexEvent::NoteRemoved(note));
        tracing::debug!(%note, file = %entry.file_name, "removed note");
    }

    fn reparse(&mut self, note: NoteId, text: &str) -> ReconcileReport {
        let fresh = extract(note, text, &mut self.graph);
        reconcile(&mut self.index, &mut self.graph, note, fresh)
    }

    fn set_saved_text(&mut self, note: NoteId, text: &str) {
        if let Some(entry) = self.notes.get_mut(&note) {
            entry.text = text.to_string();
        }
    }

    fn set_note_group(&mut self, note: NoteId, group: TagId) {
        let Some(entry) = self.notes.get_mut(&note) else {
            return;
        };
        let old = std::mem::replace(&mut entry.group, group);
        if old != group {
            self.graph.unlink_note(old, note);
        }
        self.graph.link_note(group, note);
    }

    // -----------------------------------------------------------------------
    // Rescan and file events
    // -----------------------------------------------------------------------

    /// Re-read the whole notes directory. Supersedes any queued file events.
    pub fn rescan(&mut self) -> Result<RescanSummary, NotebookError> {
        let mut summary = RescanSummary {
            superseded: self.queue.len(),
            ..RescanSummary::default()
        };
        self.queue.clear();

        let files: BTreeSet<String> = self
            .storage
            .list()?
            .into_iter()
            .filter(|f| self.config.notes.is_note_file(f))
            .collect();

        let gone: Vec<NoteId> = self
            .notes
            .values()
            .filter(|e| !files.contains(&e.file_name))
            .map(|e| e.id)
            .collect();
        for note in gone {
            if self.editor_dirty_on(note) {
                self.raise_conflict(note, ExternalChange::Deleted);
                continue;
            }
            self.remove_note(note);
            summary.removed += 1;
        }

        for file in &files {
            match self.sync_file(file) {
                Ok(EventOutcome::Added(_)) => summary.added += 1,
                Ok(EventOutcome::Updated(_, _)) => summary.updated += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(file = %file, error = %e, "could not load note"),
            }
        }
        self.notifier.emit(IndexEvent::Rescanned);
        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            superseded = summary.superseded,
            "rescanned notes"
        );
        Ok(summary)
    }

    /// Queue a file event. Events for a file that already has one queued
    /// are coalesced into it, keeping its place in the queue.
    pub fn submit(&mut self, event: WatchEvent) {
        if !self.config.notes.is_note_file(&event.filename) {
            return;
        }
        match self.queue.iter_mut().find(|q| q.filename == event.filename) {
            Some(queued) => {
                tracing::debug!(file = %event.filename, kind = ?event.kind, "coalesced file event");
                queued.kind = event.kind;
            }
            None => self.queue.push_back(event),
        }
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    /// Apply every queued event in arrival order
    pub fn process_events(&mut self) -> Vec<EventOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = self.queue.pop_front() {
            let outcome = match self.sync_file(&event.filename) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(file = %event.filename, error = %e, "could not apply file event");
                    EventOutcome::Failed {
                        filename: event.filename.clone(),
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Submit a batch of events and process the queue
    pub fn handle_events(&mut self, events: impl IntoIterator<Item = WatchEvent>) -> Vec<EventOutcome> {
        for event in events {
            self.submit(event);
        }
        self.process_events()
    }

    /// Bring one file's note in line with storage
    fn sync_file(&mut self, file_name: &str) -> Result<EventOutcome, NotebookError> {
        let text = match self.storage.read(file_name) {
            Ok(text) => Some(text),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let Some(note) = self.by_file.get(file_name).copied() else {
            return Ok(match text {
                Some(text) => self
                    .add_note(file_name, text)
                    .map_or(EventOutcome::Ignored, EventOutcome::Added),
                None => EventOutcome::Ignored,
            });
        };

        if let Some(t) = &text
            && self.notes.get(&note).is_some_and(|e| e.text == *t)
            && !self.conflicts.is_pending(note)
        {
            return Ok(EventOutcome::Unchanged(note));
        }

        let change = if text.is_some() {
            ExternalChange::Modified
        } else {
            ExternalChange::Deleted
        };
        match self.conflicts.notify(note, change, self.editor_dirty_on(note)) {
            ConflictOutcome::Raised => {
                self.notifier.emit(IndexEvent::ConflictRaised(note));
                Ok(EventOutcome::Conflict(note))
            }
            ConflictOutcome::Coalesced => Ok(EventOutcome::Coalesced(note)),
            ConflictOutcome::Clear => match text {
                Some(text) => Ok(EventOutcome::Updated(note, self.load_external(note, &text))),
                None => {
                    self.remove_note(note);
                    Ok(EventOutcome::Removed(note))
                }
            },
        }
    }

    fn raise_conflict(&mut self, note: NoteId, change: ExternalChange) {
        if self.conflicts.notify(note, change, true) == ConflictOutcome::Raised {
            self.notifier.emit(IndexEvent::ConflictRaised(note));
        }
    }

    /// Take external text as the note's saved state, refreshing a clean editor
    fn load_external(&mut self, note: NoteId, text: &str) -> ReconcileReport {
        self.set_saved_text(note, text);
        if let Some(editor) = self.editor.as_mut().filter(|e| e.note == note) {
            editor.base = text.to_string();
            editor.text = text.to_string();
        }
        self.reparse(note, text)
    }

    // -----------------------------------------------------------------------
    // Editor
    // -----------------------------------------------------------------------

    /// Open a note in the editor buffer, returning its text. Reopening the
    /// note already in the buffer keeps its unsaved edits.
    pub fn open_editor(&mut self, note: NoteId) -> Result<&str, NotebookError> {
        let text = self.entry(note)?.text.clone();
        if let Some(current) = &self.editor
            && current.note != note
            && current.is_dirty()
        {
            return Err(NotebookError::UnsavedEdits(current.note));
        }
        if self.editor_note() != Some(note) {
            self.editor = Some(EditorState {
                note,
                base: text.clone(),
                text,
            });
        }
        self.editor_text().ok_or(NotebookError::EditorClosed)
    }

    pub fn editor_note(&self) -> Option<NoteId> {
        self.editor.as_ref().map(|e| e.note)
    }

    pub fn editor_text(&self) -> Option<&str> {
        self.editor.as_ref().map(|e| e.text.as_str())
    }

    pub fn has_unsaved_edits(&self) -> bool {
        self.editor.as_ref().is_some_and(EditorState::is_dirty)
    }

    /// Commit an edit of the open note; its tasks are re-extracted from the
    /// edited text
    pub fn editor_changed(&mut self, note: NoteId, new_text: &str) -> Result<ReconcileReport, NotebookError> {
        let editor = self
            .editor
            .as_mut()
            .filter(|e| e.note == note)
            .ok_or(NotebookError::EditorClosed)?;
        editor.text = new_text.to_string();
        Ok(self.reparse(note, new_text))
    }

    /// Write the editor buffer to the note's file
    pub fn save_editor(&mut self) -> Result<(), NotebookError> {
        let editor = self.editor.as_ref().ok_or(NotebookError::EditorClosed)?;
        let note = editor.note;
        if self.conflicts.is_pending(note) {
            return Err(ConflictError::Pending(note).into());
        }
        let text = editor.text.clone();
        let file = self.entry(note)?.file_name.clone();
        self.storage.write(&file, &text)?;
        self.set_saved_text(note, &text);
        if let Some(editor) = self.editor.as_mut() {
            editor.base = text;
        }
        tracing::debug!(%note, file = %file, "saved note");
        Ok(())
    }

    /// Close the editor. Unsaved edits are discarded and the note's tasks
    /// revert to its saved text.
    pub fn close_editor(&mut self) -> Result<(), NotebookError> {
        let editor = self.editor.as_ref().ok_or(NotebookError::EditorClosed)?;
        let note = editor.note;
        if self.conflicts.is_pending(note) {
            return Err(ConflictError::Pending(note).into());
        }
        let dirty = editor.is_dirty();
        self.editor = None;
        if dirty && let Some(text) = self.notes.get(&note).map(|e| e.text.clone()) {
            self.reparse(note, &text);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------

    /// Carry out the user's choice for a pending conflict. On failure the
    /// conflict stays pending.
    pub fn resolve_conflict(
        &mut self,
        note: NoteId,
        action: ConflictAction,
    ) -> Result<Resolution, NotebookError> {
        let ConflictState::PendingDecision(pending) = self.conflicts.state(note) else {
            return Err(ConflictError::NotPending(note).into());
        };
        let resolution = self.conflicts.decide(note, action)?;
        if let Err(e) = self.apply_resolution(note, resolution) {
            self.conflicts.restore(pending);
            return Err(e);
        }
        self.notifier.emit(IndexEvent::ConflictResolved(note));
        Ok(resolution)
    }

    fn apply_resolution(&mut self, note: NoteId, resolution: Resolution) -> Result<(), NotebookError> {
        let own_text = self
            .editor
            .as_ref()
            .filter(|e| e.note == note)
            .map(|e| e.text.clone());
        let entry = self.entry(note)?.clone();

        match resolution {
            Resolution::WriteOwn => {
                let text = own_text.unwrap_or(entry.text);
                self.storage.write(&entry.file_name, &text)?;
                self.load_external(note, &text);
            }
            Resolution::WriteAsNew => {
                let text = own_text.unwrap_or_else(|| entry.text.clone());
                // the old name stays taken even when the external change deleted it
                let mut taken = self.storage.list()?;
                taken.push(entry.file_name.clone());
                let name = entry.name.unique_in(taken.iter().map(String::as_str));
                let file = name.to_string();
                self.storage.write(&file, &text)?;

                self.by_file.remove(&entry.file_name);
                self.by_file.insert(file.clone(), note);
                if let Some(e) = self.notes.get_mut(&note) {
                    e.file_name = file.clone();
                    e.name = name;
                }
                self.load_external(note, &text);
                self.notifier.emit(IndexEvent::NoteRenamed(note));
                tracing::info!(%note, file = %file, "saved local edits as a new note");

                // the external version stays under the old name as its own note
                match self.storage.read(&entry.file_name) {
                    Ok(external) => {
                        self.add_note(&entry.file_name, external);
                    }
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Resolution::ReloadExternal => match self.storage.read(&entry.file_name) {
                Ok(text) => {
                    self.load_external(note, &text);
                }
                Err(StorageError::NotFound(_)) => self.remove_note(note),
                Err(e) => return Err(e.into()),
            },
            Resolution::Forget => {
                if self.storage.exists(&entry.file_name) {
                    let text = self.storage.read(&entry.file_name)?;
                    self.load_external(note, &text);
                } else {
                    self.remove_note(note);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task edits
    // -----------------------------------------------------------------------

    pub fn set_task_completed(&mut self, task: &TaskId, completed: bool) -> Result<(), NotebookError> {
        self.edit_task(task, |record| record.set_completed(completed))
    }

    pub fn set_task_status(&mut self, task: &TaskId, status: TaskStatus) -> Result<(), NotebookError> {
        self.edit_task(task, |record| record.set_status(status))
    }

    /// Rewrite one task in its note's text and reconcile the result
    fn edit_task(&mut self, task: &TaskId, edit: impl FnOnce(&mut TaskRecord)) -> Result<(), NotebookError> {
        let record = self
            .index
            .get(task)
            .cloned()
            .ok_or_else(|| NotebookError::TaskNotFound(task.clone()))?;
        let note = record.note;
        self.ensure_writable(note)?;
        let entry = self.entry(note)?.clone();

        let mut edited = record.clone();
        edit(&mut edited);
        let replacement = render_task(&edited, record.tag_paths.clone());
        let new_text = splice_task(&entry.text, &record, &replacement)?;
        self.storage.write(&entry.file_name, &new_text)?;
        self.load_external(note, &new_text);
        tracing::debug!(%note, %task, "rewrote task");
        Ok(())
    }

    fn ensure_writable(&self, note: NoteId) -> Result<(), NotebookError> {
        if self.conflicts.is_pending(note) {
            return Err(ConflictError::Pending(note).into());
        }
        if self.editor_dirty_on(note) {
            return Err(NotebookError::UnsavedEdits(note));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tag and group operations
    // -----------------------------------------------------------------------

    /// Rename a tag, or delete it when `new_name` is `None`. Group changes
    /// rename the affected note files first; free-tag changes rewrite the
    /// tasks that reference the tag. Either everything is applied or
    /// nothing is.
    pub fn rename_tag(&mut self, tag: TagId, new_name: Option<&str>) -> Result<(), NotebookError> {
        let node = self.graph.node(tag).ok_or(TagError::NotFound(tag))?;
        if let Some(r) = node.reserved {
            return Err(TagError::Reserved(r).into());
        }
        match (node.is_group, new_name) {
            (true, Some(name)) => self.rename_group(tag, name),
            (true, None) => self.delete_group(tag),
            (false, Some(name)) => self.rename_free_tag(tag, name),
            (false, None) => self.delete_free_tag(tag),
        }
    }

    pub fn delete_tag(&mut self, tag: TagId) -> Result<(), NotebookError> {
        self.rename_tag(tag, None)
    }

    fn rename_group(&mut self, group: TagId, new_name: &str) -> Result<(), NotebookError> {
        let name = self.graph.validate_rename(group, new_name)?;
        let parent = self.graph.node(group).and_then(|n| n.parent);
        let parent_path = parent
            .and_then(|p| self.graph.external_name(p))
            .unwrap_or_default();
        let new_path = join_path(&parent_path, &name);

        let plan = self.plan_group_relocation(group, &new_path)?;
        self.apply_renames(&plan)?;
        self.graph.rename(group, Some(&name))?;
        tracing::info!(group = %new_path, notes = plan.len(), "renamed group");
        Ok(())
    }

    fn delete_group(&mut self, group: TagId) -> Result<(), NotebookError> {
        let subtree: HashSet<TagId> = self.graph.subtree(group).into_iter().collect();
        let mut taken: HashSet<String> = self.storage.list()?.into_iter().collect();
        let mut plan = Vec::new();
        for entry in self.notes.values().filter(|e| subtree.contains(&e.group)) {
            self.ensure_writable(entry.id)?;
            let name = entry
                .name
                .with_group(None)
                .unique_in(taken.iter().map(String::as_str));
            let to = name.to_string();
            taken.insert(to.clone());
            plan.push(PlannedRename {
                note: entry.id,
                from: entry.file_name.clone(),
                to,
                name,
            });
        }
        self.apply_renames(&plan)?;

        let not_grouped = self.graph.reserved(ReservedTag::NotGrouped);
        let removed = self.graph.remove(group)?;
        for step in &plan {
            self.set_note_group(step.note, not_grouped);
        }
        for tag in &removed.tags {
            self.index.strip_tag(*tag);
        }
        tracing::info!(groups = removed.tags.len(), notes = plan.len(), "deleted group");
        Ok(())
    }

    /// Move a note into another group (`NotGrouped` ungroups it)
    pub fn move_note(&mut self, note: NoteId, group: TagId) -> Result<(), NotebookError> {
        self.ensure_writable(note)?;
        let node = self.graph.node(group).ok_or(TagError::NotFound(group))?;
        if !node.is_group
            || matches!(node.reserved, Some(ReservedTag::Groups | ReservedTag::All))
        {
            return Err(NotebookError::NotAGroup(node.name.clone()));
        }
        let group_name = self.graph.note_group_name(group);
        let entry = self.entry(note)?;
        if entry.group == group {
            return Ok(());
        }
        let name = entry.name.with_group(group_name.as_deref());
        let plan = [PlannedRename {
            note,
            from: entry.file_name.clone(),
            to: name.to_string(),
            name,
        }];
        self.apply_renames(&plan)?;
        self.set_note_group(note, group);
        Ok(())
    }

    /// Move a group under `Archive`, merging into an existing mirror
    pub fn archive_group(&mut self, group: TagId) -> Result<(), NotebookError> {
        let node = self.graph.node(group).ok_or(TagError::NotFound(group))?;
        if let Some(r) = node.reserved {
            return Err(TagError::Reserved(r).into());
        }
        if !node.is_group {
            return Err(NotebookError::NotAGroup(node.name.clone()));
        }
        if node.is_archived {
            return Err(NotebookError::AlreadyArchived(node.name.clone()));
        }
        self.relocate_to_mirror(group)
    }

    /// Move an archived group back out of `Archive`, merging into an
    /// existing live group of the same name
    pub fn restore_group(&mut self, group: TagId) -> Result<(), NotebookError> {
        let node = self.graph.node(group).ok_or(TagError::NotFound(group))?;
        if let Some(r) = node.reserved {
            return Err(TagError::Reserved(r).into());
        }
        if !node.is_group {
            return Err(NotebookError::NotAGroup(node.name.clone()));
        }
        if !node.is_archived {
            return Err(NotebookError::NotArchived(node.name.clone()));
        }
        self.relocate_to_mirror(group)
    }

    /// Move `group` to its complementary path. If the mirror group already
    /// exists the two are merged and `group` is removed; otherwise `group`
    /// keeps its identity and is re-parented.
    fn relocate_to_mirror(&mut self, group: TagId) -> Result<(), NotebookError> {
        let target = self.graph.complementary_path(group).ok_or_else(|| {
            let name = self.graph.node(group).map(|n| n.name.clone());
            NotebookError::NotAGroup(name.unwrap_or_default())
        })?;
        let existing = self.graph.complementary_group(group, false);
        let target = target.as_str();
        let (parent_path, leaf) = match target.rsplit_once(HIERARCHY_SEPARATOR) {
            Some((p, l)) => (p.to_string(), l.to_string()),
            None => (String::new(), target.to_string()),
        };
        validate_tag_name(&leaf)?;
        if existing.is_none()
            && let Some(parent) = self.graph.resolve_external_name(&parent_path)
        {
            self.graph.validate_move(group, Some(parent))?;
        }

        let old_path = self.graph.external_name(group).ok_or(TagError::NotFound(group))?;
        let plan = self.plan_group_relocation(group, target)?;
        self.apply_renames(&plan)?;

        match existing {
            None => {
                let parent = self
                    .graph
                    .resolve_external_name_or_create(&parent_path)
                    .ok_or_else(|| TagError::NotFound(group))?;
                self.graph.move_tag(group, Some(parent))?;
            }
            Some(_) => {
                let mut counterparts = HashMap::new();
                for tag in self.graph.subtree(group) {
                    let path = self.graph.external_name(tag).unwrap_or_default();
                    let rel = path.strip_prefix(&old_path).unwrap_or_default();
                    let mirrored = format!("{}{}", target, rel);
                    if let Some(id) = self.graph.resolve_external_name_or_create(&mirrored) {
                        counterparts.insert(tag, id);
                    }
                }
                for step in &plan {
                    let old_group = self.notes.get(&step.note).map(|e| e.group);
                    if let Some(new_group) = old_group.and_then(|g| counterparts.get(&g)).copied() {
                        self.set_note_group(step.note, new_group);
                    }
                }
                self.graph.remove(group)?;
            }
        }
        tracing::info!(from = %old_path, to = %target, notes = plan.len(), "relocated group");
        Ok(())
    }

    /// File renames that move every note of `group`'s subtree to `target`
    fn plan_group_relocation(&self, group: TagId, target: &str) -> Result<Vec<PlannedRename>, NotebookError> {
        let old_path = self.graph.external_name(group).ok_or(TagError::NotFound(group))?;
        let subtree: HashSet<TagId> = self.graph.subtree(group).into_iter().collect();
        let mut plan = Vec::new();
        for entry in self.notes.values().filter(|e| subtree.contains(&e.group)) {
            self.ensure_writable(entry.id)?;
            let path = self.graph.external_name(entry.group).unwrap_or_default();
            let rel = path.strip_prefix(&old_path).unwrap_or_default();
            let new_group = format!("{}{}", target, rel);
            let name = entry.name.with_group(Some(&new_group));
            plan.push(PlannedRename {
                note: entry.id,
                from: entry.file_name.clone(),
                to: name.to_string(),
                name,
            });
        }
        Ok(plan)
    }

    /// Rename files in order. On the first failure every completed rename
    /// is reverted and the registry is left untouched.
    fn apply_renames(&mut self, plan: &[PlannedRename]) -> Result<(), NotebookError> {
        for (i, step) in plan.iter().enumerate() {
            if let Err(e) = self.storage.rename(&step.from, &step.to) {
                tracing::warn!(from = %step.from, to = %step.to, error = %e, "rename failed, rolling back");
                for done in plan[..i].iter().rev() {
                    if let Err(back) = self.storage.rename(&done.to, &done.from) {
                        tracing::warn!(file = %done.to, error = %back, "could not undo rename");
                    }
                }
                return Err(e.into());
            }
        }
        for step in plan {
            self.by_file.remove(&step.from);
            self.by_file.insert(step.to.clone(), step.note);
            if let Some(entry) = self.notes.get_mut(&step.note) {
                entry.file_name = step.to.clone();
                entry.name = step.name.clone();
            }
            self.notifier.emit(IndexEvent::NoteRenamed(step.note));
        }
        Ok(())
    }

    fn rename_free_tag(&mut self, tag: TagId, new_name: &str) -> Result<(), NotebookError> {
        let name = self.graph.validate_rename(tag, new_name)?;
        let mut paths = HashMap::new();
        for t in self.graph.subtree(tag) {
            paths.insert(t, Some(self.free_path_renamed(t, (tag, &name))));
        }
        let plan = self.plan_tag_rewrite(&paths)?;
        self.apply_writes(&plan)?;
        self.graph.rename(tag, Some(&name))?;
        for step in &plan {
            self.load_external(step.note, &step.new_text);
        }
        tracing::info!(tag = %name, notes = plan.len(), "renamed tag");
        Ok(())
    }

    fn delete_free_tag(&mut self, tag: TagId) -> Result<(), NotebookError> {
        let paths: HashMap<TagId, Option<String>> =
            self.graph.subtree(tag).into_iter().map(|t| (t, None)).collect();
        let plan = self.plan_tag_rewrite(&paths)?;
        self.apply_writes(&plan)?;
        let removed = self.graph.remove(tag)?;
        for t in &removed.tags {
            self.index.strip_tag(*t);
        }
        for step in &plan {
            self.load_external(step.note, &step.new_text);
        }
        tracing::info!(tags = removed.tags.len(), notes = plan.len(), "deleted tag");
        Ok(())
    }

    /// Path of a free tag as it will read once `renamed.0` is called `renamed.1`
    fn free_path_renamed(&self, tag: TagId, renamed: (TagId, &str)) -> String {
        let mut segments = Vec::new();
        let mut current = Some(tag);
        while let Some(id) = current {
            let Some(node) = self.graph.node(id) else {
                break;
            };
            segments.push(if id == renamed.0 { renamed.1 } else { node.name.as_str() });
            current = node.parent;
        }
        segments.reverse();
        segments.join(&HIERARCHY_SEPARATOR.to_string())
    }

    /// New note texts in which every written tag path that resolves to a key
    /// of `paths` is replaced by its value (or dropped for `None`)
    fn plan_tag_rewrite(
        &self,
        paths: &HashMap<TagId, Option<String>>,
    ) -> Result<Vec<PlannedWrite>, NotebookError> {
        let mut plan = Vec::new();
        for entry in self.notes.values() {
            let mut tasks: Vec<&TaskRecord> = self
                .index
                .tasks_of(entry.id)
                .into_iter()
                .filter(|t| t.tags.iter().any(|id| paths.contains_key(id)))
                .collect();
            if tasks.is_empty() {
                continue;
            }
            self.ensure_writable(entry.id)?;

            // back to front so earlier offsets stay valid
            tasks.sort_by_key(|t| std::cmp::Reverse(t.text_offset));
            let mut text = entry.text.clone();
            for task in tasks {
                let tag_paths: Vec<String> = task
                    .tag_paths
                    .iter()
                    .filter_map(|p| match self.graph.find_tag_path(p).and_then(|id| paths.get(&id)) {
                        Some(replacement) => replacement.clone(),
                        None => Some(p.clone()),
                    })
                    .collect();
                let replacement = render_task(task, tag_paths);
                text = splice_task(&text, task, &replacement)?;
            }
            plan.push(PlannedWrite {
                note: entry.id,
                file_name: entry.file_name.clone(),
                old_text: entry.text.clone(),
                new_text: text,
            });
        }
        Ok(plan)
    }

    /// Write every planned text, restoring the written ones if any write fails
    fn apply_writes(&mut self, plan: &[PlannedWrite]) -> Result<(), NotebookError> {
        for (i, step) in plan.iter().enumerate() {
            if let Err(e) = self.storage.write(&step.file_name, &step.new_text) {
                tracing::warn!(file = %step.file_name, error = %e, "write failed, rolling back");
                for done in plan[..i].iter().rev() {
                    if let Err(back) = self.storage.write(&done.file_name, &done.old_text) {
                        tracing::warn!(file = %done.file_name, error = %back, "could not restore note");
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    /// Graph invariants plus consistency between notes, tags and tasks
    pub fn check(&self) -> Vec<String> {
        let mut problems = self.graph.check();
        for entry in self.notes.values() {
            if self.by_file.get(&entry.file_name) != Some(&entry.id) {
                problems.push(format!("{} is not registered under its file name", entry.file_name));
            }
            if !self.graph.notes_of(entry.group).any(|n| n == entry.id) {
                problems.push(format!("{} is not linked to its group", entry.file_name));
            }
            for task in self.index.tasks_of(entry.id) {
                for tag in &task.tags {
                    if !self.graph.notes_of(*tag).any(|n| n == entry.id) {
                        problems.push(format!(
                            "task {} in {} uses tag {} without a link",
                            task.id, entry.file_name, tag
                        ));
                    }
                }
            }
        }
        if self.by_file.len() != self.notes.len() {
            problems.push("file name registry is out of sync".into());
        }
        problems
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", prefix, HIERARCHY_SEPARATOR, segment)
    }
}
