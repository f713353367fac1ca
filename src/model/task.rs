use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::note::NoteId;
use super::tag::TagId;
use crate::parse::task_parser;

/// Stable task identifier. Ids written into a note's metadata comment are kept
/// verbatim; new tasks get a generated one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workflow status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    /// Name used in the metadata comment
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Blocked => "Blocked",
            TaskStatus::Done => "Done",
        }
    }

    /// Parse a metadata value, case-insensitively
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Some(TaskStatus::Open),
            "inprogress" | "in_progress" | "in-progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            TaskStatus::Open => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Blocked => 2,
            TaskStatus::Done => 3,
        }
    }

    /// Dominance among the incomplete states: anything beats Open and
    /// Blocked beats InProgress. Done never dominates; it is derived from
    /// the checkbox alone.
    pub fn dominant(self, other: TaskStatus) -> TaskStatus {
        let a = self.without_done();
        let b = other.without_done();
        if a.rank() >= b.rank() { a } else { b }
    }

    /// Make the status agree with the checkbox state.
    /// Done ⇔ completed; leaving Done resolves to Open.
    pub fn with_completed(self, completed: bool) -> TaskStatus {
        match (completed, self) {
            (true, _) => TaskStatus::Done,
            (false, TaskStatus::Done) => TaskStatus::Open,
            (false, s) => s,
        }
    }

    fn without_done(self) -> TaskStatus {
        if self == TaskStatus::Done {
            TaskStatus::Open
        } else {
            self
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkbox item extracted from a note's text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    /// Whether `id` was read from the note's metadata comment
    #[serde(skip)]
    pub id_from_text: bool,
    /// Owning note
    pub note: NoteId,
    /// Byte offset of the checkbox marker in the note's raw text
    pub text_offset: usize,
    /// Checkbox marker plus trailing content up to the end of the task's span
    pub raw_text: String,
    pub completed: bool,
    pub status: TaskStatus,
    /// Whether `status` was written in the metadata comment
    #[serde(skip)]
    pub status_explicit: bool,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    /// Resolved non-group tags
    pub tags: BTreeSet<TagId>,
    /// Tag paths as written in the metadata comment
    #[serde(skip)]
    pub tag_paths: Vec<String>,
}

impl TaskRecord {
    /// A record with default attributes and a generated id
    pub fn new(note: NoteId, text_offset: usize, raw_text: String, completed: bool) -> Self {
        TaskRecord {
            id: TaskId::generate(),
            id_from_text: false,
            note,
            text_offset,
            raw_text,
            completed,
            status: TaskStatus::Open.with_completed(completed),
            status_explicit: false,
            priority: Priority::Medium,
            due_date: None,
            comment: None,
            tags: BTreeSet::new(),
            tag_paths: Vec::new(),
        }
    }

    /// Plain-text description derived from `raw_text`
    pub fn description(&self) -> String {
        task_parser::describe(&self.raw_text)
    }

    /// Toggle completion without an explicit status change
    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
        self.status = self.status.with_completed(completed);
    }

    /// Set an explicit status, keeping `completed` consistent
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.completed = status == TaskStatus::Done;
        self.status_explicit = true;
    }

    /// Copy the textual and attribute fields of a freshly parsed record onto
    /// this one, keeping this record's identity. Returns true if anything changed.
    pub fn absorb(&mut self, fresh: &TaskRecord) -> bool {
        let status = if fresh.status_explicit {
            fresh.status
        } else {
            self.status.dominant(fresh.status).with_completed(fresh.completed)
        };
        let changed = self.text_offset != fresh.text_offset
            || self.raw_text != fresh.raw_text
            || self.completed != fresh.completed
            || self.status != status
            || self.priority != fresh.priority
            || self.due_date != fresh.due_date
            || self.comment != fresh.comment
            || self.tags != fresh.tags;

        self.text_offset = fresh.text_offset;
        self.raw_text = fresh.raw_text.clone();
        self.completed = fresh.completed;
        self.status = status;
        self.status_explicit = fresh.status_explicit;
        self.priority = fresh.priority;
        self.due_date = fresh.due_date;
        self.comment = fresh.comment.clone();
        self.tags = fresh.tags.clone();
        self.tag_paths = fresh.tag_paths.clone();
        changed
    }
}
