use std::collections::BTreeMap;
use std::fmt;

use crate::model::note::NoteId;

/// An external change that touched a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalChange {
    Modified,
    Deleted,
}

impl fmt::Display for ExternalChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalChange::Modified => write!(f, "modified"),
            ExternalChange::Deleted => write!(f, "deleted"),
        }
    }
}

/// A conflict waiting for the user's decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConflict {
    pub note: NoteId,
    pub change: ExternalChange,
    /// Number of external notifications folded into this conflict
    pub notices: u32,
}

impl PendingConflict {
    fn coalesce(&mut self, change: ExternalChange) {
        self.notices += 1;
        if self.change != ExternalChange::Deleted {
            self.change = change;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictState {
    Idle,
    PendingDecision(PendingConflict),
}

/// Result of feeding an external change to the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// No local edits at stake; the change can be applied directly
    Clear,
    /// A new conflict is now pending
    Raised,
    /// Folded into an already pending conflict
    Coalesced,
}

/// The three choices offered for a pending conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    SaveOwn,
    SaveAsNew,
    DiscardOwn,
}

impl ConflictAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "saveown" | "own" => Some(ConflictAction::SaveOwn),
            "saveasnew" | "new" => Some(ConflictAction::SaveAsNew),
            "discardown" | "discard" => Some(ConflictAction::DiscardOwn),
            _ => None,
        }
    }
}

/// What the caller has to do to carry out a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Write the local content over the external version
    WriteOwn,
    /// Write the local content under a fresh unique name in the same group
    WriteAsNew,
    /// Drop local edits and load the external content
    ReloadExternal,
    /// Drop local edits; the note no longer exists
    Forget,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("no conflict pending for {0}")]
    NotPending(NoteId),
    #[error("a conflict is pending for {0}")]
    Pending(NoteId),
}

/// Per-note Idle / PendingDecision state machine
#[derive(Debug, Default)]
pub struct ConflictResolver {
    pending: BTreeMap<NoteId, PendingConflict>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        ConflictResolver::default()
    }

    pub fn state(&self, note: NoteId) -> ConflictState {
        match self.pending.get(&note) {
            Some(p) => ConflictState::PendingDecision(p.clone()),
            None => ConflictState::Idle,
        }
    }

    pub fn is_pending(&self, note: NoteId) -> bool {
        self.pending.contains_key(&note)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingConflict> {
        self.pending.values()
    }

    /// Feed an external change for `note`. `has_unsaved` tells whether the
    /// note is open in the editor with local changes.
    pub fn notify(
        &mut self,
        note: NoteId,
        change: ExternalChange,
        has_unsaved: bool,
    ) -> ConflictOutcome {
        if let Some(pending) = self.pending.get_mut(&note) {
            pending.coalesce(change);
            tracing::debug!(%note, %change, notices = pending.notices, "coalesced external change");
            return ConflictOutcome::Coalesced;
        }
        if !has_unsaved {
            return ConflictOutcome::Clear;
        }
        tracing::info!(%note, %change, "external change conflicts with local edits");
        self.pending.insert(
            note,
            PendingConflict {
                note,
                change,
                notices: 1,
            },
        );
        ConflictOutcome::Raised
    }

    /// Take one action on a pending conflict, returning the note to Idle
    pub fn decide(
        &mut self,
        note: NoteId,
        action: ConflictAction,
    ) -> Result<Resolution, ConflictError> {
        let pending = self
            .pending
            .remove(&note)
            .ok_or(ConflictError::NotPending(note))?;
        let resolution = match (action, pending.change) {
            (ConflictAction::SaveOwn, _) => Resolution::WriteOwn,
            (ConflictAction::SaveAsNew, _) => Resolution::WriteAsNew,
            (ConflictAction::DiscardOwn, ExternalChange::Modified) => Resolution::ReloadExternal,
            (ConflictAction::DiscardOwn, ExternalChange::Deleted) => Resolution::Forget,
        };
        tracing::info!(%note, ?action, ?resolution, "conflict resolved");
        Ok(resolution)
    }

    /// Put a decided conflict back, used when carrying out the decision failed
    pub(crate) fn restore(&mut self, conflict: PendingConflict) {
        self.pending.insert(conflict.note, conflict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const N: NoteId = NoteId(7);

    #[test]
    fn no_unsaved_edits_means_no_conflict() {
        let mut r = ConflictResolver::new();
        assert_eq!(r.notify(N, ExternalChange::Modified, false), ConflictOutcome::Clear);
        assert_eq!(r.state(N), ConflictState::Idle);
    }

    #[test]
    fn unsaved_edits_raise_a_pending_decision() {
        let mut r = ConflictResolver::new();
        assert_eq!(r.notify(N, ExternalChange::Modified, true), ConflictOutcome::Raised);
        assert_eq!(
            r.state(N),
            ConflictState::PendingDecision(PendingConflict {
                note: N,
                change: ExternalChange::Modified,
                notices: 1,
            })
        );
        assert!(!r.is_pending(NoteId(8)));
    }

    #[test]
    fn second_notice_coalesces_and_delete_sticks() {
        let mut r = ConflictResolver::new();
        r.notify(N, ExternalChange::Modified, true);
        assert_eq!(r.notify(N, ExternalChange::Deleted, true), ConflictOutcome::Coalesced);
        // even without unsaved edits, the outstanding conflict absorbs it
        assert_eq!(r.notify(N, ExternalChange::Modified, false), ConflictOutcome::Coalesced);

        let ConflictState::PendingDecision(p) = r.state(N) else {
            panic!("expected pending conflict");
        };
        assert_eq!(p.change, ExternalChange::Deleted);
        assert_eq!(p.notices, 3);
        assert_eq!(r.pending().count(), 1);
    }

    #[test]
    fn every_action_returns_to_idle() {
        let cases = [
            (ExternalChange::Modified, ConflictAction::SaveOwn, Resolution::WriteOwn),
            (ExternalChange::Deleted, ConflictAction::SaveOwn, Resolution::WriteOwn),
            (ExternalChange::Modified, ConflictAction::SaveAsNew, Resolution::WriteAsNew),
            (ExternalChange::Modified, ConflictAction::DiscardOwn, Resolution::ReloadExternal),
            (ExternalChange::Deleted, ConflictAction::DiscardOwn, Resolution::Forget),
        ];
        for (change, action, expected) in cases {
            let mut r = ConflictResolver::new();
            r.notify(N, change, true);
            assert_eq!(r.decide(N, action), Ok(expected), "{change} / {action:?}");
            assert_eq!(r.state(N), ConflictState::Idle);
        }
    }

    #[test]
    fn deciding_without_conflict_fails() {
        let mut r = ConflictResolver::new();
        assert_eq!(
            r.decide(N, ConflictAction::SaveOwn),
            Err(ConflictError::NotPending(N))
        );
    }

    #[test]
    fn parse_action_names() {
        assert_eq!(ConflictAction::parse("save-own"), Some(ConflictAction::SaveOwn));
        assert_eq!(ConflictAction::parse("SaveAsNew"), Some(ConflictAction::SaveAsNew));
        assert_eq!(ConflictAction::parse("discard"), Some(ConflictAction::DiscardOwn));
        assert_eq!(ConflictAction::parse("merge"), None);
    }
}
