use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use super::note::NoteId;
use super::tag::TagId;
use super::task::TaskId;

/// Change notifications emitted by the tag graph, the task index and the notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEvent {
    TagAdded(TagId),
    TagRemoved(TagId),
    /// Name, parent or a derived flag of the tag changed
    TagChanged(TagId),
    /// Set of group tags changed (order or membership)
    GroupListChanged,
    TagLinksChanged(TagId),
    TaskAdded(TaskId),
    TaskRemoved(TaskId),
    TaskUpdated(TaskId),
    NoteAdded(NoteId),
    NoteRemoved(NoteId),
    NoteRenamed(NoteId),
    /// An external change collided with unsaved local edits
    ConflictRaised(NoteId),
    ConflictResolved(NoteId),
    /// The whole notes directory was rescanned
    Rescanned,
}

/// Fan-out of events to any number of subscribers. Subscribers whose
/// receiver has been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<mpsc::Sender<IndexEvent>>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier::default()
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<IndexEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: IndexEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Drain everything currently queued on a subscription
pub fn drain(rx: &mpsc::Receiver<IndexEvent>) -> Vec<IndexEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut notifier = Notifier::new();
        let rx = notifier.subscribe();
        let dropped = notifier.subscribe();
        drop(dropped);

        notifier.emit(IndexEvent::Rescanned);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(drain(&rx), vec![IndexEvent::Rescanned]);
        assert!(drain(&rx).is_empty());
    }
}
