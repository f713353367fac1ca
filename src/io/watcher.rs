use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::model::config::NotesConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Created,
    Modified,
    Deleted,
}

/// A change to one note file, sent from the watcher thread to the index thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub filename: String,
}

impl WatchEvent {
    pub fn new(kind: WatchKind, filename: impl Into<String>) -> Self {
        WatchEvent {
            kind,
            filename: filename.into(),
        }
    }
}

/// Map a raw notify event to per-path change kinds. Renames become a
/// delete of the old path and a create of the new one.
fn classify(event: &Event) -> Vec<(WatchKind, &Path)> {
    let paths: Vec<&Path> = event.paths.iter().map(PathBuf::as_path).collect();
    let presence = |p: &Path| {
        if p.exists() {
            WatchKind::Created
        } else {
            WatchKind::Deleted
        }
    };
    match event.kind {
        EventKind::Create(_) => paths.into_iter().map(|p| (WatchKind::Created, p)).collect(),
        EventKind::Remove(_) => paths.into_iter().map(|p| (WatchKind::Deleted, p)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(|p| (WatchKind::Deleted, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(|p| (WatchKind::Created, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![(WatchKind::Deleted, paths[0]), (WatchKind::Created, paths[1])]
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            paths.into_iter().map(|p| (presence(p), p)).collect()
        }
        EventKind::Modify(_) => paths
            .into_iter()
            .map(|p| match presence(p) {
                WatchKind::Created => (WatchKind::Modified, p),
                kind => (kind, p),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Keep only note files sitting directly in `root`, as bare file names
fn to_watch_events(event: &Event, root: &Path, notes: &NotesConfig) -> Vec<WatchEvent> {
    classify(event)
        .into_iter()
        .filter(|(_, p)| p.parent() == Some(root))
        .filter_map(|(kind, p)| {
            let name = p.file_name()?.to_str()?;
            notes
                .is_note_file(name)
                .then(|| WatchEvent::new(kind, name))
        })
        .collect()
}

/// A file system watcher for the notes directory. The notify callback only
/// forwards events; all parsing happens wherever `poll()` is called.
pub struct NoteWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<WatchEvent>,
}

impl NoteWatcher {
    /// Start watching `root` (non-recursively)
    pub fn start(root: &Path, notes: NotesConfig) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        // notify reports canonical paths on some platforms
        let root_owned = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let plain_root = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                let mut events = to_watch_events(&event, &root_owned, &notes);
                if events.is_empty() && root_owned != plain_root {
                    events = to_watch_events(&event, &plain_root, &notes);
                }
                for evt in events {
                    if tx.send(evt).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )?;

        watcher.watch(root, RecursiveMode::NonRecursive)?;
        tracing::info!(root = %root.display(), "watching notes directory");
        Ok(NoteWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking poll for pending file events.
    /// Returns all queued events (may be empty).
    pub fn poll(&self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = self.rx.try_recv() {
            events.push(evt);
        }
        events
    }
}

/// Drain `watcher` every `interval` and hand each non-empty batch to
/// `handle`, until `stop` is set. The stop flag is checked once per poll.
pub fn run_watch_loop(
    watcher: &NoteWatcher,
    stop: &AtomicBool,
    interval: Duration,
    mut handle: impl FnMut(Vec<WatchEvent>),
) {
    while !stop.load(Ordering::Relaxed) {
        let batch = watcher.poll();
        if !batch.is_empty() {
            tracing::debug!(count = batch.len(), "file events");
            handle(batch);
        }
        std::thread::sleep(interval);
    }
    tracing::info!("watch loop stopped");
}
