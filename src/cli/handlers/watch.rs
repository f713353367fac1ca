use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cli::output::{event_to_json, format_event};
use crate::io::storage::FsStorage;
use crate::io::watcher::{NoteWatcher, run_watch_loop};
use crate::ops::notebook::{EventOutcome, Notebook};

/// Keep the index in sync with the notes directory until Ctrl-C
pub fn cmd_watch(root: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut notebook = Notebook::open_dir(root)?;
    let watcher = NoteWatcher::start(root, notebook.config().notes.clone())?;
    let interval = Duration::from_millis(notebook.config().watch.poll_interval_ms.max(1));

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))?;

    if !json {
        println!(
            "watching {} ({} notes, {} tasks), Ctrl-C to stop",
            root.display(),
            notebook.notes().count(),
            notebook.index().len()
        );
    }

    run_watch_loop(&watcher, &stop, interval, |batch| {
        let outcomes = notebook.handle_events(batch);
        report(&notebook, &outcomes, json);
    });
    Ok(())
}

fn report(notebook: &Notebook<FsStorage>, outcomes: &[EventOutcome], json: bool) {
    for outcome in outcomes {
        if matches!(outcome, EventOutcome::Ignored | EventOutcome::Unchanged(_)) {
            continue;
        }
        let event = event_to_json(outcome, |n| notebook.note(n).map(|e| e.file_name.clone()));
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "could not serialize event"),
            }
        } else {
            println!("{}", format_event(&event));
        }
    }
}
