//! End-to-end scenarios against a real notes directory.
//!
//! Each test writes note files into a temp directory, opens a notebook on
//! it, and checks the graph, the index and the files on disk.

use std::fs;
use std::path::Path;

use notegraph::io::watcher::{WatchEvent, WatchKind};
use notegraph::model::tag::ReservedTag;
use notegraph::model::task::{TaskId, TaskStatus};
use notegraph::ops::notebook::{EventOutcome, Notebook};
use notegraph::io::storage::FsStorage;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const UNCHECKED: &str = "<input type=\"checkbox\" />";
const CHECKED: &str = "<input type=\"checkbox\" checked=\"checked\" />";

fn notes_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, text) in files {
        fs::write(dir.path().join(name), text).unwrap();
    }
    dir
}

fn open(dir: &Path) -> Notebook<FsStorage> {
    Notebook::open_dir(dir).unwrap()
}

fn files_on_disk(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn descriptions(nb: &Notebook<FsStorage>) -> Vec<String> {
    let mut out: Vec<String> = nb.index().iter().map(|t| t.description()).collect();
    out.sort();
    out
}

#[test]
fn opening_a_directory_builds_groups_and_tasks() {
    let dir = notes_dir(&[
        ("[Work] Plan.txt", &format!("{UNCHECKED} write report\n{CHECKED} send invoice")),
        ("[Work~Team] Sync.txt", &format!("{UNCHECKED} book room")),
        ("Shopping.txt", &format!("{UNCHECKED} buy milk")),
        ("notegraph.toml", "[watch]\npoll_interval_ms = 100\n"),
    ]);
    let nb = open(dir.path());

    assert_eq!(nb.notes().count(), 3);
    assert_eq!(nb.index().len(), 4);
    assert_eq!(nb.config().watch.poll_interval_ms, 100);
    assert!(nb.graph().resolve_external_name("Work~Team").is_some());

    let shopping = nb.note_by_file("Shopping.txt").unwrap();
    assert_eq!(
        nb.note(shopping).unwrap().group,
        nb.graph().reserved(ReservedTag::NotGrouped)
    );
    assert_eq!(
        descriptions(&nb),
        vec!["book room", "buy milk", "send invoice", "write report"]
    );
    assert!(nb.check().is_empty());
}

#[test]
fn renaming_onto_an_existing_group_changes_nothing() {
    let dir = notes_dir(&[("[Test1] a.txt", "one"), ("[Test4] b.txt", "two")]);
    let mut nb = open(dir.path());
    let test1 = nb.graph().resolve_external_name("Test1").unwrap();

    assert!(nb.rename_tag(test1, Some("Test4")).is_err());
    assert_eq!(files_on_disk(dir.path()), vec!["[Test1] a.txt", "[Test4] b.txt"]);
    assert_eq!(nb.graph().resolve_external_name("Test1"), Some(test1));
}

#[test]
fn renaming_a_group_renames_its_files() {
    let dir = notes_dir(&[("[Test1] a.txt", "one"), ("[Test1~Sub] b.txt", "two")]);
    let mut nb = open(dir.path());
    let test1 = nb.graph().resolve_external_name("Test1").unwrap();

    nb.rename_tag(test1, Some("Test2")).unwrap();

    assert_eq!(files_on_disk(dir.path()), vec!["[Test2] a.txt", "[Test2~Sub] b.txt"]);
    assert_eq!(nb.graph().resolve_external_name("Test2"), Some(test1));
    assert!(nb.note_by_file("[Test2~Sub] b.txt").is_some());
    assert!(nb.check().is_empty());
}

#[test]
fn deleting_a_group_ungroups_its_notes() {
    let dir = notes_dir(&[
        ("[Test3] a.txt", &format!("{UNCHECKED} first")),
        ("[Test3~Deep] b.txt", "plain"),
        ("a.txt", "already here"),
    ]);
    let mut nb = open(dir.path());
    let test3 = nb.graph().resolve_external_name("Test3").unwrap();

    nb.delete_tag(test3).unwrap();

    assert_eq!(files_on_disk(dir.path()), vec!["a (1).txt", "a.txt", "b.txt"]);
    assert!(nb.graph().resolve_external_name("Test3").is_none());
    let not_grouped = nb.graph().reserved(ReservedTag::NotGrouped);
    assert_eq!(nb.graph().notes_of(not_grouped).count(), 3);
    assert_eq!(descriptions(&nb), vec!["first"]);
    assert!(nb.check().is_empty());
}

#[test]
fn completing_a_task_persists_to_the_file() {
    let dir = notes_dir(&[("todo.txt", &format!("intro\n{UNCHECKED} buy milk\nend"))]);
    let mut nb = open(dir.path());
    let id = nb.index().iter().next().unwrap().id.clone();

    nb.set_task_completed(&id, true).unwrap();

    let text = fs::read_to_string(dir.path().join("todo.txt")).unwrap();
    assert!(text.starts_with("intro\n<input type=\"checkbox\" checked=\"checked\" />"));
    assert!(text.contains(&format!("id=\"{}\"", id)));
    assert!(text.ends_with(" buy milk\nend"));

    // a fresh notebook reads the same identity back
    let reopened = open(dir.path());
    let task = reopened.index().get(&id).unwrap();
    assert!(task.completed);
    assert_eq!(task.status, TaskStatus::Done);
}

#[test]
fn external_edit_keeps_ids_of_tasks_written_in_text() {
    let dir = notes_dir(&[(
        "todo.txt",
        &format!("{UNCHECKED}<!-- id=\"t1\" --> alpha\n{UNCHECKED} beta"),
    )]);
    let mut nb = open(dir.path());
    let note = nb.note_by_file("todo.txt").unwrap();

    fs::write(
        dir.path().join("todo.txt"),
        format!("new line first\n{CHECKED}<!-- id=\"t1\" --> alpha\n{UNCHECKED} beta"),
    )
    .unwrap();
    let outcomes = nb.handle_events([WatchEvent::new(WatchKind::Modified, "todo.txt")]);

    let EventOutcome::Updated(updated, report) = &outcomes[0] else {
        panic!("expected an update, got {:?}", outcomes);
    };
    assert_eq!(*updated, note);
    assert_eq!(report.matched_by_id, vec![TaskId("t1".into())]);
    assert!(nb.index().get(&TaskId("t1".into())).unwrap().completed);
    assert_eq!(nb.index().len(), 2);
}

#[test]
fn deleted_file_removes_its_tasks() {
    let dir = notes_dir(&[("gone.txt", &format!("{UNCHECKED} soon gone")), ("kept.txt", "")]);
    let mut nb = open(dir.path());
    let note = nb.note_by_file("gone.txt").unwrap();

    fs::remove_file(dir.path().join("gone.txt")).unwrap();
    let outcomes = nb.handle_events([WatchEvent::new(WatchKind::Deleted, "gone.txt")]);

    assert_eq!(outcomes, vec![EventOutcome::Removed(note)]);
    assert!(nb.index().is_empty());
    assert_eq!(nb.notes().count(), 1);
}

#[test]
fn archive_then_restore_round_trips_files() {
    let dir = notes_dir(&[("[Proj] a.txt", "x"), ("[Proj~Old] b.txt", "y")]);
    let mut nb = open(dir.path());
    let proj = nb.graph().resolve_external_name("Proj").unwrap();

    nb.archive_group(proj).unwrap();
    assert_eq!(
        files_on_disk(dir.path()),
        vec!["[Archive~Proj] a.txt", "[Archive~Proj~Old] b.txt"]
    );
    assert!(nb.graph().node(proj).unwrap().is_archived);

    nb.restore_group(proj).unwrap();
    assert_eq!(files_on_disk(dir.path()), vec!["[Proj] a.txt", "[Proj~Old] b.txt"]);
    assert!(!nb.graph().node(proj).unwrap().is_archived);
    assert!(nb.check().is_empty());
}

#[test]
fn config_file_is_not_a_note() {
    let dir = notes_dir(&[("notegraph.toml", ""), ("readme", "no extension")]);
    let nb = open(dir.path());
    assert_eq!(nb.notes().count(), 0);
}
