mod init;
mod watch;
pub use init::cmd_init;
pub use watch::cmd_watch;

use std::path::{Path, PathBuf};

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::storage::FsStorage;
use crate::model::tag::TagId;
use crate::model::task::{TaskId, TaskStatus};
use crate::ops::notebook::Notebook;
use crate::ops::views::{TaskFilter, tag_counts};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;
    let root = notes_root(cli.notes_dir.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&root),

        // Read commands
        Commands::Tree => cmd_tree(&root, json),
        Commands::Tasks(args) => cmd_tasks(&root, args, json),
        Commands::Check => cmd_check(&root, json),

        // Write commands
        Commands::Status(args) => cmd_status(&root, args),
        Commands::RenameTag(args) => cmd_rename_tag(&root, args),
        Commands::Archive(args) => cmd_archive(&root, args, true),
        Commands::Restore(args) => cmd_archive(&root, args, false),

        Commands::Watch => cmd_watch(&root, json),
    }
}

fn notes_root(dir: Option<&str>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match dir {
        Some(dir) => std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e).into()),
        None => Ok(std::env::current_dir()?),
    }
}

fn open(root: &Path) -> Result<Notebook<FsStorage>, Box<dyn std::error::Error>> {
    Ok(Notebook::open_dir(root)?)
}

fn find_group(notebook: &Notebook<FsStorage>, path: &str) -> Result<TagId, String> {
    notebook
        .graph()
        .resolve_external_name(path)
        .filter(|id| notebook.graph().node(*id).is_some_and(|n| n.is_group))
        .ok_or_else(|| format!("no group named '{}'", path))
}

fn find_tag(notebook: &Notebook<FsStorage>, path: &str) -> Result<TagId, String> {
    notebook
        .graph()
        .find_tag_path(path)
        .ok_or_else(|| format!("no tag named '{}'", path))
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_tree(root: &Path, json: bool) -> CmdResult {
    let notebook = open(root)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tag_tree_json(notebook.graph()))?);
        return Ok(());
    }
    let graph = notebook.graph();
    let counts = tag_counts(graph, notebook.notes().count());
    for id in graph.preorder() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let depth = node.level + usize::from(!node.is_group);
        let count = counts.iter().find(|c| c.tag == id).map(|c| c.notes);
        let mut line = format!("{}{}", "  ".repeat(depth), node.name);
        if node.is_archived && node.reserved.is_none() {
            line.push_str(" (archived)");
        }
        if let Some(n) = count.filter(|n| *n > 0) {
            line.push_str(&format!("  [{}]", n));
        }
        println!("{}", line);
    }
    Ok(())
}

fn cmd_tasks(root: &Path, args: TasksArgs, json: bool) -> CmdResult {
    let notebook = open(root)?;
    let filter = TaskFilter {
        group: args
            .group
            .as_deref()
            .map(|g| find_group(&notebook, g))
            .transpose()?,
        tag: args
            .tag
            .as_deref()
            .map(|t| find_tag(&notebook, t))
            .transpose()?,
        status: args
            .status
            .as_deref()
            .map(|s| TaskStatus::parse(s).ok_or_else(|| format!("unknown status '{}'", s)))
            .transpose()?,
        hide_completed: args.open,
    };
    let tasks = filter.apply(notebook.graph(), notebook.index());

    if json {
        let out: Vec<TaskJson> = tasks
            .iter()
            .map(|t| task_to_json(t, notebook.note(t.note), notebook.graph()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut current = None;
    for task in tasks {
        if current != Some(task.note) {
            current = Some(task.note);
            if let Some(note) = notebook.note(task.note) {
                println!("{}", note.file_name);
            }
        }
        println!("  {}", format_task_line(task, notebook.graph()));
    }
    Ok(())
}

fn cmd_check(root: &Path, json: bool) -> CmdResult {
    let notebook = open(root)?;
    let problems = notebook.check();
    if json {
        let out = CheckJson {
            ok: problems.is_empty(),
            problems,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if problems.is_empty() {
        println!(
            "ok: {} notes, {} tasks, {} tags",
            notebook.notes().count(),
            notebook.index().len(),
            notebook.graph().len()
        );
        return Ok(());
    }
    println!("Problems:");
    for p in &problems {
        println!("  {}", p);
    }
    Err(format!("{} problem(s) found", problems.len()).into())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_status(root: &Path, args: StatusArgs) -> CmdResult {
    let mut notebook = open(root)?;
    let status = TaskStatus::parse(&args.status)
        .ok_or_else(|| format!("unknown status '{}'", args.status))?;
    let id = TaskId(args.id);
    notebook.set_task_status(&id, status)?;
    println!("{}: {}", id, status);
    Ok(())
}

fn cmd_rename_tag(root: &Path, args: RenameTagArgs) -> CmdResult {
    let mut notebook = open(root)?;
    let tag = if args.free {
        find_tag(&notebook, &args.tag)?
    } else {
        find_group(&notebook, &args.tag)?
    };
    match (&args.new_name, args.delete) {
        (Some(name), false) => {
            notebook.rename_tag(tag, Some(name))?;
            println!("renamed {} -> {}", args.tag, name);
        }
        (None, true) => {
            notebook.delete_tag(tag)?;
            println!("deleted {}", args.tag);
        }
        _ => return Err("give a new name, or --delete".into()),
    }
    Ok(())
}

fn cmd_archive(root: &Path, args: GroupArgs, archive: bool) -> CmdResult {
    let mut notebook = open(root)?;
    let group = find_group(&notebook, &args.group)?;
    if archive {
        notebook.archive_group(group)?;
        println!("archived {}", args.group);
    } else {
        notebook.restore_group(group)?;
        println!("restored {}", args.group);
    }
    Ok(())
}
