use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ng", about = concat!("notegraph v", env!("CARGO_PKG_VERSION"), " - tags and tasks across a folder of notes"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different notes directory
    #[arg(short = 'C', long = "notes-dir", global = true)]
    pub notes_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default notegraph.toml into the notes directory
    Init,
    /// Show the tag tree with note counts
    Tree,
    /// List tasks, optionally filtered
    Tasks(TasksArgs),
    /// Set a task's status (open, inprogress, blocked, done)
    Status(StatusArgs),
    /// Rename or delete a tag or group
    RenameTag(RenameTagArgs),
    /// Move a group under Archive
    Archive(GroupArgs),
    /// Move an archived group back out of Archive
    Restore(GroupArgs),
    /// Validate tag graph and index integrity
    Check,
    /// Watch the notes directory and keep the index up to date
    Watch,
}

#[derive(Args)]
pub struct TasksArgs {
    /// Only tasks in this group (external name, e.g. Work~Team), including subgroups
    #[arg(long)]
    pub group: Option<String>,
    /// Only tasks with this tag (or one of its sub-tags)
    #[arg(long)]
    pub tag: Option<String>,
    /// Only tasks with this status
    #[arg(long)]
    pub status: Option<String>,
    /// Hide completed tasks
    #[arg(long)]
    pub open: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Task ID
    pub id: String,
    /// New status
    pub status: String,
}

#[derive(Args)]
pub struct RenameTagArgs {
    /// Group external name, or free tag path with --free
    pub tag: String,
    /// New name (omit together with --delete to remove the tag)
    pub new_name: Option<String>,
    /// Address a free tag instead of a group
    #[arg(long)]
    pub free: bool,
    /// Delete the tag; notes of a deleted group become ungrouped
    #[arg(long, conflicts_with = "new_name")]
    pub delete: bool,
}

#[derive(Args)]
pub struct GroupArgs {
    /// Group external name
    pub group: String,
}
