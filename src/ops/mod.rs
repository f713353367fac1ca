pub mod conflict;
pub mod notebook;
pub mod reconcile;
pub mod tag_graph;
pub mod task_index;
pub mod views;
