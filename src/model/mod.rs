pub mod config;
pub mod event;
pub mod note;
pub mod tag;
pub mod task;

pub use config::*;
pub use event::*;
pub use note::*;
pub use tag::*;
pub use task::*;
