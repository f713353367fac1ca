pub mod checkbox;
pub mod meta_comment;
pub mod task_parser;
pub mod task_serializer;

pub use task_parser::{NoTags, TagResolver, describe, extract};
pub use task_serializer::{render_task, splice_task};
