//! Turning stored message markdown into terminal lines.

pub mod actions;
pub mod highlight;
pub mod links;
pub mod markdown;

pub use links::LinkContext;
pub use markdown::{render_markdown, CodeBlock, FileLink, RenderedMessage};
