//! Deterministic system-prompt assembly.
//!
//! The prompt is a fixed sequence of delimited sections; which sections
//! appear depends only on the context mode, the message, and what is on
//! disk, never on call ordering. Sections are joined with
//! `\n\n---\n\n`.

mod builder;
mod skills_section;

pub use builder::{ContextBuilder, ContextPaths, PromptInput};
