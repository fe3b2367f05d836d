//! Tool execution pipeline: the tool trait with per-call context, the
//! registry with user policy and gate enforcement, and the built-in
//! shell/filesystem tools.

pub mod builtin;
mod gate;
mod registry;
mod tool;

pub use builtin::{EditFileTool, ExecTool, ReadFileTool, WriteFileTool};
pub use gate::{Confirmer, DenyAllConfirmer, GatePolicy};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext};
