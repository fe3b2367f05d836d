pub mod exec;
pub mod fs;

pub use exec::ExecTool;
pub use fs::{EditFileTool, ReadFileTool, WriteFileTool};
