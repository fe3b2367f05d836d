//! Filesystem tools: read, write, and in-place edit, all bounded by
//! the configured maximum file size and anchored at the workspace.

use std::path::PathBuf;

use janus_domain::{Error, Result};

use crate::tool::{Tool, ToolContext};

fn resolve(ctx: &ToolContext, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        ctx.workspace_dir.join(p)
    }
}

fn path_arg(args: &serde_json::Value) -> Result<&str> {
    args.get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other("missing 'path' argument".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String> {
        let path = resolve(ctx, path_arg(&args)?);
        let meta = std::fs::metadata(&path)
            .map_err(|e| Error::Other(format!("cannot read {}: {e}", path.display())))?;
        if meta.len() > ctx.max_file_size {
            return Err(Error::Other(format!(
                "file too large: {} bytes (limit {})",
                meta.len(),
                ctx.max_file_size
            )));
        }
        std::fs::read_to_string(&path)
            .map_err(|e| Error::Other(format!("cannot read {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteFileTool;

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String> {
        let path = resolve(ctx, path_arg(&args)?);
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("missing 'content' argument".into()))?;

        if content.len() as u64 > ctx.max_file_size {
            return Err(Error::Other(format!(
                "content too large: {} bytes (limit {})",
                content.len(),
                ctx.max_file_size
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EditFileTool;

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. The snippet must occur exactly once."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "old_text": { "type": "string", "description": "Exact text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String> {
        let path = resolve(ctx, path_arg(&args)?);
        let old_text = args
            .get("old_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("missing 'old_text' argument".into()))?;
        let new_text = args
            .get("new_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("missing 'new_text' argument".into()))?;

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Other(format!("cannot read {}: {e}", path.display())))?;

        let occurrences = content.matches(old_text).count();
        match occurrences {
            0 => Err(Error::Other(format!(
                "text not found in {}",
                path.display()
            ))),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                if updated.len() as u64 > ctx.max_file_size {
                    return Err(Error::Other("edited file would exceed size limit".into()));
                }
                std::fs::write(&path, updated)?;
                Ok(format!("Edited {}", path.display()))
            }
            n => Err(Error::Other(format!(
                "text occurs {n} times in {}; provide a longer, unique snippet",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_in(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            workspace_dir: dir.to_path_buf(),
            max_file_size: 1024,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());

        let written = WriteFileTool
            .execute(json!({"path": "notes/todo.md", "content": "- ship it"}), &ctx)
            .await
            .unwrap();
        assert!(written.starts_with("Wrote 9 bytes"));

        let read = ReadFileTool
            .execute(json!({"path": "notes/todo.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read, "- ship it");
    }

    #[tokio::test]
    async fn read_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        std::fs::write(dir.path().join("big.txt"), "x".repeat(2048)).unwrap();

        let err = ReadFileTool
            .execute(json!({"path": "big.txt"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn edit_replaces_unique_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        std::fs::write(dir.path().join("main.rs"), "fn main() { old(); }").unwrap();

        EditFileTool
            .execute(
                json!({"path": "main.rs", "old_text": "old()", "new_text": "new()"}),
                &ctx,
            )
            .await
            .unwrap();
        let content = std::fs::read_to_string(dir.path().join("main.rs")).unwrap();
        assert_eq!(content, "fn main() { new(); }");
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        std::fs::write(dir.path().join("dup.txt"), "aa aa").unwrap();

        let err = EditFileTool
            .execute(
                json!({"path": "dup.txt", "old_text": "aa", "new_text": "bb"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 times"));
    }

    #[tokio::test]
    async fn edit_rejects_missing_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        std::fs::write(dir.path().join("f.txt"), "content").unwrap();

        let err = EditFileTool
            .execute(
                json!({"path": "f.txt", "old_text": "absent", "new_text": "x"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
