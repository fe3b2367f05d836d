//! Shell execution tool.
//!
//! Runs a command through `sh -c` with a per-call timeout, a hard deny
//! list that no confirmation can override, and output capping: up to
//! 1 MiB captured, at most 50 KB returned.

use regex::Regex;

use janus_domain::{Error, Result};

use crate::tool::{Tool, ToolContext};

/// Hard cap on captured combined output.
const CAPTURE_CAP: usize = 1_048_576;

/// Cap on the output returned to the model.
const RETURN_CAP: usize = 50 * 1024;

pub struct ExecTool;

impl ExecTool {
    fn denied_by_policy(command: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| {
            match Regex::new(&format!("(?i){p}")) {
                Ok(re) => re.is_match(command),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid exec deny pattern, skipping");
                    false
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "workdir": { "type": "string", "description": "Working directory (defaults to the workspace)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("exec requires a 'command' argument".into()))?;

        if Self::denied_by_policy(command, &ctx.exec_deny_patterns) {
            return Err(Error::Other(format!(
                "command blocked by security policy: {command}"
            )));
        }

        let workdir = args
            .get("workdir")
            .and_then(|v| v.as_str())
            .map(|w| ctx.workspace_dir.join(w))
            .unwrap_or_else(|| ctx.workspace_dir.clone());

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workdir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Other(format!("failed to spawn: {e}")))?;

        let timeout = std::time::Duration::from_millis(ctx.exec_timeout_ms);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::Other(format!("process failed: {e}")))?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "command timed out after {}ms: {command}",
                    ctx.exec_timeout_ms
                )));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        truncate_to(&mut combined, CAPTURE_CAP);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            combined.push_str(&format!("\n[exit code: {code}]"));
        }
        if combined.trim().is_empty() {
            combined = "(no output)".into();
        }

        if combined.len() > RETURN_CAP {
            truncate_to(&mut combined, RETURN_CAP);
            combined.push_str("\n[output truncated]");
        }
        Ok(combined)
    }
}

fn truncate_to(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        s.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext {
            exec_deny_patterns: vec![r"rm\s+-rf\s+/".to_string()],
            exec_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn runs_command_and_returns_output() {
        let out = ExecTool
            .execute(serde_json::json!({"command": "echo hello"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let out = ExecTool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}), &ctx())
            .await
            .unwrap();
        assert!(out.contains("oops"));
        assert!(out.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn deny_pattern_blocks_before_spawn() {
        let err = ExecTool
            .execute(serde_json::json!({"command": "rm -rf / --no-preserve-root"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked by security policy"));
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let mut c = ctx();
        c.exec_timeout_ms = 100;
        let err = ExecTool
            .execute(serde_json::json!({"command": "sleep 5"}), &c)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let err = ExecTool.execute(serde_json::json!({}), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("command"));
    }
}
