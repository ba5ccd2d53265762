//! `shell` tool: runs a command through `sh -c` inside the workspace

use super::{tool_error, truncate_output, Workspace};
use crate::error::Result;
use crate::tools::{required_str, CallerContext, Tool, ToolDefinition, ToolOutput};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const NAME: &str = "shell";

pub struct ShellTool {
    workspace: Workspace,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellTool {
    pub fn new(workspace: Workspace, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            workspace,
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            NAME,
            "Run a shell command in the workspace and return its combined output",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command line passed to sh -c" },
                    "timeout_secs": { "type": "integer", "minimum": 1 }
                },
                "required": ["command"]
            }),
        )
        .with_capability("shell:exec")
    }

    async fn execute(&self, input: &serde_json::Value, ctx: &CallerContext) -> Result<ToolOutput> {
        let command = required_str(NAME, input, "command")?;
        let timeout = input
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .map_or(self.timeout, |requested| requested.min(self.timeout));

        tracing::debug!(command = %command, chat_id = ?ctx.chat_id, "Running shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| tool_error(NAME, format!("failed to spawn: {}", e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| tool_error(NAME, format!("timed out after {}s", timeout.as_secs())))?
            .map_err(|e| tool_error(NAME, format!("failed to wait: {}", e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        let (text, truncated) = truncate_output(text, self.max_output_bytes);

        let exit_code = output.status.code();
        let result = if output.status.success() {
            ToolOutput::success(text)
        } else {
            ToolOutput::failure(text)
        };
        Ok(result.with_metadata(serde_json::json!({
            "exit_code": exit_code,
            "truncated": truncated,
        })))
    }
}
