//! Filesystem tools confined to the workspace root

use super::{tool_error, truncate_output, Workspace};
use crate::error::Result;
use crate::tools::{required_str, CallerContext, Tool, ToolDefinition, ToolOutput};
use async_trait::async_trait;

const READ_FILE: &str = "read_file";
const WRITE_FILE: &str = "write_file";
const LIST_DIR: &str = "list_dir";

fn path_schema(extra: serde_json::Value, required: &[&str]) -> serde_json::Value {
    let mut properties = serde_json::json!({
        "path": { "type": "string", "description": "Path relative to the workspace root" }
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(extra.clone());
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// `read_file`: return a file's text
pub struct ReadFileTool {
    workspace: Workspace,
    max_output_bytes: usize,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace, max_output_bytes: usize) -> Self {
        Self {
            workspace,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            READ_FILE,
            "Read a UTF-8 text file from the workspace",
            path_schema(serde_json::json!({}), &["path"]),
        )
        .with_capability("filesystem:read")
    }

    async fn execute(&self, input: &serde_json::Value, _ctx: &CallerContext) -> Result<ToolOutput> {
        let path = required_str(READ_FILE, input, "path")?;
        let resolved = self.workspace.resolve(READ_FILE, path)?;

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| tool_error(READ_FILE, format!("failed to read '{}': {}", path, e)))?;
        let size = bytes.len();
        let text = String::from_utf8(bytes)
            .map_err(|_| tool_error(READ_FILE, format!("'{}' is not valid UTF-8", path)))?;
        let (text, truncated) = truncate_output(text, self.max_output_bytes);

        Ok(ToolOutput::success(text).with_metadata(serde_json::json!({
            "bytes": size,
            "truncated": truncated,
        })))
    }
}

/// `write_file`: create or overwrite a file
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            WRITE_FILE,
            "Write text to a file in the workspace, replacing existing content",
            path_schema(
                serde_json::json!({ "content": { "type": "string" } }),
                &["path", "content"],
            ),
        )
        .with_capability("filesystem:write")
    }

    async fn execute(&self, input: &serde_json::Value, ctx: &CallerContext) -> Result<ToolOutput> {
        let path = required_str(WRITE_FILE, input, "path")?;
        let content = required_str(WRITE_FILE, input, "content")?;
        let resolved = self.workspace.resolve_for_write(WRITE_FILE, path)?;

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| tool_error(WRITE_FILE, format!("failed to write '{}': {}", path, e)))?;

        tracing::debug!(
            path = %resolved.display(),
            bytes = content.len(),
            profile = %ctx.profile,
            "File written"
        );
        Ok(ToolOutput::success(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path
        )))
    }
}

/// `list_dir`: list a directory, subdirectories suffixed with `/`
pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            LIST_DIR,
            "List entries of a workspace directory",
            path_schema(serde_json::json!({}), &[]),
        )
        .with_capability("filesystem:read")
    }

    async fn execute(&self, input: &serde_json::Value, _ctx: &CallerContext) -> Result<ToolOutput> {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = self.workspace.resolve(LIST_DIR, path)?;

        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| tool_error(LIST_DIR, format!("failed to list '{}': {}", path, e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| tool_error(LIST_DIR, e.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let count = entries.len();
        Ok(ToolOutput::success(entries.join("\n"))
            .with_metadata(serde_json::json!({ "entries": count })))
    }
}
