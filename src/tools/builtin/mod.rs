//! Builtin tools: shell execution and workspace-confined filesystem access

use super::registry::ToolRegistry;
use crate::config::ToolsConfig;
use crate::error::{RelayError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod filesystem;
mod shell;

pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use shell::ShellTool;

/// Register every builtin tool
pub fn register_all(registry: &mut ToolRegistry, config: &ToolsConfig) -> Result<()> {
    let workspace = Workspace::new(&config.workspace);

    registry.register(Arc::new(ShellTool::new(
        workspace.clone(),
        std::time::Duration::from_secs(config.shell_timeout_secs),
        config.max_output_bytes,
    )))?;
    registry.register(Arc::new(ReadFileTool::new(
        workspace.clone(),
        config.max_output_bytes,
    )))?;
    registry.register(Arc::new(WriteFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(ListDirTool::new(workspace)))?;
    Ok(())
}

/// Sandbox root for builtin tools
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        // Canonicalize so prefix checks survive symlinked roots (/var -> /private/var)
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an existing path, rejecting anything outside the workspace
    pub fn resolve(&self, tool: &str, path: &str) -> Result<PathBuf> {
        let canonical = self
            .root
            .join(path)
            .canonicalize()
            .map_err(|e| tool_error(tool, format!("cannot resolve '{}': {}", path, e)))?;
        self.ensure_inside(tool, path, canonical)
    }

    /// Resolve a path that may not exist yet; its parent directory must
    pub fn resolve_for_write(&self, tool: &str, path: &str) -> Result<PathBuf> {
        let joined = self.root.join(path);
        let (Some(parent), Some(file_name)) = (joined.parent(), joined.file_name()) else {
            return Err(tool_error(tool, format!("invalid path '{}'", path)));
        };
        let parent = parent.canonicalize().map_err(|e| {
            tool_error(tool, format!("parent directory of '{}' is unusable: {}", path, e))
        })?;
        let target = parent.join(file_name);

        // Writes follow symlinks, so check where an existing link points
        let is_link = std::fs::symlink_metadata(&target)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let target = if is_link {
            target.canonicalize().map_err(|e| {
                tool_error(tool, format!("cannot resolve link '{}': {}", path, e))
            })?
        } else {
            target
        };
        self.ensure_inside(tool, path, target)
    }

    fn ensure_inside(&self, tool: &str, requested: &str, resolved: PathBuf) -> Result<PathBuf> {
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(tool_error(tool, format!("path escapes workspace: {}", requested)))
        }
    }
}

pub(crate) fn tool_error(tool: &str, reason: impl Into<String>) -> RelayError {
    RelayError::Tool {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

/// Cut `text` to at most `max` bytes on a char boundary
pub(crate) fn truncate_output(mut text: String, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text, false);
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    (text, true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fresh directory under the system temp dir
    pub(crate) fn temp_workspace() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("a3s-relay-ws-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_register_all() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, &ToolsConfig::default()).unwrap();

        assert_eq!(
            registry.names(),
            vec!["list_dir", "read_file", "shell", "write_file"]
        );
        assert!(registry
            .lookup("write_file")
            .unwrap()
            .has_capability("filesystem:write"));
        assert!(registry.lookup("shell").unwrap().has_capability("shell:exec"));

        // Registering twice trips duplicate detection
        assert!(matches!(
            register_all(&mut registry, &ToolsConfig::default()),
            Err(RelayError::DuplicateTool { .. })
        ));
    }

    #[test]
    fn test_resolve_inside_workspace() {
        let dir = temp_workspace();
        std::fs::write(dir.join("a.txt"), "x").unwrap();
        let ws = Workspace::new(&dir);

        let resolved = ws.resolve("read_file", "a.txt").unwrap();
        assert!(resolved.starts_with(ws.root()));
        assert!(ws.resolve("read_file", ".").is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = temp_workspace();
        std::fs::create_dir_all(dir.join("inner")).unwrap();
        let ws = Workspace::new(dir.join("inner"));
        std::fs::write(dir.join("secret.txt"), "x").unwrap();

        let err = ws.resolve("read_file", "../secret.txt").unwrap_err();
        assert!(err.to_string().contains("escapes workspace"));

        let err = ws.resolve_for_write("write_file", "../evil.txt").unwrap_err();
        assert!(err.to_string().contains("escapes workspace"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_for_write_checks_symlink_target() {
        let dir = temp_workspace();
        std::fs::create_dir_all(dir.join("ws")).unwrap();
        std::fs::write(dir.join("outside.txt"), "x").unwrap();
        std::fs::write(dir.join("ws/inside.txt"), "x").unwrap();
        std::os::unix::fs::symlink("../outside.txt", dir.join("ws/out-link")).unwrap();
        std::os::unix::fs::symlink("inside.txt", dir.join("ws/in-link")).unwrap();
        std::os::unix::fs::symlink("../missing.txt", dir.join("ws/dangling")).unwrap();
        let ws = Workspace::new(dir.join("ws"));

        let err = ws.resolve_for_write("write_file", "out-link").unwrap_err();
        assert!(err.to_string().contains("escapes workspace"));

        let resolved = ws.resolve_for_write("write_file", "in-link").unwrap();
        assert_eq!(resolved, ws.root().join("inside.txt"));

        assert!(ws.resolve_for_write("write_file", "dangling").is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_for_write_requires_parent() {
        let dir = temp_workspace();
        let ws = Workspace::new(&dir);

        assert!(ws.resolve_for_write("write_file", "new.txt").is_ok());
        assert!(ws
            .resolve_for_write("write_file", "missing/new.txt")
            .is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_truncate_output() {
        let (text, cut) = truncate_output("hello".to_string(), 10);
        assert_eq!(text, "hello");
        assert!(!cut);

        let (text, cut) = truncate_output("héllo".to_string(), 2);
        assert_eq!(text, "h");
        assert!(cut);
    }
}
