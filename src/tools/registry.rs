//! Tool registry
//!
//! Built once at startup with `&mut self` registration, then shared behind an
//! `Arc`. Steady-state reads take no locks.

use super::{CallerContext, Tool, ToolDefinition, ToolOutput};
use crate::error::{RelayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

struct RegisteredTool {
    definition: ToolDefinition,
    tool: Arc<dyn Tool>,
}

/// Registry of every known tool
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under the name from its definition
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        self.register_with(definition, tool)
    }

    /// Register an implementation under an explicit definition
    pub fn register_with(&mut self, definition: ToolDefinition, tool: Arc<dyn Tool>) -> Result<()> {
        if self.tools.contains_key(&definition.name) {
            return Err(RelayError::DuplicateTool {
                name: definition.name,
            });
        }

        tracing::debug!(
            tool = %definition.name,
            capabilities = ?definition.capabilities,
            "Registering tool"
        );
        self.tools
            .insert(definition.name.clone(), RegisteredTool { definition, tool });
        Ok(())
    }

    /// Get a tool definition
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition> {
        self.tools
            .get(name)
            .map(|t| &t.definition)
            .ok_or_else(|| RelayError::UnknownTool {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All definitions, sorted by name
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| &t.definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name
    ///
    /// Does not consult any policy; use `ToolGate` for permission-checked calls.
    pub async fn invoke(
        &self,
        name: &str,
        input: &serde_json::Value,
        ctx: &CallerContext,
    ) -> Result<ToolOutput> {
        let registered = self.tools.get(name).ok_or_else(|| RelayError::UnknownTool {
            name: name.to_string(),
        })?;

        let span = tracing::info_span!(
            "a3s.tool.invoke",
            "a3s.tool.name" = %name,
            "a3s.tool.profile" = %ctx.profile,
            "a3s.tool.success" = tracing::field::Empty,
            "a3s.tool.duration_ms" = tracing::field::Empty,
        );
        let start = std::time::Instant::now();

        let result = registered
            .tool
            .execute(input, ctx)
            .instrument(span.clone())
            .await;

        span.record("a3s.tool.duration_ms", start.elapsed().as_millis() as u64);
        match &result {
            Ok(output) => {
                span.record("a3s.tool.success", output.success);
            }
            Err(e) => {
                span.record("a3s.tool.success", false);
                tracing::warn!(parent: &span, error = %e, "Tool failed");
            }
        }

        result
    }
}
