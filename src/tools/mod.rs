//! Tool system
//!
//! Tools are registered once at startup into a `ToolRegistry`, gated per
//! caller profile by a `ToolPolicy`, and invoked through a `ToolGate` that
//! applies both.

use crate::error::Result;
use crate::types::Channel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod builtin;
pub mod gate;
pub mod policy;
pub mod registry;

pub use gate::ToolGate;
pub use policy::{ToolPolicy, FULL_PROFILE, TOOL_GROUPS, TOOL_PROFILES};
pub use registry::ToolRegistry;

/// Declared metadata for a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique registry key
    pub name: String,

    /// Human-readable description for the model
    pub description: String,

    /// JSON Schema for the tool input
    pub input_schema: serde_json::Value,

    /// Capability tags such as `filesystem:write` or `shell:exec`
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            capabilities: Vec::new(),
        }
    }

    /// Add a capability tag
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Who is invoking a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    /// Active policy profile
    pub profile: String,

    /// Channel the triggering message arrived on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    /// Chat the triggering message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

impl CallerContext {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            channel: None,
            chat_id: None,
        }
    }

    /// Record the conversation the call belongs to
    pub fn for_chat(mut self, channel: Channel, chat_id: impl Into<String>) -> Self {
        self.channel = Some(channel);
        self.chat_id = Some(chat_id.into());
        self
    }
}

/// Tool execution output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Output text
    pub content: String,

    /// Whether the tool considers the run successful
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Tool trait: the uniform execution contract for every tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared metadata; `definition().name` is the registry key
    fn definition(&self) -> ToolDefinition;

    /// Run the tool
    async fn execute(&self, input: &serde_json::Value, ctx: &CallerContext) -> Result<ToolOutput>;
}

/// Read a required string field from tool input
pub(crate) fn required_str<'a>(
    tool: &str,
    input: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::RelayError::Tool {
            tool: tool.to_string(),
            reason: format!("missing string field '{}'", field),
        })
}
