//! Permission-checked tool invocation
//!
//! `ToolGate` is the entry point the agent runtime uses: it pairs the shared
//! registry with the shared policy and enforces the check before every call.

use super::policy::ToolPolicy;
use super::registry::ToolRegistry;
use super::{CallerContext, ToolDefinition, ToolOutput};
use crate::error::Result;
use std::sync::Arc;

/// Registry + policy, shared read-only across request handlers
#[derive(Clone)]
pub struct ToolGate {
    registry: Arc<ToolRegistry>,
    policy: Arc<ToolPolicy>,
}

impl ToolGate {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<ToolPolicy>) -> Self {
        let missing = policy.unregistered_tools(&registry);
        if !missing.is_empty() {
            tracing::warn!(
                tools = ?missing,
                "Tool policy references tools that are not registered"
            );
        }
        Self { registry, policy }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Tools visible to a profile
    pub fn available(&self, profile: &str) -> Result<Vec<&ToolDefinition>> {
        self.policy.allowed_tools(profile, &self.registry)
    }

    /// Invoke a tool on behalf of `ctx.profile`
    ///
    /// Unknown tools fail with `UnknownTool` before the policy is consulted;
    /// denied tools fail with `PolicyDenied` and never execute.
    pub async fn invoke(
        &self,
        name: &str,
        input: &serde_json::Value,
        ctx: &CallerContext,
    ) -> Result<ToolOutput> {
        self.registry.lookup(name)?;

        if let Err(e) = self.policy.check(&ctx.profile, name) {
            tracing::info!(
                tool = %name,
                profile = %ctx.profile,
                chat_id = ?ctx.chat_id,
                error = %e,
                "Tool call rejected"
            );
            return Err(e);
        }

        self.registry.invoke(name, input, ctx).await
    }
}
