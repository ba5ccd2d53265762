//! Relay configuration
//!
//! Loaded once at startup from a JSON file. Every section has defaults, so an
//! empty object is a valid configuration that reproduces the builtin tool
//! groups and profiles.

use crate::error::{RelayError, Result};
use crate::tools::policy::{FULL_PROFILE, TOOL_GROUPS, TOOL_PROFILES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub bus: BusConfig,
    pub tools: ToolsConfig,
    pub policy: PolicyConfig,
}

impl RelayConfig {
    /// Parse and validate a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(json)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        if self.bus.outbound_capacity == 0 {
            return Err(RelayError::Config(
                "bus.outboundCapacity must be greater than zero".to_string(),
            ));
        }
        if self.tools.shell_timeout_secs == 0 {
            return Err(RelayError::Config(
                "tools.shellTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        self.policy.validate()
    }
}

/// What an adapter does with a message whose chat has no live connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownChatPolicy {
    /// Deliver to every registered connection (system-wide notices)
    #[default]
    Broadcast,
    /// Log and discard
    Drop,
}

/// Channel bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    pub unknown_chat: UnknownChatPolicy,

    /// Buffer size of the outbound queue returned by `spawn_outbound`
    pub outbound_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            unknown_chat: UnknownChatPolicy::Broadcast,
            outbound_capacity: 256,
        }
    }
}

/// Builtin tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Sandbox root for filesystem tools and working directory for shell
    pub workspace: PathBuf,

    pub shell_timeout_secs: u64,

    /// Output beyond this many bytes is truncated
    pub max_output_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            shell_timeout_secs: 60,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// A named bundle of permitted tools and groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSpec {
    /// Individually allowed tool names
    pub tools: Vec<String>,

    /// Allowed groups, expanded through `PolicyConfig::groups`
    pub groups: Vec<String>,

    /// Tools removed from the allowed set even if a group grants them
    pub deny: Vec<String>,

    /// Allow every registered tool not explicitly denied
    pub allow_all: bool,
}

impl ProfileSpec {
    pub fn from_groups(groups: &[&str]) -> Self {
        Self {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Tool groups and profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    /// Group name → tool names
    pub groups: BTreeMap<String, Vec<String>>,

    /// Profile name → profile definition
    pub profiles: BTreeMap<String, ProfileSpec>,

    /// Profile assigned to callers that do not name one
    pub default_profile: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let groups = TOOL_GROUPS
            .iter()
            .map(|(name, tools)| {
                (
                    name.to_string(),
                    tools.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();

        let mut profiles: BTreeMap<String, ProfileSpec> = TOOL_PROFILES
            .iter()
            .map(|(name, groups)| (name.to_string(), ProfileSpec::from_groups(groups)))
            .collect();
        profiles.insert(
            FULL_PROFILE.to_string(),
            ProfileSpec {
                allow_all: true,
                ..Default::default()
            },
        );

        Self {
            groups,
            profiles,
            default_profile: "readonly".to_string(),
        }
    }
}

impl PolicyConfig {
    /// Fail on group references that do not resolve and on a missing default profile
    pub fn validate(&self) -> Result<()> {
        for (profile, spec) in &self.profiles {
            if let Some(group) = spec.groups.iter().find(|g| !self.groups.contains_key(*g)) {
                return Err(RelayError::Config(format!(
                    "Profile '{}' references unknown group '{}'",
                    profile, group
                )));
            }
        }
        if !self.profiles.contains_key(&self.default_profile) {
            return Err(RelayError::Config(format!(
                "Default profile '{}' is not defined",
                self.default_profile
            )));
        }
        Ok(())
    }
}
