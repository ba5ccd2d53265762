//! Tool policy: which tools a caller profile may invoke
//!
//! Groups are named subsets of tools; profiles combine groups and individual
//! tools. Everything is flattened into one allowed set per profile when the
//! policy is built, so a decision is a set lookup with no recursion and no
//! mutable state.

use super::registry::ToolRegistry;
use super::ToolDefinition;
use crate::config::PolicyConfig;
use crate::error::{RelayError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Builtin tool groups (group → tool names)
pub const TOOL_GROUPS: &[(&str, &[&str])] = &[
    ("filesystem", &["read_file", "write_file", "list_dir"]),
    ("filesystem_read", &["read_file", "list_dir"]),
    ("shell", &["shell"]),
];

/// Builtin profiles (profile → groups)
pub const TOOL_PROFILES: &[(&str, &[&str])] = &[
    ("minimal", &[]),
    ("readonly", &["filesystem_read"]),
    ("coding", &["filesystem", "shell"]),
];

/// Profile that allows every registered tool
pub const FULL_PROFILE: &str = "full";

#[derive(Debug, Clone, Default)]
struct ResolvedProfile {
    allow_all: bool,
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
}

impl ResolvedProfile {
    fn permits(&self, tool: &str) -> bool {
        !self.denied.contains(tool) && (self.allow_all || self.allowed.contains(tool))
    }
}

/// Flattened, read-only tool policy
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    groups: BTreeMap<String, BTreeSet<String>>,
    profiles: HashMap<String, ResolvedProfile>,
    default_profile: String,
}

impl ToolPolicy {
    /// Build a policy, failing on any unresolvable group reference
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        config.validate()?;

        let groups: BTreeMap<String, BTreeSet<String>> = config
            .groups
            .iter()
            .map(|(name, tools)| (name.clone(), tools.iter().cloned().collect()))
            .collect();

        let mut profiles = HashMap::with_capacity(config.profiles.len());
        for (name, spec) in &config.profiles {
            let mut allowed: BTreeSet<String> = spec.tools.iter().cloned().collect();
            for group in &spec.groups {
                let members = groups.get(group).ok_or_else(|| {
                    RelayError::Config(format!(
                        "Profile '{}' references unknown group '{}'",
                        name, group
                    ))
                })?;
                allowed.extend(members.iter().cloned());
            }

            profiles.insert(
                name.clone(),
                ResolvedProfile {
                    allow_all: spec.allow_all,
                    allowed,
                    denied: spec.deny.iter().cloned().collect(),
                },
            );
        }

        tracing::debug!(
            groups = groups.len(),
            profiles = profiles.len(),
            default_profile = %config.default_profile,
            "Tool policy loaded"
        );

        Ok(Self {
            groups,
            profiles,
            default_profile: config.default_profile.clone(),
        })
    }

    /// Whether `profile` may invoke `tool`
    pub fn is_allowed(&self, profile: &str, tool: &str) -> Result<bool> {
        Ok(self.profile(profile)?.permits(tool))
    }

    /// Like `is_allowed`, but a denial is a `PolicyDenied` error
    pub fn check(&self, profile: &str, tool: &str) -> Result<()> {
        if self.is_allowed(profile, tool)? {
            Ok(())
        } else {
            Err(RelayError::PolicyDenied {
                profile: profile.to_string(),
                tool: tool.to_string(),
            })
        }
    }

    /// Tool names in a group
    pub fn resolve_group(&self, group: &str) -> Result<&BTreeSet<String>> {
        self.groups.get(group).ok_or_else(|| RelayError::UnknownGroup {
            name: group.to_string(),
        })
    }

    /// Registered tools the profile may invoke, for advertising to the model
    pub fn allowed_tools<'r>(
        &self,
        profile: &str,
        registry: &'r ToolRegistry,
    ) -> Result<Vec<&'r ToolDefinition>> {
        let resolved = self.profile(profile)?;
        Ok(registry
            .definitions()
            .into_iter()
            .filter(|def| resolved.permits(&def.name))
            .collect())
    }

    /// Tool names referenced by groups or profiles but absent from `registry`
    pub fn unregistered_tools(&self, registry: &ToolRegistry) -> BTreeSet<String> {
        self.groups
            .values()
            .flatten()
            .chain(self.profiles.values().flat_map(|p| p.allowed.iter()))
            .filter(|name| !registry.contains(name))
            .cloned()
            .collect()
    }

    /// Profile names, sorted
    pub fn profiles(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    fn profile(&self, name: &str) -> Result<&ResolvedProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| RelayError::UnknownProfile {
                name: name.to_string(),
            })
    }
}
