//! Permission Gate: decides whether a tool invocation may run
//!
//! Evaluation order is fixed and stops at the first failing step:
//!
//! 1. tool allow-list (empty list denies everything)
//! 2. denied command patterns (win over allowed patterns)
//! 3. allowed command patterns (skipped when none are configured)
//! 4. filesystem scope (every path must resolve inside it)
//!
//! The gate never errors. An empty command or an empty path list means
//! "nothing to restrict" for that step.

use super::pattern::first_match;
use super::scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Outcome of one permission evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "allowed".to_string(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Per-agent tool policy. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    allowed_tools: BTreeSet<String>,
    allowed_commands: Vec<String>,
    denied_commands: Vec<String>,
    filesystem_scope: Option<PathBuf>,
}

impl PermissionPolicy {
    /// Create a policy. Pattern order is preserved.
    pub fn new<T, A, D>(
        allowed_tools: T,
        allowed_commands: A,
        denied_commands: D,
        filesystem_scope: Option<PathBuf>,
    ) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            allowed_tools: allowed_tools.into_iter().map(Into::into).collect(),
            allowed_commands: allowed_commands.into_iter().map(Into::into).collect(),
            denied_commands: denied_commands.into_iter().map(Into::into).collect(),
            filesystem_scope: filesystem_scope.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    pub fn allowed_tools(&self) -> &BTreeSet<String> {
        &self.allowed_tools
    }

    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed_commands
    }

    pub fn denied_commands(&self) -> &[String] {
        &self.denied_commands
    }

    pub fn filesystem_scope(&self) -> Option<&Path> {
        self.filesystem_scope.as_deref()
    }
}

/// Stateless evaluator over one agent's policy
#[derive(Debug, Clone)]
pub struct PermissionGate {
    policy: PermissionPolicy,
}

impl PermissionGate {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Evaluate one tool request.
    pub fn evaluate(&self, tool_name: &str, command: &str, paths: &[String]) -> Decision {
        if !self.policy.allowed_tools.contains(tool_name) {
            return Decision::deny(format!("tool not allowed: {}", tool_name));
        }

        if !command.is_empty() {
            if let Some(pattern) = first_match(&self.policy.denied_commands, command) {
                return Decision::deny(format!(
                    "command matches denied pattern '{}': {}",
                    pattern, command
                ));
            }

            if !self.policy.allowed_commands.is_empty()
                && first_match(&self.policy.allowed_commands, command).is_none()
            {
                return Decision::deny(format!("command not in allowed list: {}", command));
            }
        }

        if let Some(scope_root) = self.policy.filesystem_scope.as_deref() {
            if let Some(violation) = first_out_of_scope(scope_root, paths) {
                return Decision::deny(format!(
                    "path outside filesystem scope {}: {}",
                    scope_root.display(),
                    violation
                ));
            }
        }

        Decision::allow()
    }
}

/// First path that resolves outside `scope_root`, if any.
fn first_out_of_scope<'a>(scope_root: &Path, paths: &'a [String]) -> Option<&'a str> {
    if paths.is_empty() {
        return None;
    }
    let root = scope::resolve(scope_root, Path::new("/"));
    paths
        .iter()
        .find(|p| {
            let resolved = scope::resolve(Path::new(p.as_str()), &root);
            !scope::is_within(&resolved, &root)
        })
        .map(String::as_str)
}
