//! TeamClaw sidecar configuration
//!
//! Loaded from TOML, then overridden by `TEAMCLAW_*` environment variables.

use crate::error::{Error, Result};
use crate::permission::PermissionPolicy;
use crate::process::{InvocationMode, ProcessConfig};
use crate::protocol::validate_token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main sidecar configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Who this agent is
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool policy enforced by the permission gate
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// AI CLI process settings
    #[serde(default)]
    pub process: ProcessSection,
}

/// Agent identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Team namespace on the bus
    pub team: String,

    /// Agent name, also its direct channel
    pub name: String,

    /// `leader` or any delegate role name
    pub role: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            team: "default".to_string(),
            name: "agent".to_string(),
            role: "worker".to_string(),
        }
    }
}

/// Tool permission policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Tools the agent may call. Empty denies every tool.
    pub allowed_tools: Vec<String>,

    /// `*` glob patterns a shell command must match (empty: any command)
    pub allowed_commands: Vec<String>,

    /// `*` glob patterns that always deny
    pub denied_commands: Vec<String>,

    /// Root every file path must resolve under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_scope: Option<PathBuf>,
}

impl PermissionsConfig {
    pub fn to_policy(&self) -> PermissionPolicy {
        PermissionPolicy::new(
            self.allowed_tools.iter().cloned(),
            self.allowed_commands.iter().cloned(),
            self.denied_commands.iter().cloned(),
            self.filesystem_scope.clone(),
        )
    }
}

/// AI CLI process section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// CLI binary; resolved from PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<PathBuf>,

    /// Working directory of the CLI
    pub work_dir: PathBuf,

    /// Bootstrap prompt; when unset the session starts with the first input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Context window budget used for usage reporting (0 disables)
    pub max_tokens: u64,

    /// Usage ratio at which the context is compacted
    pub compaction_threshold: f64,

    pub auto_compact: bool,

    pub mode: InvocationMode,

    /// Capacity of the event queue between process and bridge
    pub event_buffer: usize,

    /// Extra environment for the CLI
    pub env: BTreeMap<String, String>,
}

impl Default for ProcessSection {
    fn default() -> Self {
        let base = ProcessConfig::default();
        Self {
            cli_path: None,
            work_dir: base.work_dir,
            system_prompt: None,
            model: None,
            max_tokens: base.max_tokens,
            compaction_threshold: base.compaction_threshold,
            auto_compact: base.auto_compact,
            mode: base.mode,
            event_buffer: base.event_buffer,
            env: BTreeMap::new(),
        }
    }
}

impl SidecarConfig {
    /// Default config file location: `<config dir>/teamclaw/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|d| d.join("teamclaw").join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path` (or the default location when it exists), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| Self::default_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(ref p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    Error::Config(format!("Failed to read config {}: {}", p.display(), e))
                })?;
                tracing::debug!(path = %p.display(), "Loaded config file");
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `TEAMCLAW_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let list = |key: &str| {
            get(key).map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
        };

        if let Some(v) = get("TEAMCLAW_TEAM") {
            self.agent.team = v;
        }
        if let Some(v) = get("TEAMCLAW_AGENT") {
            self.agent.name = v;
        }
        if let Some(v) = get("TEAMCLAW_ROLE") {
            self.agent.role = v;
        }
        if let Some(v) = get("TEAMCLAW_WORK_DIR") {
            self.process.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TEAMCLAW_CLI") {
            self.process.cli_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TEAMCLAW_SYSTEM_PROMPT") {
            self.process.system_prompt = Some(v);
        }
        if let Some(v) = list("TEAMCLAW_ALLOWED_TOOLS") {
            self.permissions.allowed_tools = v;
        }
        if let Some(v) = list("TEAMCLAW_ALLOWED_COMMANDS") {
            self.permissions.allowed_commands = v;
        }
        if let Some(v) = list("TEAMCLAW_DENIED_COMMANDS") {
            self.permissions.denied_commands = v;
        }
        if let Some(v) = get("TEAMCLAW_FS_SCOPE") {
            self.permissions.filesystem_scope = Some(PathBuf::from(v));
        }
    }

    /// Reject configurations the sidecar cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_token("team", &self.agent.team).map_err(|e| Error::Config(e.to_string()))?;
        validate_token("agent", &self.agent.name).map_err(|e| Error::Config(e.to_string()))?;

        let t = self.process.compaction_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(Error::Config(format!(
                "compaction_threshold must be in (0, 1], got {}",
                t
            )));
        }
        if self.process.event_buffer == 0 {
            return Err(Error::Config("event_buffer must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Process settings with the permission allow-list passed to the CLI.
    pub fn process_config(&self) -> ProcessConfig {
        let p = &self.process;
        ProcessConfig {
            system_prompt: p.system_prompt.clone(),
            allowed_tools: self.permissions.allowed_tools.clone(),
            work_dir: p.work_dir.clone(),
            max_tokens: p.max_tokens,
            compaction_threshold: p.compaction_threshold,
            auto_compact: p.auto_compact,
            mode: p.mode,
            cli_path: p.cli_path.clone(),
            model: p.model.clone(),
            env: p.env.clone(),
            event_buffer: p.event_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = SidecarConfig::default();
        assert_eq!(config.process.max_tokens, 200_000);
        assert_eq!(config.process.compaction_threshold, 0.8);
        assert!(config.process.auto_compact);
        assert_eq!(config.process.mode, InvocationMode::PerInvocation);
        assert!(config.permissions.allowed_tools.is_empty());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_toml() {
        let config = SidecarConfig::from_toml(
            r#"
            [agent]
            team = "infra"
            name = "deployer"
            role = "leader"

            [permissions]
            allowed_tools = ["Bash"]
            allowed_commands = ["terraform *"]
            denied_commands = ["terraform destroy *"]
            filesystem_scope = "/workspace"

            [process]
            mode = "persistent"
            max_tokens = 100000

            [process.env]
            AWS_REGION = "eu-west-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.team, "infra");
        assert_eq!(config.agent.role, "leader");
        assert_eq!(config.process.mode, InvocationMode::Persistent);
        assert_eq!(config.process.max_tokens, 100_000);
        assert_eq!(config.process.compaction_threshold, 0.8);
        assert_eq!(config.process.env["AWS_REGION"], "eu-west-1");

        let gate = crate::permission::PermissionGate::new(config.permissions.to_policy());
        assert!(!gate.evaluate("Bash", "terraform destroy -auto-approve", &[]).allowed);
        assert!(gate.evaluate("Bash", "terraform plan", &[]).allowed);

        let process = config.process_config();
        assert_eq!(process.allowed_tools, vec!["Bash".to_string()]);
        assert_eq!(process.mode, InvocationMode::Persistent);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(SidecarConfig::from_toml("[process]\nmode = \"forever\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TEAMCLAW_TEAM", "ops"),
            ("TEAMCLAW_AGENT", "coder"),
            ("TEAMCLAW_ALLOWED_TOOLS", "Bash, Read,,Write"),
            ("TEAMCLAW_FS_SCOPE", "/srv/work"),
            ("TEAMCLAW_ROLE", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = SidecarConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.agent.team, "ops");
        assert_eq!(config.agent.name, "coder");
        assert_eq!(config.agent.role, "worker");
        assert_eq!(config.permissions.allowed_tools, vec!["Bash", "Read", "Write"]);
        assert_eq!(
            config.permissions.filesystem_scope,
            Some(PathBuf::from("/srv/work"))
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SidecarConfig::default();
        config.agent.team = "a.b".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = SidecarConfig::default();
        config.agent.name = String::new();
        assert_err!(config.validate());

        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let mut config = SidecarConfig::default();
            config.process.compaction_threshold = bad;
            assert!(config.validate().is_err(), "threshold {} accepted", bad);
        }

        let mut config = SidecarConfig::default();
        config.process.compaction_threshold = 1.0;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let text = toml::to_string_pretty(&SidecarConfig::default()).unwrap();
        assert_eq!(SidecarConfig::from_toml(&text).unwrap(), SidecarConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = SidecarConfig::load(Some(Path::new("/nonexistent/teamclaw.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
