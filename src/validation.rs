//! Startup self-check
//!
//! Verifies the sidecar's environment and reports the result as a
//! `container_validation` payload. Warnings describe a legal but permissive
//! or degraded setup; errors mean the agent cannot do useful work.

use crate::config::SidecarConfig;
use crate::process::resolve_cli_binary;
use crate::protocol::{validate_token, CheckStatus, ContainerValidationPayload, ValidationCheck};

fn check(name: &str, status: CheckStatus, message: impl Into<String>) -> ValidationCheck {
    ValidationCheck {
        name: name.to_string(),
        status,
        message: message.into(),
    }
}

/// Run every check against `config`.
pub fn run_checks(config: &SidecarConfig) -> ContainerValidationPayload {
    let mut checks = Vec::new();

    for (name, kind, value) in [
        ("team_name", "team", &config.agent.team),
        ("agent_name", "agent", &config.agent.name),
    ] {
        checks.push(match validate_token(kind, value) {
            Ok(()) => check(name, CheckStatus::Ok, format!("{} name '{}'", kind, value)),
            Err(e) => check(name, CheckStatus::Error, e.to_string()),
        });
    }

    checks.push(match resolve_cli_binary(config.process.cli_path.as_deref()) {
        Ok(path) if path.exists() => {
            check("cli_binary", CheckStatus::Ok, path.display().to_string())
        }
        Ok(path) => check(
            "cli_binary",
            CheckStatus::Error,
            format!("CLI binary does not exist: {}", path.display()),
        ),
        Err(e) => check("cli_binary", CheckStatus::Error, e.to_string()),
    });

    let work_dir = &config.process.work_dir;
    checks.push(if work_dir.is_dir() {
        check("work_dir", CheckStatus::Ok, work_dir.display().to_string())
    } else {
        check(
            "work_dir",
            CheckStatus::Error,
            format!("work dir does not exist: {}", work_dir.display()),
        )
    });

    checks.push(match config.permissions.filesystem_scope {
        None => check(
            "filesystem_scope",
            CheckStatus::Warning,
            "no filesystem scope configured; file paths are unrestricted",
        ),
        Some(ref scope) if scope.is_dir() => {
            check("filesystem_scope", CheckStatus::Ok, scope.display().to_string())
        }
        Some(ref scope) => check(
            "filesystem_scope",
            CheckStatus::Error,
            format!("filesystem scope does not exist: {}", scope.display()),
        ),
    });

    let tools = &config.permissions.allowed_tools;
    checks.push(if tools.is_empty() {
        check(
            "allowed_tools",
            CheckStatus::Warning,
            "no tools allowed; every tool call will be denied",
        )
    } else {
        check("allowed_tools", CheckStatus::Ok, tools.join(", "))
    });

    if config.process.max_tokens == 0 {
        checks.push(check(
            "context_tracking",
            CheckStatus::Warning,
            "max_tokens is 0; usage reporting and compaction are disabled",
        ));
    }

    let count = |status| checks.iter().filter(|c| c.status == status).count();
    let summary = format!(
        "{} ok, {} warning(s), {} error(s)",
        count(CheckStatus::Ok),
        count(CheckStatus::Warning),
        count(CheckStatus::Error)
    );

    ContainerValidationPayload {
        agent_name: config.agent.name.clone(),
        checks,
        summary,
    }
}

/// Whether any check failed outright.
pub fn has_errors(report: &ContainerValidationPayload) -> bool {
    report.checks.iter().any(|c| c.status == CheckStatus::Error)
}
