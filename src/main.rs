//! TeamClaw - agent sidecar for AI coding teams
//!
//! Runs one AI-CLI agent behind the team message bus. The bus is spoken as
//! NDJSON frames on stdin/stdout, so logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use teamclaw::{
    bridge::{AgentRole, MessageBridge},
    bus::{MessageBus, StdioBus},
    permission::PermissionGate,
    process::ProcessManager,
    protocol::{CheckStatus, Payload, ProtocolMessage, TeamSubjects},
    validation, SidecarConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "teamclaw")]
#[command(version)]
#[command(about = "Permission-gated sidecar for AI coding team agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TEAMCLAW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sidecar with the bus on stdin/stdout
    Run,

    /// Evaluate one tool request against the configured policy
    Check {
        /// Tool name, e.g. Bash or Write
        tool: String,

        /// Shell command of the request
        #[arg(long, default_value = "")]
        command: String,

        /// File paths touched by the request
        #[arg(long = "path")]
        paths: Vec<String>,
    },

    /// Run startup checks and print them
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let config = SidecarConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run_sidecar(config).await?,
        Commands::Check {
            tool,
            command,
            paths,
        } => run_check(&config, &tool, &command, &paths),
        Commands::Doctor => run_doctor(&config),
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("teamclaw={}", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run_sidecar(config: SidecarConfig) -> Result<()> {
    config.validate()?;

    let subjects = TeamSubjects::new(&config.agent.team)?;
    let agent = config.agent.name.clone();
    tracing::info!(team = %subjects.team(), agent = %agent, "Starting TeamClaw sidecar");

    let bus = Arc::new(StdioBus::stdout());
    let cancel = CancellationToken::new();

    let mut pump = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.pump(tokio::io::stdin(), &cancel).await })
    };

    let report = validation::run_checks(&config);
    for check in report.checks.iter().filter(|c| c.status != CheckStatus::Ok) {
        tracing::warn!(check = %check.name, status = ?check.status, "{}", check.message);
    }
    let status_subject = subjects.status();
    let failed = validation::has_errors(&report);
    let message = ProtocolMessage::new(
        &agent,
        &status_subject,
        Payload::ContainerValidation(report),
    );
    bus.publish(&status_subject, &message)
        .await
        .context("Failed to publish container validation")?;
    if failed {
        cancel.cancel();
        anyhow::bail!("Startup checks failed; run `teamclaw doctor` for details");
    }

    let process = Arc::new(ProcessManager::new(config.process_config()));
    let bridge = MessageBridge::new(
        &agent,
        AgentRole::parse(&config.agent.role),
        subjects,
        PermissionGate::new(config.permissions.to_policy()),
        process.clone(),
        bus.clone(),
    )?;

    process.start(&cancel).await?;
    bridge.start().await?;

    tracing::info!("TeamClaw sidecar is running. Press Ctrl+C to stop.");

    let pumped = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            None
        }
        res = &mut pump => Some(res),
    };

    tracing::info!("Shutting down...");
    bridge.stop().await;
    process.stop().await?;
    cancel.cancel();
    let pumped = match pumped {
        Some(res) => res,
        None => pump.await,
    };
    match pumped {
        Ok(Err(e)) => tracing::warn!("Bus input closed with error: {}", e),
        Err(e) => tracing::warn!("Bus input task failed: {}", e),
        Ok(Ok(())) => tracing::debug!("Bus input closed"),
    }

    Ok(())
}

fn run_check(config: &SidecarConfig, tool: &str, command: &str, paths: &[String]) {
    let gate = PermissionGate::new(config.permissions.to_policy());
    let decision = gate.evaluate(tool, command, paths);
    if decision.allowed {
        println!("✓ allowed: {}", tool);
    } else {
        println!("✗ denied: {}", decision.reason);
    }
}

fn run_doctor(config: &SidecarConfig) {
    println!("🔍 TeamClaw Doctor");
    println!();

    match SidecarConfig::default_path() {
        Some(path) if path.exists() => {
            println!("  ✓ Configuration file found: {}", path.display())
        }
        _ => println!("  ℹ No configuration file found (using defaults)"),
    }
    println!();

    let report = validation::run_checks(config);
    for check in &report.checks {
        let mark = match check.status {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "!",
            CheckStatus::Error => "✗",
        };
        println!("  {} {}: {}", mark, check.name, check.message);
    }

    println!();
    println!("{}", report.summary);
}

fn show_config(config: Option<&SidecarConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
