//! CLI routing and command dispatch.

use crate::core::config;
use crate::models::config::DaemonConfig;
use crate::util::privilege;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

pub mod audit;
pub mod doctor;
pub mod process;
pub mod scheme;

/// Shared context passed to all command handlers.
pub struct CliContext {
    pub config_path: PathBuf,
    pub config: DaemonConfig,
    pub config_load_warning: Option<String>,
}

#[derive(Parser, Debug)]
#[command(name = "passwd-srvd", version, about = "Privileged account and password change service")]
pub struct Cli {
    /// Config file (default: $PASSWD_SRVD_CONFIG, then /etc/passwd-srvd/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config_path = config::resolve_path(self.config);

        // Read-only commands still work with defaults when the file is unreadable.
        let mut config_load_warning = None;
        let loaded = match config::load(&config_path) {
            Ok(cfg) => cfg,
            Err(e) if !self.command.requires_config() => {
                config_load_warning = Some(format!("{:#}", e));
                DaemonConfig::default()
            }
            Err(e) => return Err(e),
        };

        init_tracing(&loaded.log_level);

        if self.command.requires_root() {
            privilege::require_root(self.command.name())?;
        }

        let ctx = CliContext {
            config_path,
            config: loaded,
            config_load_warning,
        };

        match self.command {
            Commands::Process(args) => process::run(&ctx, args),
            Commands::Scheme(args) => scheme::run(&ctx, args),
            Commands::Audit { command } => audit::run(&ctx, command),
            Commands::Doctor(args) => doctor::run(&ctx, args),
        }
    }
}

/// Log to stderr; stdout carries command output. `RUST_LOG` overrides the
/// configured level.
fn init_tracing(log_level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply one JSON change request read from stdin
    Process(process::ProcessArgs),
    /// Show the hashing scheme new credentials would use
    Scheme(scheme::SchemeArgs),
    /// View or verify the audit trail
    Audit {
        #[command(subcommand)]
        command: audit::AuditCommand,
    },
    /// Diagnose configuration and host tooling (safe, read-only)
    Doctor(doctor::DoctorArgs),
}

impl Commands {
    /// Whether this command requires root privileges.
    pub fn requires_root(&self) -> bool {
        matches!(self, Commands::Process(_))
    }

    /// Whether a broken config file must abort the command.
    pub fn requires_config(&self) -> bool {
        matches!(self, Commands::Process(_))
    }

    /// Command name for error messages.
    pub fn name(&self) -> &str {
        match self {
            Commands::Process(_) => "process",
            Commands::Scheme(_) => "scheme",
            Commands::Audit { .. } => "audit",
            Commands::Doctor(_) => "doctor",
        }
    }
}
