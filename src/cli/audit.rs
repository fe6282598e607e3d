use crate::cli::CliContext;
use crate::core::audit_log::AuditLog;
use anyhow::Result;
use chrono::{DateTime, Local};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Display the audit trail
    Log(AuditLogArgs),
    /// Verify audit chain integrity
    Verify(AuditVerifyArgs),
}

#[derive(Args, Debug)]
pub struct AuditLogArgs {
    /// Maximum number of entries to display
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Only show entries for this username
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct AuditVerifyArgs {}

pub fn run(ctx: &CliContext, cmd: AuditCommand) -> Result<()> {
    let log = AuditLog::new(&ctx.config.audit.path);
    match cmd {
        AuditCommand::Log(args) => run_log(&log, args),
        AuditCommand::Verify(_) => run_verify(&log),
    }
}

fn run_log(log: &AuditLog, args: AuditLogArgs) -> Result<()> {
    let mut entries = log.read(None)?;
    if let Some(user) = &args.user {
        entries.retain(|e| &e.username == user);
    }
    if entries.len() > args.limit {
        entries = entries.split_off(entries.len() - args.limit);
    }

    if entries.is_empty() {
        println!("No audit entries found in {}.", log.path().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Timestamp").add_attribute(Attribute::Bold),
        Cell::new("Operation").add_attribute(Attribute::Bold),
        Cell::new("User").add_attribute(Attribute::Bold),
        Cell::new("Actor").add_attribute(Attribute::Bold),
        Cell::new("Result").add_attribute(Attribute::Bold),
    ]);

    for entry in &entries {
        let local: DateTime<Local> = entry.timestamp.into();
        let mut result = format!("{} ({})", entry.result, entry.code);
        if let Some(c) = &entry.compensation {
            result.push_str(&format!(", {}", c));
        }
        table.add_row(vec![
            local.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.operation.clone(),
            entry.username.clone(),
            entry.actor.clone(),
            result,
        ]);
    }

    println!("{}", table);
    println!("\n{} entries shown.", entries.len());
    Ok(())
}

fn run_verify(log: &AuditLog) -> Result<()> {
    let (total, errors) = log.verify_chain()?;

    if total == 0 {
        println!("No audit entries to verify.");
        return Ok(());
    }

    for err in &errors {
        println!("  [FAIL] {}", err);
    }

    println!();
    if errors.is_empty() {
        println!("Audit chain: {} entries verified, 0 errors", total);
    } else {
        println!("Audit chain: {} entries, {} errors", total, errors.len());
        std::process::exit(1);
    }
    Ok(())
}
