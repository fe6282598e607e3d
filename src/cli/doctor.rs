//! Read-only diagnostics of configuration paths and account tooling.

use crate::cli::CliContext;
use crate::constants;
use crate::core::config;
use crate::core::scheme::SchemeResolver;
use crate::core::store::ShadowStore;
use crate::util::fs::mode_of;
use anyhow::Result;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Print the effective configuration as TOML
    #[arg(long)]
    pub show_config: bool,
}

#[derive(Default)]
struct Tally {
    ok: u32,
    warn: u32,
    fail: u32,
}

impl Tally {
    fn pass(&mut self, msg: String) {
        println!("  [PASS] {}", msg);
        self.ok += 1;
    }

    fn warn(&mut self, msg: String) {
        println!("  [WARN] {}", msg);
        self.warn += 1;
    }

    fn fail(&mut self, msg: String) {
        println!("  [FAIL] {}", msg);
        self.fail += 1;
    }
}

pub fn run(ctx: &CliContext, args: DoctorArgs) -> Result<()> {
    let cfg = &ctx.config;
    let mut t = Tally::default();

    println!("Doctor: {}", ctx.config_path.display());
    if let Some(w) = &ctx.config_load_warning {
        t.warn(format!("config unusable, showing defaults: {}", w));
    } else if !ctx.config_path.exists() {
        println!("  [INFO] no config file, using defaults");
    }

    let shadow = &cfg.store.shadow_path;
    match mode_of(shadow) {
        Ok(mode) if mode & !constants::SHADOW_FILE_MODE != 0 => t.warn(format!(
            "{} mode {:04o} is broader than {:04o}",
            shadow.display(),
            mode,
            constants::SHADOW_FILE_MODE
        )),
        Ok(mode) => t.pass(format!("{} present, mode {:04o}", shadow.display(), mode)),
        Err(e) => t.fail(format!("{:#}", e)),
    }

    // reading needs root; only report it
    let store = ShadowStore::from_config(&cfg.store);
    match store.snapshot() {
        Ok(table) => t.pass(format!("store readable, {} records", table.len())),
        Err(e) if e.is_busy() => t.warn(format!("store lock busy: {}", e)),
        Err(e) => t.warn(format!("store not readable as this user: {}", e)),
    }

    match cfg.store.lock_path.parent() {
        Some(dir) if dir.is_dir() => t.pass(format!("lock directory {} exists", dir.display())),
        _ => t.fail(format!("lock path {} has no parent directory", cfg.store.lock_path.display())),
    }

    let defs = &cfg.policy.login_defs_path;
    let scheme = SchemeResolver::new(defs).resolve();
    if defs.is_file() {
        t.pass(format!("{} resolves to {}", defs.display(), scheme));
    } else {
        t.warn(format!("{} missing, new hashes use {}", defs.display(), scheme));
    }

    for tool in [&cfg.provision.useradd, &cfg.provision.userdel] {
        if is_executable_file(tool) {
            t.pass(format!("{} executable", tool.display()));
        } else {
            t.fail(format!("{} missing or not executable", tool.display()));
        }
    }

    if cfg.audit.enabled {
        match cfg.audit.path.parent() {
            Some(dir) if dir.is_dir() => t.pass(format!("audit directory {} exists", dir.display())),
            Some(dir) => t.warn(format!("audit directory {} will be created on first write", dir.display())),
            None => t.fail(format!("audit path {} has no parent", cfg.audit.path.display())),
        }
    } else {
        t.warn("audit trail disabled".to_string());
    }

    if args.show_config {
        println!();
        print!("{}", config::render(cfg)?);
    }

    println!();
    println!("Doctor summary: {} pass, {} warn, {} fail", t.ok, t.warn, t.fail);
    if t.fail > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn is_executable_file(path: &Path) -> bool {
    path.is_file() && mode_of(path).map(|m| m & 0o111 != 0).unwrap_or(false)
}
