use crate::cli::CliContext;
use crate::core::scheme::{SaltLength, SchemeResolver};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct SchemeArgs {
    /// Read this file instead of the configured login.defs
    #[arg(long, value_name = "PATH")]
    pub login_defs: Option<PathBuf>,
}

pub fn run(ctx: &CliContext, args: SchemeArgs) -> Result<()> {
    let path = args
        .login_defs
        .unwrap_or_else(|| ctx.config.policy.login_defs_path.clone());
    let resolver = SchemeResolver::new(&path);
    let scheme = resolver.resolve();

    let salt = match scheme.salt_length() {
        SaltLength::Fixed(n) => format!("{} chars", n),
        SaltLength::Variable { min, max } => format!("{}-{} chars", min, max),
    };
    println!("Source:  {}", path.display());
    println!("Scheme:  {}", scheme);
    println!(
        "Prefix:  {}",
        scheme.tag().map(|t| format!("${}$", t)).unwrap_or_else(|| "(none)".to_string())
    );
    println!("Salt:    {}", salt);
    Ok(())
}
