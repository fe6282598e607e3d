use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = passwd_srvd::cli::Cli::parse();
    cli.run()
}
