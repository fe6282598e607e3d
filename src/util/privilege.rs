//! Root enforcement for commands that touch the account database.

use anyhow::{bail, Result};

/// Effective uid is 0.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Require root for a given command, or bail with an error.
pub fn require_root(command: &str) -> Result<()> {
    if !is_root() {
        bail!(
            "'{}' modifies system accounts and requires root (euid {})",
            command,
            nix::unistd::geteuid()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_root_matches_euid() {
        let result = require_root("process");
        assert_eq!(result.is_ok(), is_root());
        if let Err(e) = result {
            assert!(e.to_string().contains("'process'"));
        }
    }
}
