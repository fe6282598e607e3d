//! Creation and removal of OS accounts.

use crate::constants;
use crate::core::error::ProvisionError;
use crate::core::store::ShadowStore;
use crate::models::config::ProvisionSection;
use crate::models::entry::CredentialEntry;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Creates and removes principals on behalf of the dispatcher.
pub trait PrincipalProvisioner: Send + Sync {
    /// Create the account. On success the returned entry is already visible
    /// through [`ShadowStore::lookup`].
    fn create(&self, username: &str) -> Result<CredentialEntry, ProvisionError>;

    /// Remove the account. Removing an absent account succeeds.
    fn remove(&self, username: &str) -> Result<(), ProvisionError>;
}

/// Provisioner backed by `useradd` / `userdel`.
pub struct OsProvisioner {
    settings: ProvisionSection,
    store: ShadowStore,
}

impl OsProvisioner {
    pub fn new(settings: ProvisionSection, store: ShadowStore) -> Self {
        Self { settings, store }
    }

    fn useradd_command(&self, username: &str) -> Command {
        let mut cmd = Command::new(&self.settings.useradd);
        if let Some(group) = &self.settings.primary_group {
            cmd.arg("-g").arg(group);
        }
        if !self.settings.groups.is_empty() {
            cmd.arg("-G").arg(self.settings.groups.join(","));
        }
        if let Some(shell) = &self.settings.shell {
            cmd.arg("-s").arg(shell);
        }
        cmd.arg(username);
        cmd
    }
}

impl PrincipalProvisioner for OsProvisioner {
    fn create(&self, username: &str) -> Result<CredentialEntry, ProvisionError> {
        run(self.useradd_command(username), &self.settings.useradd, &[])?;
        info!(user = %username, "account created");
        self.store
            .lookup(username)?
            .ok_or_else(|| ProvisionError::NotVisible(username.to_string()))
    }

    fn remove(&self, username: &str) -> Result<(), ProvisionError> {
        let mut cmd = Command::new(&self.settings.userdel);
        cmd.arg(username);
        run(cmd, &self.settings.userdel, &[constants::USERDEL_NO_SUCH_USER])?;
        info!(user = %username, "account removed");
        Ok(())
    }
}

/// Run `cmd`, treating exit 0 and any of `ok_codes` as success.
fn run(mut cmd: Command, tool: &Path, ok_codes: &[i32]) -> Result<(), ProvisionError> {
    debug!(tool = %tool.display(), "running account tool");
    let output = cmd.output().map_err(|source| ProvisionError::Spawn {
        tool: tool.to_path_buf(),
        source,
    })?;
    let code = output.status.code();
    if output.status.success() || code.is_some_and(|c| ok_codes.contains(&c)) {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(ProvisionError::Failed {
        tool: tool.to_path_buf(),
        status: code,
        stderr,
    })
}
