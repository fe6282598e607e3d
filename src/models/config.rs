//! Daemon configuration file model.

use crate::constants;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub provision: ProvisionSection,
    #[serde(default)]
    pub audit: AuditSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            store: StoreSection::default(),
            policy: PolicySection::default(),
            provision: ProvisionSection::default(),
            audit: AuditSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_shadow_path")]
    pub shadow_path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    /// Zero blocks until the lock is free.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Keep `<shadow_path>-` with the previous contents.
    #[serde(default = "default_true")]
    pub backup: bool,
}

impl StoreSection {
    pub fn lock_timeout(&self) -> Option<Duration> {
        match self.lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            shadow_path: default_shadow_path(),
            lock_path: default_lock_path(),
            lock_timeout_secs: default_lock_timeout_secs(),
            backup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_login_defs_path")]
    pub login_defs_path: PathBuf,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            login_defs_path: default_login_defs_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSection {
    #[serde(default = "default_useradd")]
    pub useradd: PathBuf,
    #[serde(default = "default_userdel")]
    pub userdel: PathBuf,
    #[serde(default)]
    pub primary_group: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

impl Default for ProvisionSection {
    fn default() -> Self {
        Self {
            useradd: default_useradd(),
            userdel: default_userdel(),
            primary_group: None,
            groups: Vec::new(),
            shell: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_audit_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shadow_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_SHADOW_PATH)
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_LOCK_PATH)
}

fn default_lock_timeout_secs() -> u64 {
    constants::DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_login_defs_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_LOGIN_DEFS_PATH)
}

fn default_useradd() -> PathBuf {
    PathBuf::from(constants::DEFAULT_USERADD)
}

fn default_userdel() -> PathBuf {
    PathBuf::from(constants::DEFAULT_USERDEL)
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_AUDIT_LOG_PATH)
}
