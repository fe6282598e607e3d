//! Append-only, hash-chained audit trail of account operations.
//!
//! Each line is one JSON [`AuditEntry`]. Entries carry metadata only: the
//! operation, the target username, the caller and the result code. Password
//! material never reaches this file.

use crate::constants;
use crate::core::dispatch::DispatchReport;
use crate::core::error::SUCCESS_CODE;
use crate::core::file_lock::FileLock;
use crate::util::fs::{ensure_dir, set_permissions};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub username: String,
    pub actor: String,
    /// `ok` or the error name.
    pub result: String,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    pub fn from_report(report: &DispatchReport, actor: &str) -> Self {
        let (result, code) = match report.result() {
            Ok(()) => ("ok".to_string(), SUCCESS_CODE),
            Err(kind) => (kind.name().to_string(), kind.code()),
        };
        let compensation = report.compensation.as_ref().map(ToString::to_string);
        Self {
            timestamp: Utc::now(),
            operation: report.operation.to_string(),
            username: report.username.clone(),
            actor: actor.to_string(),
            result,
            code,
            compensation,
            prev_hash: None,
            entry_hash: None,
        }
    }
}

/// Who asked for the change, as far as the environment tells us.
pub fn detect_actor() -> String {
    if let Ok(user) = std::env::var("SUDO_USER") {
        if !user.is_empty() {
            return format!("{}(sudo)", user);
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Append the outcome of one dispatched request.
    pub fn record(&self, report: &DispatchReport, actor: &str) -> Result<AuditEntry> {
        self.append(AuditEntry::from_report(report, actor))
    }

    /// Chain `entry` to the current tail and append it.
    pub fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                ensure_dir(parent, constants::AUDIT_DIR_MODE)?;
            }
        }
        let _lock = FileLock::exclusive(&self.lock_path())?;

        entry.prev_hash = self.last_hash()?;
        entry.entry_hash = None;
        entry.entry_hash = Some(compute_entry_hash(&entry)?);

        let line = serde_json::to_string(&entry).context("serialize audit entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        writeln!(file, "{}", line).context("write audit entry")?;
        file.sync_data().context("sync audit log")?;
        set_permissions(&self.path, constants::AUDIT_LOG_MODE)?;
        Ok(entry)
    }

    fn last_hash(&self) -> Result<Option<String>> {
        Ok(self.read(Some(1))?.pop().and_then(|e| e.entry_hash))
    }

    /// Read entries, keeping only the newest `limit` when given.
    pub fn read(&self, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        let mut entries = Vec::new();
        let mut malformed = 0usize;

        for line in BufReader::new(file).lines() {
            let line = line.context("read audit log line")?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(_) => malformed += 1,
            }
        }
        if malformed > 0 {
            warn!(path = %self.path.display(), malformed, "skipped malformed audit entries");
        }

        if let Some(limit) = limit {
            if entries.len() > limit {
                entries = entries.split_off(entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Check every entry hash and every back link. Returns (total, errors).
    pub fn verify_chain(&self) -> Result<(usize, Vec<String>)> {
        let entries = self.read(None)?;
        let mut errors = Vec::new();
        let mut prev: Option<String> = None;

        for (i, entry) in entries.iter().enumerate() {
            if entry.prev_hash != prev {
                errors.push(format!(
                    "entry {}: prev_hash mismatch (expected {:?}, got {:?})",
                    i + 1,
                    prev,
                    entry.prev_hash
                ));
            }
            match &entry.entry_hash {
                Some(stored) => {
                    if &compute_entry_hash(entry)? != stored {
                        errors.push(format!("entry {}: entry_hash mismatch (tampered?)", i + 1));
                    }
                }
                None => errors.push(format!("entry {}: missing entry_hash", i + 1)),
            }
            prev = entry.entry_hash.clone();
        }
        Ok((entries.len(), errors))
    }
}

/// SHA-256 over the canonical JSON of the entry without its own hash.
fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut value = serde_json::to_value(entry).context("serialize for hash")?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("entry_hash");
    }
    let canonical = serde_json::to_string(&canonicalize_value(&value))
        .context("serialize canonical json")?;
    Ok(format!("{:064x}", Sha256::digest(canonical.as_bytes())))
}

fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize_value(&map[k]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(canonicalize_value).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(op: &str, user: &str, result: &str, code: i32) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            operation: op.into(),
            username: user.into(),
            actor: "tester".into(),
            result: result.into(),
            code,
            compensation: None,
            prev_hash: None,
            entry_hash: None,
        }
    }

    fn test_log() -> (TempDir, AuditLog) {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("audit").join("audit.log"));
        (dir, log)
    }

    #[test]
    fn test_append_creates_directory_and_chains() {
        let (_dir, log) = test_log();
        let first = log.append(entry("add_user", "bob", "ok", 0)).unwrap();
        let second = log.append(entry("delete_user", "bob", "ok", 0)).unwrap();
        assert!(first.prev_hash.is_none());
        assert_eq!(second.prev_hash, first.entry_hash);

        let entries = log.read(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].operation, "delete_user");
    }

    #[test]
    fn test_log_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, log) = test_log();
        log.append(entry("add_user", "bob", "ok", 0)).unwrap();
        let mode = fs::metadata(log.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, constants::AUDIT_LOG_MODE);
    }

    #[test]
    fn test_read_with_limit_keeps_newest() {
        let (_dir, log) = test_log();
        for user in ["a", "b", "c", "d"] {
            log.append(entry("delete_user", user, "ok", 0)).unwrap();
        }
        let entries = log.read(Some(2)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].username, "c");
        assert_eq!(entries[1].username, "d");
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let (_dir, log) = test_log();
        assert!(log.read(None).unwrap().is_empty());
        assert_eq!(log.verify_chain().unwrap(), (0, Vec::new()));
    }

    #[test]
    fn test_verify_chain_ok() {
        let (_dir, log) = test_log();
        log.append(entry("add_user", "bob", "ok", 0)).unwrap();
        log.append(entry("change_password", "bob", "password_mismatch", 3)).unwrap();
        log.append(entry("delete_user", "bob", "ok", 0)).unwrap();
        let (total, errors) = log.verify_chain().unwrap();
        assert_eq!(total, 3);
        assert!(errors.is_empty(), "errors: {:?}", errors);
    }

    #[test]
    fn test_verify_chain_detects_tamper() {
        let (_dir, log) = test_log();
        log.append(entry("add_user", "bob", "ok", 0)).unwrap();
        log.append(entry("change_password", "bob", "password_mismatch", 3)).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        fs::write(log.path(), content.replace("password_mismatch", "ok")).unwrap();

        let (total, errors) = log.verify_chain().unwrap();
        assert_eq!(total, 2);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("entry 2"));
    }

    #[test]
    fn test_verify_chain_detects_removed_entry() {
        let (_dir, log) = test_log();
        for user in ["a", "b", "c"] {
            log.append(entry("delete_user", user, "ok", 0)).unwrap();
        }
        let content = fs::read_to_string(log.path()).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(log.path(), kept.join("\n") + "\n").unwrap();

        let (_, errors) = log.verify_chain().unwrap();
        assert!(errors.iter().any(|e| e.contains("prev_hash mismatch")));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let (_dir, log) = test_log();
        log.append(entry("add_user", "bob", "ok", 0)).unwrap();
        let mut content = fs::read_to_string(log.path()).unwrap();
        content.push_str("not json\n");
        fs::write(log.path(), content).unwrap();
        assert_eq!(log.read(None).unwrap().len(), 1);
    }

    #[test]
    fn test_canonical_json_deterministic() {
        let c1 = canonicalize_value(&serde_json::json!({"b": 1, "a": {"d": 1, "c": 2}}));
        let c2 = canonicalize_value(&serde_json::json!({"a": {"c": 2, "d": 1}, "b": 1}));
        let s1 = serde_json::to_string(&c1).unwrap();
        assert_eq!(s1, serde_json::to_string(&c2).unwrap());
        assert_eq!(s1, r#"{"a":{"c":2,"d":1},"b":1}"#);
    }
}
