//! Request dispatch: validation, authorization and mutation sequencing.
//!
//! A request moves through `Received -> Validated -> Authorized -> Mutated ->
//! Completed`, or drops into `Errored(kind)` from any of those states. The
//! full path is recorded in a [`DispatchReport`] so callers and the audit log
//! can see exactly where a request stopped, including the outcome of the
//! compensating removal when an `AddUser` commit fails.

use crate::core::crypt::{self, CredentialEngine};
use crate::core::error::ErrorKind;
use crate::core::provision::{OsProvisioner, PrincipalProvisioner};
use crate::core::salt::{ClockSeededRandom, RandomSource, SaltGenerator};
use crate::core::scheme::SchemeResolver;
use crate::core::store::ShadowStore;
use crate::models::config::DaemonConfig;
use crate::models::entry::CredentialEntry;
use crate::models::request::{self, ChangeRequest, Operation};
use std::fmt;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Validated,
    Authorized,
    Mutated,
    Completed,
    Errored(ErrorKind),
}

/// Outcome of the undo step after a failed `AddUser` commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    RolledBack,
    RollbackFailed(String),
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RolledBack => f.write_str("rolled_back"),
            Compensation::RollbackFailed(e) => write!(f, "rollback_failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct DispatchReport {
    pub operation: Operation,
    pub username: String,
    pub trail: Vec<DispatchState>,
    /// Description of the primary failure, if any. Never contains secrets.
    pub detail: Option<String>,
    pub compensation: Option<Compensation>,
}

impl DispatchReport {
    fn new(request: &ChangeRequest) -> Self {
        Self {
            operation: request.operation,
            username: request.username.clone(),
            trail: vec![DispatchState::Received],
            detail: None,
            compensation: None,
        }
    }

    fn enter(&mut self, state: DispatchState) {
        debug!(user = %self.username, op = %self.operation, ?state, "dispatch transition");
        self.trail.push(state);
    }

    fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) -> ErrorKind {
        self.detail = Some(detail.into());
        kind
    }

    pub fn state(&self) -> DispatchState {
        self.trail.last().copied().unwrap_or(DispatchState::Received)
    }

    pub fn result(&self) -> Result<(), ErrorKind> {
        match self.state() {
            DispatchState::Errored(kind) => Err(kind),
            DispatchState::Completed => Ok(()),
            _ => Err(ErrorKind::Fatal),
        }
    }

    /// Whether any step that changes the host ran.
    pub fn mutated(&self) -> bool {
        self.trail.contains(&DispatchState::Mutated)
    }
}

pub struct RequestDispatcher<P, R = ClockSeededRandom> {
    store: ShadowStore,
    engine: CredentialEngine<R>,
    provisioner: P,
}

impl RequestDispatcher<OsProvisioner, ClockSeededRandom> {
    /// Wire up the production collaborators from the daemon configuration.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let store = ShadowStore::from_config(&config.store);
        let engine = CredentialEngine::new(
            SchemeResolver::new(&config.policy.login_defs_path),
            SaltGenerator::new(ClockSeededRandom::new()),
        );
        let provisioner = OsProvisioner::new(config.provision.clone(), store.clone());
        Self::new(store, engine, provisioner)
    }
}

impl<P: PrincipalProvisioner, R: RandomSource> RequestDispatcher<P, R> {
    pub fn new(store: ShadowStore, engine: CredentialEngine<R>, provisioner: P) -> Self {
        Self {
            store,
            engine,
            provisioner,
        }
    }

    pub fn store(&self) -> &ShadowStore {
        &self.store
    }

    pub fn engine(&self) -> &CredentialEngine<R> {
        &self.engine
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Handle one request and report only the result code.
    pub fn process(&self, request: ChangeRequest) -> Result<(), ErrorKind> {
        self.run(request).result()
    }

    /// Handle one request and return the full report. The request, and with
    /// it every plaintext password, is wiped before this returns.
    pub fn run(&self, request: ChangeRequest) -> DispatchReport {
        let mut report = DispatchReport::new(&request);
        let outcome = self.drive(&request, &mut report);
        drop(request);

        match outcome {
            Ok(()) => {
                report.enter(DispatchState::Completed);
                info!(user = %report.username, op = %report.operation, "request completed");
            }
            Err(kind) => {
                report.enter(DispatchState::Errored(kind));
                warn!(
                    user = %report.username,
                    op = %report.operation,
                    error = %kind,
                    detail = report.detail.as_deref().unwrap_or(""),
                    "request failed"
                );
            }
        }
        report
    }

    fn drive(&self, request: &ChangeRequest, report: &mut DispatchReport) -> Result<(), ErrorKind> {
        if let Operation::Unknown(code) = request.operation {
            return Err(report.fail(ErrorKind::InvalidOperation, format!("op code {}", code)));
        }
        request::validate_username(&request.username)
            .map_err(|e| report.fail(ErrorKind::InvalidRequest, e))?;
        report.enter(DispatchState::Validated);

        match request.operation {
            Operation::ChangePassword => self.change_password(request, report),
            Operation::AddUser => self.add_user(request, report),
            Operation::DeleteUser => self.delete_user(request, report),
            Operation::Unknown(_) => Err(ErrorKind::InvalidOperation),
        }
    }

    fn change_password(&self, request: &ChangeRequest, report: &mut DispatchReport) -> Result<(), ErrorKind> {
        let username = request.username.as_str();
        let entry = self
            .lookup(username, report)?
            .ok_or_else(|| report.fail(ErrorKind::UserNotFound, "no shadow record"))?;

        let old = required(&request.old_password, "old_password", report)?;
        if !crypt::authenticate(old, &entry.hash) {
            return Err(report.fail(ErrorKind::PasswordMismatch, "old password rejected"));
        }
        report.enter(DispatchState::Authorized);

        let new = required(&request.new_password, "new_password", report)?;
        let hash = self.new_credential(new, report)?;
        self.store.commit(username, &hash).map_err(|e| {
            let kind = if e.is_busy() {
                ErrorKind::StoreBusy
            } else {
                ErrorKind::UpdateFailed
            };
            report.fail(kind, e.to_string())
        })?;
        report.enter(DispatchState::Mutated);
        Ok(())
    }

    fn add_user(&self, request: &ChangeRequest, report: &mut DispatchReport) -> Result<(), ErrorKind> {
        let username = request.username.as_str();
        if self.lookup(username, report)?.is_some() {
            return Err(report.fail(ErrorKind::UserExists, "shadow record present"));
        }
        let new = required(&request.new_password, "new_password", report)?;
        report.enter(DispatchState::Authorized);

        self.provisioner
            .create(username)
            .map_err(|e| report.fail(ErrorKind::ProvisionFailed, e.to_string()))?;
        report.enter(DispatchState::Mutated);

        let committed = self
            .new_credential(new, report)
            .and_then(|hash| {
                self.store
                    .commit(username, &hash)
                    .map_err(|e| report.fail(ErrorKind::UpdateFailed, e.to_string()))
            });
        if committed.is_err() {
            report.compensation = Some(self.compensate(username));
            return Err(ErrorKind::UpdateFailed);
        }
        Ok(())
    }

    fn delete_user(&self, request: &ChangeRequest, report: &mut DispatchReport) -> Result<(), ErrorKind> {
        let username = request.username.as_str();
        if self.lookup(username, report)?.is_none() {
            return Err(report.fail(ErrorKind::UserNotFound, "no shadow record"));
        }
        report.enter(DispatchState::Authorized);

        self.provisioner
            .remove(username)
            .map_err(|e| report.fail(ErrorKind::DeprovisionFailed, e.to_string()))?;
        report.enter(DispatchState::Mutated);
        Ok(())
    }

    /// Undo a just-created account whose credential could not be stored.
    fn compensate(&self, username: &str) -> Compensation {
        match self.provisioner.remove(username) {
            Ok(()) => {
                info!(user = %username, "rolled back account after failed credential commit");
                Compensation::RolledBack
            }
            Err(e) => {
                error!(user = %username, error = %e, "rollback failed, account left without credential");
                Compensation::RollbackFailed(e.to_string())
            }
        }
    }

    fn lookup(&self, username: &str, report: &mut DispatchReport) -> Result<Option<CredentialEntry>, ErrorKind> {
        self.store.lookup(username).map_err(|e| {
            let kind = if e.is_busy() {
                ErrorKind::StoreBusy
            } else {
                ErrorKind::Fatal
            };
            report.fail(kind, e.to_string())
        })
    }

    fn new_credential(&self, plaintext: &str, report: &mut DispatchReport) -> Result<Zeroizing<String>, ErrorKind> {
        self.engine
            .new_credential(plaintext)
            .map_err(|e| report.fail(ErrorKind::UpdateFailed, e.to_string()))
    }
}

fn required<'a>(
    field: &'a Option<Zeroizing<String>>,
    name: &str,
    report: &mut DispatchReport,
) -> Result<&'a str, ErrorKind> {
    let value = field
        .as_deref()
        .ok_or_else(|| report.fail(ErrorKind::InvalidRequest, format!("{} missing", name)))?;
    request::validate_password(value)
        .map_err(|e| report.fail(ErrorKind::InvalidRequest, format!("{}: {}", name, e)))?;
    Ok(value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProvisionError;
    use crate::core::salt::FixedSeedRandom;
    use crate::core::scheme::HashScheme;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records calls; creation appends a locked record to the shadow file.
    struct Recorder {
        store: ShadowStore,
        calls: Mutex<Vec<String>>,
        fail_create: bool,
        fail_remove: bool,
    }

    impl PrincipalProvisioner for Recorder {
        fn create(&self, username: &str) -> Result<CredentialEntry, ProvisionError> {
            self.calls.lock().unwrap().push(format!("create {}", username));
            if self.fail_create {
                return Err(ProvisionError::NotVisible(username.into()));
            }
            let mut content = fs::read_to_string(self.store.shadow_path()).unwrap();
            content.push_str(&format!("{}:!:19000:0:99999:7:::\n", username));
            fs::write(self.store.shadow_path(), content).unwrap();
            Ok(CredentialEntry::new(username, "!", Some("19000:0:99999:7:::")))
        }

        fn remove(&self, username: &str) -> Result<(), ProvisionError> {
            self.calls.lock().unwrap().push(format!("remove {}", username));
            if self.fail_remove {
                return Err(ProvisionError::NotVisible(username.into()));
            }
            Ok(())
        }
    }

    fn dispatcher(shadow: &str) -> (TempDir, RequestDispatcher<Recorder, FixedSeedRandom>) {
        let dir = TempDir::new().unwrap();
        let shadow_path = dir.path().join("shadow");
        fs::write(&shadow_path, shadow).unwrap();
        let defs = dir.path().join("login.defs");
        fs::write(&defs, "ENCRYPT_METHOD SHA512\n").unwrap();
        let store = ShadowStore::new(&shadow_path, dir.path().join(".pwd.lock"))
            .with_lock_timeout(Some(Duration::from_secs(5)));
        let engine = CredentialEngine::new(
            SchemeResolver::new(&defs),
            SaltGenerator::new(FixedSeedRandom::new(11)),
        );
        let recorder = Recorder {
            store: store.clone(),
            calls: Mutex::new(Vec::new()),
            fail_create: false,
            fail_remove: false,
        };
        (dir, RequestDispatcher::new(store, engine, recorder))
    }

    fn shadow_with(user: &str, password: &str) -> String {
        let hash = crypt::hash_new_credential(HashScheme::Sha512, "fixtures", password).unwrap();
        format!("root:*:18912:0:99999:7:::\n{}:{}:18912:0:99999:7:::\n", user, hash.as_str())
    }

    #[test]
    fn test_unknown_operation_touches_nothing() {
        let (_dir, d) = dispatcher("root:*::::::::\n");
        let req = ChangeRequest {
            operation: Operation::Unknown(9),
            username: "root".into(),
            old_password: None,
            new_password: None,
        };
        let report = d.run(req);
        assert_eq!(report.result(), Err(ErrorKind::InvalidOperation));
        assert_eq!(report.trail, vec![DispatchState::Received, DispatchState::Errored(ErrorKind::InvalidOperation)]);
        assert!(d.provisioner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_username_rejected_before_lookup() {
        let (dir, d) = dispatcher("root:*::::::::\n");
        // a held lock would make any lookup time out
        let d = RequestDispatcher::new(
            d.store.clone().with_lock_timeout(Some(Duration::from_millis(50))),
            d.engine,
            d.provisioner,
        );
        let _held = crate::core::file_lock::StoreLock::exclusive(&dir.path().join(".pwd.lock")).unwrap();
        assert_eq!(
            d.process(ChangeRequest::delete_user("-rf")),
            Err(ErrorKind::InvalidRequest)
        );
    }

    #[test]
    fn test_change_password_walks_every_state() {
        let (_dir, d) = dispatcher(&shadow_with("alice", "correct"));
        let report = d.run(ChangeRequest::change_password("alice", "correct", "newpw"));
        assert_eq!(
            report.trail,
            vec![
                DispatchState::Received,
                DispatchState::Validated,
                DispatchState::Authorized,
                DispatchState::Mutated,
                DispatchState::Completed,
            ]
        );
        let entry = d.store.lookup("alice").unwrap().unwrap();
        assert!(entry.hash.starts_with("$6$"));
        assert!(crypt::authenticate("newpw", &entry.hash));
    }

    #[test]
    fn test_change_password_missing_new_password() {
        let (_dir, d) = dispatcher(&shadow_with("alice", "correct"));
        let mut req = ChangeRequest::change_password("alice", "correct", "x");
        req.new_password = None;
        let report = d.run(req);
        assert_eq!(report.result(), Err(ErrorKind::InvalidRequest));
        assert!(!report.mutated());
    }

    #[test]
    fn test_change_password_store_busy() {
        let (dir, d) = dispatcher(&shadow_with("alice", "correct"));
        let d = RequestDispatcher::new(
            d.store.clone().with_lock_timeout(Some(Duration::from_millis(50))),
            d.engine,
            d.provisioner,
        );
        let _held = crate::core::file_lock::StoreLock::exclusive(&dir.path().join(".pwd.lock")).unwrap();
        assert_eq!(
            d.process(ChangeRequest::change_password("alice", "correct", "n")),
            Err(ErrorKind::StoreBusy)
        );
    }

    #[test]
    fn test_missing_store_is_fatal() {
        let (dir, d) = dispatcher("");
        fs::remove_file(dir.path().join("shadow")).unwrap();
        assert_eq!(d.process(ChangeRequest::delete_user("alice")), Err(ErrorKind::Fatal));
    }

    #[test]
    fn test_add_user_requires_password_before_provisioning() {
        let (_dir, d) = dispatcher("root:*::::::::\n");
        let mut req = ChangeRequest::add_user("bob", "x");
        req.new_password = None;
        assert_eq!(d.process(req), Err(ErrorKind::InvalidRequest));
        assert!(d.provisioner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_add_user_provision_failure() {
        let (_dir, mut d) = dispatcher("root:*::::::::\n");
        d.provisioner.fail_create = true;
        let report = d.run(ChangeRequest::add_user("bob", "pw1"));
        assert_eq!(report.result(), Err(ErrorKind::ProvisionFailed));
        assert!(report.compensation.is_none());
    }

    #[test]
    fn test_add_user_commit_failure_rolls_back() {
        let (_dir, d) = dispatcher("root:*::::::::\n");
        // provisioning "succeeds" but never writes the record, so commit fails
        let store = d.store.clone();
        let d = RequestDispatcher::new(
            store,
            d.engine,
            NoRecord { inner: d.provisioner },
        );
        let report = d.run(ChangeRequest::add_user("bob", "pw1"));
        assert_eq!(report.result(), Err(ErrorKind::UpdateFailed));
        assert_eq!(report.compensation, Some(Compensation::RolledBack));
        assert_eq!(
            *d.provisioner.inner.calls.lock().unwrap(),
            vec!["remove bob".to_string()]
        );
    }

    #[test]
    fn test_add_user_rollback_failure_is_reported() {
        let (_dir, mut d) = dispatcher("root:*::::::::\n");
        d.provisioner.fail_remove = true;
        let store = d.store.clone();
        let d = RequestDispatcher::new(store, d.engine, NoRecord { inner: d.provisioner });
        let report = d.run(ChangeRequest::add_user("bob", "pw1"));
        assert_eq!(report.result(), Err(ErrorKind::UpdateFailed));
        assert!(report.detail.as_deref().unwrap().contains("not found"));
        assert!(matches!(report.compensation, Some(Compensation::RollbackFailed(_))));
    }

    /// Pretends creation worked without touching the store.
    struct NoRecord {
        inner: Recorder,
    }

    impl PrincipalProvisioner for NoRecord {
        fn create(&self, username: &str) -> Result<CredentialEntry, ProvisionError> {
            Ok(CredentialEntry::new(username, "!", None))
        }

        fn remove(&self, username: &str) -> Result<(), ProvisionError> {
            self.inner.remove(username)
        }
    }

    #[test]
    fn test_delete_user() {
        let (_dir, d) = dispatcher(&shadow_with("carol", "pw"));
        assert_eq!(d.process(ChangeRequest::delete_user("carol")), Ok(()));
        assert_eq!(*d.provisioner.calls.lock().unwrap(), vec!["remove carol".to_string()]);
        assert_eq!(d.process(ChangeRequest::delete_user("dave")), Err(ErrorKind::UserNotFound));
    }

    #[test]
    fn test_delete_user_failure() {
        let (_dir, mut d) = dispatcher(&shadow_with("carol", "pw"));
        d.provisioner.fail_remove = true;
        assert_eq!(
            d.process(ChangeRequest::delete_user("carol")),
            Err(ErrorKind::DeprovisionFailed)
        );
    }
}
