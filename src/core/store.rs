//! Lock-protected access to the shadow password database.
//!
//! Every operation loads the whole file into an ordered [`ShadowTable`] under
//! the store lock. Updates rewrite the file through a temporary sibling that is
//! renamed into place, so readers only ever see the old or the new contents.

use crate::core::error::StoreError;
use crate::core::file_lock::StoreLock;
use crate::models::config::StoreSection;
use crate::models::entry::CredentialEntry;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

enum ShadowLine {
    Record(CredentialEntry),
    /// Comments, blank lines and anything unparseable, kept byte-for-byte.
    Verbatim(String),
}

/// Ordered in-memory copy of the shadow file.
pub struct ShadowTable {
    lines: Vec<ShadowLine>,
}

impl ShadowTable {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|line| match CredentialEntry::parse_line(line) {
                Some(entry) => ShadowLine::Record(entry),
                None => ShadowLine::Verbatim(line.to_string()),
            })
            .collect();
        Self { lines }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CredentialEntry> {
        self.lines.iter().filter_map(|line| match line {
            ShadowLine::Record(entry) => Some(entry),
            ShadowLine::Verbatim(_) => None,
        })
    }

    /// First record named `username`.
    pub fn find(&self, username: &str) -> Option<&CredentialEntry> {
        self.entries().find(|e| e.username == username)
    }

    /// Swap the hash of the first record named `username`. Returns `false`
    /// when there is no such record.
    pub fn replace_hash(&mut self, username: &str, hash: &str) -> bool {
        for line in &mut self.lines {
            if let ShadowLine::Record(entry) = line {
                if entry.username == username {
                    entry.hash = Zeroizing::new(hash.to_string());
                    return true;
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::new());
        for line in &self.lines {
            match line {
                ShadowLine::Record(entry) => out.push_str(&entry.to_line()),
                ShadowLine::Verbatim(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

impl Drop for ShadowTable {
    fn drop(&mut self) {
        for line in &mut self.lines {
            if let ShadowLine::Verbatim(raw) = line {
                raw.zeroize();
            }
        }
    }
}

/// Handle on one shadow file and its lock. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShadowStore {
    shadow_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Option<Duration>,
    backup: bool,
}

impl ShadowStore {
    pub fn new(shadow_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        let defaults = StoreSection::default();
        Self {
            shadow_path: shadow_path.into(),
            lock_path: lock_path.into(),
            lock_timeout: defaults.lock_timeout(),
            backup: false,
        }
    }

    pub fn from_config(section: &StoreSection) -> Self {
        Self {
            shadow_path: section.shadow_path.clone(),
            lock_path: section.lock_path.clone(),
            lock_timeout: section.lock_timeout(),
            backup: section.backup,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn shadow_path(&self) -> &Path {
        &self.shadow_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Look up `username`. The lock is held only while the file is read.
    pub fn lookup(&self, username: &str) -> Result<Option<CredentialEntry>, StoreError> {
        let table = {
            let _lock = self.lock()?;
            self.load_unlocked()?
        };
        Ok(table.find(username).cloned())
    }

    /// Load every record under the lock.
    pub fn snapshot(&self) -> Result<ShadowTable, StoreError> {
        let _lock = self.lock()?;
        self.load_unlocked()
    }

    /// Replace the hash of `username`, holding the lock across the read, the
    /// scan and the rewrite.
    pub fn commit(&self, username: &str, new_hash: &str) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut table = self.load_unlocked()?;
        if !table.replace_hash(username, new_hash) {
            return Err(StoreError::NotFound(username.to_string()));
        }
        self.write_unlocked(&table)?;
        debug!(user = %username, path = %self.shadow_path.display(), "credential committed");
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.lock_path, self.lock_timeout)
    }

    fn load_unlocked(&self) -> Result<ShadowTable, StoreError> {
        let mut file = File::open(&self.shadow_path).map_err(|source| StoreError::Open {
            path: self.shadow_path.clone(),
            source,
        })?;
        let mut content = Zeroizing::new(String::new());
        file.read_to_string(&mut content)
            .map_err(|source| StoreError::Read {
                path: self.shadow_path.clone(),
                source,
            })?;
        Ok(ShadowTable::parse(&content))
    }

    fn write_unlocked(&self, table: &ShadowTable) -> Result<(), StoreError> {
        let write_err = |source: io::Error| StoreError::Write {
            path: self.shadow_path.clone(),
            source,
        };
        let parent = self
            .shadow_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let meta = fs::metadata(&self.shadow_path).map_err(write_err)?;

        if self.backup {
            let backup = backup_path(&self.shadow_path);
            fs::copy(&self.shadow_path, &backup).map_err(write_err)?;
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".shadow-")
            .tempfile_in(parent)
            .map_err(write_err)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(meta.mode() & 0o7777))
            .map_err(write_err)?;
        std::os::unix::fs::fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid()))
            .map_err(write_err)?;

        let content = table.render();
        tmp.write_all(content.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.shadow_path)
            .map_err(|e| write_err(e.error))?;

        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(write_err)?;
        Ok(())
    }
}

/// `/etc/shadow` -> `/etc/shadow-`, the shadow-utils backup convention.
pub fn backup_path(shadow_path: &Path) -> PathBuf {
    let mut name = shadow_path.as_os_str().to_os_string();
    name.push("-");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
root:*:18912:0:99999:7:::
# managed by passwd-srvd
alice:$6$oldsalt$oldhash:18912:0:99999:7:::

bob:!:18912:0:99999:7:::
";

    fn store_with(content: &str) -> (TempDir, ShadowStore) {
        let dir = TempDir::new().unwrap();
        let shadow = dir.path().join("shadow");
        fs::write(&shadow, content).unwrap();
        fs::set_permissions(&shadow, fs::Permissions::from_mode(0o640)).unwrap();
        let store = ShadowStore::new(&shadow, dir.path().join(".pwd.lock"))
            .with_lock_timeout(Some(Duration::from_secs(5)));
        (dir, store)
    }

    #[test]
    fn test_lookup_found_and_missing() {
        let (_dir, store) = store_with(SAMPLE);
        let alice = store.lookup("alice").unwrap().unwrap();
        assert_eq!(alice.hash.as_str(), "$6$oldsalt$oldhash");
        assert!(store.lookup("carol").unwrap().is_none());
        // prefix of an existing name must not match
        assert!(store.lookup("ali").unwrap().is_none());
    }

    #[test]
    fn test_commit_replaces_only_hash_field() {
        let (_dir, store) = store_with(SAMPLE);
        store.commit("alice", "$6$newsalt$newhash").unwrap();
        let content = fs::read_to_string(store.shadow_path()).unwrap();
        assert_eq!(
            content,
            SAMPLE.replace("$6$oldsalt$oldhash", "$6$newsalt$newhash")
        );
    }

    #[test]
    fn test_commit_unknown_user_is_not_found() {
        let (_dir, store) = store_with(SAMPLE);
        let err = store.commit("carol", "x").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref u) if u == "carol"));
        assert_eq!(fs::read_to_string(store.shadow_path()).unwrap(), SAMPLE);
    }

    #[test]
    fn test_commit_preserves_mode() {
        let (_dir, store) = store_with(SAMPLE);
        store.commit("bob", "$1$abc$def").unwrap();
        let mode = fs::metadata(store.shadow_path()).unwrap().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_commit_writes_backup_when_enabled() {
        let (_dir, store) = store_with(SAMPLE);
        let store = store.with_backup(true);
        store.commit("alice", "$6$n$h").unwrap();
        let backup = fs::read_to_string(backup_path(store.shadow_path())).unwrap();
        assert_eq!(backup, SAMPLE);
    }

    #[test]
    fn test_commit_leaves_no_temp_files() {
        let (dir, store) = store_with(SAMPLE);
        store.commit("alice", "$6$n$h").unwrap();
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".pwd.lock", "shadow"]);
    }

    #[test]
    fn test_lookup_after_commit_sees_new_value() {
        let (_dir, store) = store_with(SAMPLE);
        store.commit("alice", "$6$n$h").unwrap();
        assert_eq!(store.lookup("alice").unwrap().unwrap().hash.as_str(), "$6$n$h");
    }

    #[test]
    fn test_missing_store_is_open_error() {
        let dir = TempDir::new().unwrap();
        let store = ShadowStore::new(dir.path().join("shadow"), dir.path().join(".pwd.lock"));
        assert!(matches!(store.lookup("alice"), Err(StoreError::Open { .. })));
        assert!(matches!(store.commit("alice", "x"), Err(StoreError::Open { .. })));
    }

    #[test]
    fn test_busy_store_is_distinct_from_not_found() {
        let (_dir, store) = store_with(SAMPLE);
        let store = store.with_lock_timeout(Some(Duration::from_millis(100)));
        let _held = StoreLock::exclusive(store.lock_path()).unwrap();
        assert!(store.lookup("alice").unwrap_err().is_busy());
        assert!(store.commit("alice", "x").unwrap_err().is_busy());
    }

    #[test]
    fn test_concurrent_commits_serialize() {
        let (_dir, store) = store_with(SAMPLE);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.commit("alice", &format!("$6$s{i}$h{i}")))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let content = fs::read_to_string(store.shadow_path()).unwrap();
        let table = ShadowTable::parse(&content);
        let hash = table.find("alice").unwrap().hash.to_string();
        assert!((0..8).any(|i| hash == format!("$6$s{i}$h{i}")));
        assert_eq!(content, SAMPLE.replace("$6$oldsalt$oldhash", &hash));
    }

    #[test]
    fn test_table_render_roundtrip() {
        let table = ShadowTable::parse(SAMPLE);
        assert_eq!(table.len(), 3);
        assert_eq!(table.render().as_str(), SAMPLE);
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(Path::new("/etc/shadow")), PathBuf::from("/etc/shadow-"));
    }
}
