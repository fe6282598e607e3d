//! Password hashing scheme selection from the host's login.defs.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HashScheme {
    Des,
    Md5,
    Sha256,
    Sha512,
}

/// How many salt characters a scheme takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltLength {
    Fixed(usize),
    /// Inclusive bounds; the actual length is drawn at random.
    Variable { min: usize, max: usize },
}

impl HashScheme {
    /// Tag placed between `$` markers in the crypt setting. DES has none.
    pub fn tag(self) -> Option<char> {
        match self {
            HashScheme::Des => None,
            HashScheme::Md5 => Some('1'),
            HashScheme::Sha256 => Some('5'),
            HashScheme::Sha512 => Some('6'),
        }
    }

    pub fn salt_length(self) -> SaltLength {
        match self {
            HashScheme::Des | HashScheme::Md5 => SaltLength::Fixed(8),
            HashScheme::Sha256 | HashScheme::Sha512 => SaltLength::Variable { min: 8, max: 16 },
        }
    }

    /// Parse an `ENCRYPT_METHOD` value. Matching is exact.
    pub fn from_method(value: &str) -> Option<Self> {
        match value {
            "DES" => Some(HashScheme::Des),
            "MD5" => Some(HashScheme::Md5),
            "SHA256" => Some(HashScheme::Sha256),
            "SHA512" => Some(HashScheme::Sha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashScheme::Des => "DES",
            HashScheme::Md5 => "MD5",
            HashScheme::Sha256 => "SHA256",
            HashScheme::Sha512 => "SHA512",
        }
    }
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves the active scheme once and memoizes it until [`reset`] is called.
///
/// [`reset`]: SchemeResolver::reset
#[derive(Debug)]
pub struct SchemeResolver {
    login_defs: PathBuf,
    cached: RwLock<Option<HashScheme>>,
}

impl SchemeResolver {
    pub fn new(login_defs: impl Into<PathBuf>) -> Self {
        Self {
            login_defs: login_defs.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn login_defs(&self) -> &Path {
        &self.login_defs
    }

    pub fn resolve(&self) -> HashScheme {
        if let Some(scheme) = *self.cached.read().unwrap_or_else(|e| e.into_inner()) {
            return scheme;
        }
        let mut slot = self.cached.write().unwrap_or_else(|e| e.into_inner());
        // another caller may have filled it while we waited
        if let Some(scheme) = *slot {
            return scheme;
        }
        let scheme = resolve_from_file(&self.login_defs);
        debug!(scheme = %scheme, path = %self.login_defs.display(), "resolved hashing scheme");
        *slot = Some(scheme);
        scheme
    }

    /// Drop the memoized scheme; the next [`resolve`](Self::resolve) re-reads
    /// the configuration.
    pub fn reset(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// Read `path` and resolve the scheme. An unreadable file yields DES.
pub fn resolve_from_file(path: &Path) -> HashScheme {
    match fs::read_to_string(path) {
        Ok(content) => resolve_from_str(&content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read login.defs, using DES");
            HashScheme::Des
        }
    }
}

/// Anything other than a recognised `ENCRYPT_METHOD` or an `MD5_CRYPT_ENAB`
/// other than exactly `no` falls through to DES.
pub fn resolve_from_str(content: &str) -> HashScheme {
    if let Some(method) = lookup_key(content, "ENCRYPT_METHOD") {
        return match HashScheme::from_method(method) {
            Some(scheme) => scheme,
            None => {
                warn!(method, "unsupported ENCRYPT_METHOD, using DES");
                HashScheme::Des
            }
        };
    }
    match lookup_key(content, "MD5_CRYPT_ENAB") {
        None | Some("no") => HashScheme::Des,
        Some(_) => HashScheme::Md5,
    }
}

/// First value for `key` in a whitespace-separated key/value file.
fn lookup_key<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? != key {
                return None;
            }
            parts.next().map(|v| v.trim_matches('"'))
        })
}
