//! One record of the shadow password database.

use std::fmt;
use zeroize::Zeroizing;

/// In-memory shadow record: `username:hash:<aging fields>`.
///
/// Everything after the hash field is carried through untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    pub username: String,
    pub hash: Zeroizing<String>,
    /// Raw remainder after the second `:`; `None` when the line had only two
    /// fields.
    pub extra: Option<String>,
}

impl CredentialEntry {
    pub fn new(username: &str, hash: &str, extra: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            hash: Zeroizing::new(hash.to_string()),
            extra: extra.map(str::to_string),
        }
    }

    /// Parse a single shadow line. Returns `None` for lines that are not
    /// records (comments, blanks, garbage).
    pub fn parse_line(line: &str) -> Option<Self> {
        if line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(3, ':');
        let username = parts.next()?;
        let hash = parts.next()?;
        if username.is_empty() {
            return None;
        }
        Some(Self::new(username, hash, parts.next()))
    }

    /// Serialize back into a shadow line (no trailing newline).
    pub fn to_line(&self) -> Zeroizing<String> {
        let mut line = Zeroizing::new(String::with_capacity(
            self.username.len() + self.hash.len() + 64,
        ));
        line.push_str(&self.username);
        line.push(':');
        line.push_str(&self.hash);
        if let Some(extra) = &self.extra {
            line.push(':');
            line.push_str(extra);
        }
        line
    }

    /// Scheme tag embedded in the hash (`1`, `5`, `6`, ...), if any.
    pub fn scheme_tag(&self) -> Option<&str> {
        let rest = self.hash.strip_prefix('$')?;
        rest.split('$').next().filter(|t| !t.is_empty())
    }

    /// Whether the hash field holds a usable credential rather than a lock
    /// marker (`!`, `*`, `!!`) or nothing.
    pub fn has_password(&self) -> bool {
        !self.hash.is_empty() && !self.hash.starts_with('!') && !self.hash.starts_with('*')
    }
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("username", &self.username)
            .field("scheme_tag", &self.scheme_tag())
            .field("extra", &self.extra)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_record() {
        let e = CredentialEntry::parse_line("salty:$6$saltSALT$abc:18912:0:99999:7:::").unwrap();
        assert_eq!(e.username, "salty");
        assert_eq!(e.hash.as_str(), "$6$saltSALT$abc");
        assert_eq!(e.extra.as_deref(), Some("18912:0:99999:7:::"));
        assert_eq!(e.scheme_tag(), Some("6"));
        assert!(e.has_password());
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        for line in ["root:*:18912:0:99999:7:::", "daemon:!!", "x::1:2:3:4:5:6:flag"] {
            let e = CredentialEntry::parse_line(line).unwrap();
            assert_eq!(e.to_line().as_str(), line);
        }
    }

    #[test]
    fn test_non_records() {
        assert!(CredentialEntry::parse_line("# comment").is_none());
        assert!(CredentialEntry::parse_line("").is_none());
        assert!(CredentialEntry::parse_line("nocolon").is_none());
        assert!(CredentialEntry::parse_line(":hash").is_none());
    }

    #[test]
    fn test_legacy_des_has_no_tag() {
        let e = CredentialEntry::new("old", "abJnggxhB/yWI", None);
        assert_eq!(e.scheme_tag(), None);
        assert!(e.has_password());
    }

    #[test]
    fn test_locked_account() {
        let e = CredentialEntry::new("svc", "!$6$x$y", Some("1::::::"));
        assert!(!e.has_password());
    }

    #[test]
    fn test_debug_hides_hash() {
        let e = CredentialEntry::new("a", "$6$salt$secretHash", None);
        assert!(!format!("{:?}", e).contains("secretHash"));
    }
}
