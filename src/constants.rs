//! Centralized constants for paths, permissions, and limits.

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/passwd-srvd/config.toml";

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV_VAR: &str = "PASSWD_SRVD_CONFIG";

/// Shadow password database.
pub const DEFAULT_SHADOW_PATH: &str = "/etc/shadow";

/// Lock file shared with the shadow-utils tools.
pub const DEFAULT_LOCK_PATH: &str = "/etc/.pwd.lock";

/// Host hashing policy.
pub const DEFAULT_LOGIN_DEFS_PATH: &str = "/etc/login.defs";

/// Seconds to wait for the store lock before giving up (matches lckpwdf).
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 15;

/// Poll interval while waiting on a contended lock.
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

pub const DEFAULT_USERADD: &str = "/usr/sbin/useradd";
pub const DEFAULT_USERDEL: &str = "/usr/sbin/userdel";

/// `userdel` exit status for "user does not exist".
pub const USERDEL_NO_SUCH_USER: i32 = 6;

/// Default audit trail location.
pub const DEFAULT_AUDIT_LOG_PATH: &str = "/var/log/passwd-srvd/audit.log";

/// Permission mode for the audit log directory.
pub const AUDIT_DIR_MODE: u32 = 0o750;

/// Permission mode for the audit log.
pub const AUDIT_LOG_MODE: u32 = 0o640;

/// Permission bits `doctor` tolerates on the shadow file. Anything beyond
/// these is reported.
pub const SHADOW_FILE_MODE: u32 = 0o640;

/// Bounds on generated salt length.
pub const MIN_SALT_LEN: usize = 8;
pub const MAX_SALT_LEN: usize = 16;

/// Salt alphabet used by crypt(3), in radix-64 digit order.
pub const SALT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Longest login name accepted.
pub const MAX_USERNAME_LEN: usize = 32;

/// Upper bound on a plaintext password accepted from a request.
pub const MAX_PASSWORD_LEN: usize = 4096;

/// Largest request document read from stdin.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;
