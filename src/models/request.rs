//! Inbound account change requests.

use crate::constants;
use serde::Deserialize;
use std::fmt;
use zeroize::Zeroizing;

/// Requested mutation. Accepts either the snake_case name or the legacy
/// numeric op code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RawOperation")]
pub enum Operation {
    ChangePassword,
    AddUser,
    DeleteUser,
    /// Anything the daemon does not understand. Names that do not match map
    /// to code 0.
    Unknown(u32),
}

impl Operation {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Operation::ChangePassword,
            2 => Operation::AddUser,
            3 => Operation::DeleteUser,
            other => Operation::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ChangePassword => "change_password",
            Operation::AddUser => "add_user",
            Operation::DeleteUser => "delete_user",
            Operation::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Unknown(code) => write!(f, "unknown({})", code),
            known => f.write_str(known.name()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOperation {
    Code(u32),
    Name(String),
}

impl From<RawOperation> for Operation {
    fn from(raw: RawOperation) -> Self {
        match raw {
            RawOperation::Code(code) => Operation::from_code(code),
            RawOperation::Name(name) => match name.as_str() {
                "change_password" => Operation::ChangePassword,
                "add_user" => Operation::AddUser,
                "delete_user" => Operation::DeleteUser,
                _ => Operation::Unknown(0),
            },
        }
    }
}

/// One request as handed over by the transport. Password fields are wiped
/// when the request is dropped.
#[derive(Deserialize)]
pub struct ChangeRequest {
    pub operation: Operation,
    pub username: String,
    #[serde(default)]
    pub old_password: Option<Zeroizing<String>>,
    #[serde(default)]
    pub new_password: Option<Zeroizing<String>>,
}

impl ChangeRequest {
    pub fn change_password(username: &str, old: &str, new: &str) -> Self {
        Self {
            operation: Operation::ChangePassword,
            username: username.to_string(),
            old_password: Some(Zeroizing::new(old.to_string())),
            new_password: Some(Zeroizing::new(new.to_string())),
        }
    }

    pub fn add_user(username: &str, password: &str) -> Self {
        Self {
            operation: Operation::AddUser,
            username: username.to_string(),
            old_password: None,
            new_password: Some(Zeroizing::new(password.to_string())),
        }
    }

    pub fn delete_user(username: &str) -> Self {
        Self {
            operation: Operation::DeleteUser,
            username: username.to_string(),
            old_password: None,
            new_password: None,
        }
    }
}

impl fmt::Debug for ChangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |p: &Option<Zeroizing<String>>| p.as_ref().map(|_| "<redacted>");
        f.debug_struct("ChangeRequest")
            .field("operation", &self.operation)
            .field("username", &self.username)
            .field("old_password", &redact(&self.old_password))
            .field("new_password", &redact(&self.new_password))
            .finish()
    }
}

/// Check that `name` is a login name useradd would accept and that cannot be
/// mistaken for a command-line option or break the shadow record format.
pub fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("username cannot be empty".into());
    }
    if name.len() > constants::MAX_USERNAME_LEN {
        return Err(format!(
            "username longer than {} characters",
            constants::MAX_USERNAME_LEN
        ));
    }
    let body = name.strip_suffix('$').unwrap_or(name);
    let mut chars = body.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return Err("username must start with [a-z_]".into()),
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err("only [a-z0-9_-] allowed in username".into());
    }
    Ok(())
}

/// Reject passwords that would corrupt the request pipeline.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("password cannot be empty".into());
    }
    if password.len() > constants::MAX_PASSWORD_LEN {
        return Err("password too long".into());
    }
    if password.contains('\0') {
        return Err("password contains NUL".into());
    }
    Ok(())
}
