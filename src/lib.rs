//! Privileged account-management service.
//!
//! Accepts password-change, account-creation and account-deletion requests,
//! verifies them against the shadow password database, and applies them with
//! the host's configured crypt(3) scheme.
//!
//! ## Modules
//! - `cli`: command-line handlers
//! - `core`: scheme resolution, hashing, the locked store, dispatch, audit
//! - `models`: requests, shadow records, configuration
//! - `util`: filesystem and privilege helpers

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod util;
