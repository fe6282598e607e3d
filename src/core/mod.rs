//! Core account-management logic.

pub mod audit_log;
pub mod config;
pub mod crypt;
pub mod dispatch;
pub mod error;
pub mod file_lock;
pub mod provision;
pub mod salt;
pub mod scheme;
pub mod store;
