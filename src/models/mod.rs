//! Data structures shared across the engine.

pub mod config;
pub mod entry;
pub mod request;
