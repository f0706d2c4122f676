//! Shared error plumbing used across all toolhub crates.

pub mod error;

pub use error::FromMessage;
