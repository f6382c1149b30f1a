//! Persistence layer: the accounts/rules configuration file.

pub mod file;

pub use file::{ConfigStore, write_atomic};
