//! mail-bridge: POP3 accounts → rule-based routing → local IMAP mailboxes.

pub mod check;
pub mod config;
pub mod error;
pub mod fetchmail;
pub mod import;
pub mod pipeline;
pub mod pop3;
pub mod store;
pub mod vault;
pub mod web;

pub use error::{Error, Result};

/// File name of the delivery log inside the log directory.
pub const DELIVERY_LOG_FILE: &str = "process_mail.log";
