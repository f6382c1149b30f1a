//! Error types for mail-bridge.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

/// Configuration file errors. Fatal to the invoking process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {0} not found")]
    NotFound(PathBuf),

    #[error("Invalid configuration in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Configuration has {} problem(s): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential vault errors. Callers treat these as "credential unavailable".
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed (wrong key or corrupted token)")]
    Decryption,

    #[error("Invalid encrypted token: {0}")]
    InvalidFormat(String),
}

/// Delivery agent errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to start delivery agent {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to feed message to delivery agent: {0}")]
    Stdin(std::io::Error),

    #[error("Delivery agent exited with code {code:?} for folder {folder}")]
    AgentFailed { code: Option<i32>, folder: String },
}

/// POP3 and webhook errors. Reported to the user, never fatal to the UI.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("POP3 server rejected {command}: {reply}")]
    Pop3Rejected { command: String, reply: String },

    #[error("POP3 protocol error: {0}")]
    Pop3Protocol(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Webhook request failed: {0}")]
    Webhook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail import errors.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for mail-bridge.
pub type Result<T> = std::result::Result<T, Error>;
