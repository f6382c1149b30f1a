//! Hand-off to the local delivery agent (`dovecot-lda`).

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::DeliveryError;
use crate::pipeline::types::RoutingDecision;

/// Value of the `X-Processed-By` header.
pub const PROCESSED_BY: &str = "mail-bridge";

/// Places a message into a user's mailbox folder.
#[async_trait]
pub trait DeliveryAgent: Send + Sync {
    async fn deliver(
        &self,
        user: &str,
        folder: &str,
        message: &[u8],
    ) -> Result<(), DeliveryError>;
}

/// Runs `<program> -d <user> -m <folder>` with the message on stdin.
pub struct LdaAgent {
    program: String,
}

impl LdaAgent {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DeliveryAgent for LdaAgent {
    async fn deliver(
        &self,
        user: &str,
        folder: &str,
        message: &[u8],
    ) -> Result<(), DeliveryError> {
        let mut child = Command::new(&self.program)
            .args(["-d", user, "-m", folder])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| DeliveryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(message).await {
                Ok(()) => {}
                // Agent closed stdin early; its exit status decides.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Delivery agent closed stdin early");
                }
                Err(e) => return Err(DeliveryError::Stdin(e)),
            }
            drop(stdin);
        }

        let status = child.wait().await.map_err(DeliveryError::Stdin)?;
        if status.success() {
            info!(user = %user, folder = %folder, "Successfully delivered");
            Ok(())
        } else {
            error!(user = %user, folder = %folder, code = ?status.code(), "Delivery failed");
            Err(DeliveryError::AgentFailed {
                code: status.code(),
                folder: folder.to_string(),
            })
        }
    }
}

/// Prepend the routing headers to a raw message.
///
/// Adds `X-Marked-As` when the decision carries a marker, plus
/// `X-Processed-By` and `X-Processed-At`.
pub fn annotate(raw: &[u8], decision: &RoutingDecision, at: DateTime<Utc>) -> Vec<u8> {
    let eol: &[u8] = if raw.windows(2).any(|w| w == b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    };

    let mut headers: Vec<(&str, String)> = Vec::new();
    if let Some(mark) = &decision.mark_as {
        headers.push(("X-Marked-As", header_value(mark)));
    }
    headers.push(("X-Processed-By", PROCESSED_BY.to_string()));
    headers.push(("X-Processed-At", at.to_rfc3339()));

    let mut out = Vec::with_capacity(raw.len() + 128);
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(eol);
    }
    out.extend_from_slice(raw);
    out
}

/// Header-safe value: no line breaks.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
