//! Inbound message model: the fields routing rules match against.

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::warn;

/// An inbound email, parsed just far enough for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Decoded Subject header, as sent.
    pub subject: Option<String>,
    /// From header rendered as `Name <address>` (or just the address).
    pub from: Option<String>,
    /// Text of the first text/plain part; empty if none could be decoded.
    pub body: String,
    /// The message exactly as received.
    pub raw: Vec<u8>,
}

impl MailMessage {
    /// Parse raw RFC 5322 bytes.
    ///
    /// Never fails: input mail-parser rejects (no headers, empty, binary
    /// junk) becomes a message with no subject or sender whose body is the
    /// raw bytes, lossily decoded.
    pub fn parse(raw: Vec<u8>) -> Self {
        let parsed = MessageParser::default().parse(raw.as_slice()).map(|parsed| {
            (
                parsed.subject().map(str::to_string),
                render_from(&parsed),
                extract_body(&parsed),
            )
        });

        let (subject, from, body) = match parsed {
            Some(fields) => fields,
            None => {
                warn!(
                    bytes = raw.len(),
                    "Message has no parseable headers, routing as plain text"
                );
                (None, None, String::from_utf8_lossy(&raw).into_owned())
            }
        };

        Self {
            subject,
            from,
            body,
            raw,
        }
    }

    /// Build a message from already-extracted fields (no raw bytes).
    pub fn from_parts(subject: Option<&str>, from: Option<&str>, body: &str) -> Self {
        Self {
            subject: subject.map(String::from),
            from: from.map(String::from),
            body: body.to_string(),
            raw: Vec::new(),
        }
    }
}

fn render_from(parsed: &Message) -> Option<String> {
    let addr = parsed.from()?.first()?;
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
        (None, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

/// Body text used for matching.
///
/// Multipart: the first text/plain part in depth-first order; the rest is
/// ignored. Single part: the whole payload, whatever its type.
fn extract_body(parsed: &Message) -> String {
    let Some(root) = parsed.parts.first() else {
        return String::new();
    };

    if matches!(root.body, PartType::Multipart(_)) {
        parsed
            .parts
            .iter()
            .find(|part| is_text_plain(part))
            .map(part_text)
            .unwrap_or_default()
    } else {
        part_text(root)
    }
}

fn is_text_plain(part: &MessagePart) -> bool {
    match MimeHeaders::content_type(part) {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("plain"))
        }
        // No Content-Type defaults to text/plain.
        None => matches!(part.body, PartType::Text(_)),
    }
}

fn part_text(part: &MessagePart) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        PartType::Message(_) | PartType::Multipart(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> MailMessage {
        MailMessage::parse(raw.replace('\n', "\r\n").into_bytes())
    }

    #[test]
    fn extracts_headers_and_plain_body() {
        let msg = parse(
            "From: Billing <billing@vendor.com>\n\
             Subject: Invoice #44\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             Please pay by Friday.\n",
        );
        assert_eq!(msg.subject.as_deref(), Some("Invoice #44"));
        assert_eq!(msg.from.as_deref(), Some("Billing <billing@vendor.com>"));
        assert!(msg.body.contains("Please pay by Friday."));
    }

    #[test]
    fn bare_address_from() {
        let msg = parse("From: boss@example.com\nSubject: hi\n\nbody\n");
        assert_eq!(msg.from.as_deref(), Some("boss@example.com"));
    }

    #[test]
    fn missing_subject_is_none() {
        let msg = parse("From: a@b.c\n\nbody\n");
        assert_eq!(msg.subject, None);
    }

    #[test]
    fn multipart_uses_first_text_plain_part() {
        let msg = parse(
            "From: a@example.com\n\
             Subject: mixed\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/alternative; boundary=\"XX\"\n\
             \n\
             --XX\n\
             Content-Type: text/html\n\
             \n\
             <p>html version</p>\n\
             --XX\n\
             Content-Type: text/plain\n\
             \n\
             first plain part\n\
             --XX\n\
             Content-Type: text/plain\n\
             \n\
             second plain part\n\
             --XX--\n",
        );
        assert!(msg.body.contains("first plain part"));
        assert!(!msg.body.contains("second plain part"));
        assert!(!msg.body.contains("html version"));
    }

    #[test]
    fn multipart_without_plain_part_has_empty_body() {
        let msg = parse(
            "From: a@example.com\n\
             Content-Type: multipart/mixed; boundary=\"B\"\n\
             \n\
             --B\n\
             Content-Type: text/html\n\
             \n\
             <b>only html</b>\n\
             --B--\n",
        );
        assert_eq!(msg.body, "");
    }

    #[test]
    fn single_part_html_uses_whole_payload() {
        let msg = parse("From: a@example.com\nContent-Type: text/html\n\n<b>Bold</b>\n");
        assert!(msg.body.contains("<b>Bold</b>"));
    }

    #[test]
    fn decodes_quoted_printable_body() {
        let msg = parse(
            "From: a@example.com\n\
             Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: quoted-printable\n\
             \n\
             Gr=C3=BC=C3=9Fe\n",
        );
        assert!(msg.body.contains("Grüße"));
    }

    #[test]
    fn keeps_raw_bytes() {
        let raw = b"Subject: x\r\n\r\nbody\r\n".to_vec();
        let msg = MailMessage::parse(raw.clone());
        assert_eq!(msg.raw, raw);
    }

    #[test]
    fn headerless_text_becomes_body() {
        let raw = b"just some text without headers\n".to_vec();
        let msg = MailMessage::parse(raw.clone());
        assert_eq!(msg.subject, None);
        assert_eq!(msg.from, None);
        assert!(msg.body.contains("just some text without headers"));
        assert_eq!(msg.raw, raw);
    }

    #[test]
    fn empty_input_is_an_empty_message() {
        let msg = MailMessage::parse(Vec::new());
        assert_eq!(msg.subject, None);
        assert_eq!(msg.from, None);
        assert_eq!(msg.body, "");
        assert!(msg.raw.is_empty());
    }

    #[test]
    fn non_utf8_garbage_is_kept_and_decoded_lossily() {
        let raw = b"\xff\xfe garbage\r\n".to_vec();
        let msg = MailMessage::parse(raw.clone());
        assert_eq!(msg.subject, None);
        assert!(msg.body.contains("garbage"));
        assert_eq!(msg.raw, raw);
    }

    #[test]
    fn unparseable_input_still_routes_to_inbox() {
        use crate::config::{Conditions, FilterRule, RuleAction};
        use crate::pipeline::rules::route;

        let rules = vec![FilterRule {
            name: "invoices".into(),
            conditions: Conditions {
                subject_contains: Some("invoice".into()),
                ..Default::default()
            },
            action: RuleAction {
                folder: Some("Invoices".into()),
                ..Default::default()
            },
        }];
        let decision = route(&MailMessage::parse(b"\xff\xfe".to_vec()), &rules);
        assert_eq!(decision.folder, "INBOX");
    }
}
