use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};

use crate::gmail::types::{Message, MessagePart};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttachment {
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

/// Provider message flattened into the shape the ingestion path persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub provider_message_id: String,
    pub provider_thread_id: String,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub labels: Vec<String>,
    pub attachments: Vec<ParsedAttachment>,
}

pub fn parse_message(message: &Message) -> ParsedMessage {
    let payload = message.payload.as_ref();

    let from = header_value(payload, "From").and_then(parse_single_recipient);
    let to = header_value(payload, "To")
        .map(parse_recipient_list)
        .unwrap_or_default();
    let cc = header_value(payload, "Cc")
        .map(parse_recipient_list)
        .unwrap_or_default();
    let bcc = header_value(payload, "Bcc")
        .map(parse_recipient_list)
        .unwrap_or_default();
    let subject = header_value(payload, "Subject");

    let mut body_text = None;
    let mut body_html = None;
    let mut attachments = Vec::new();
    if let Some(part) = payload {
        walk_parts(part, &mut body_text, &mut body_html, &mut attachments, 0);
    }

    let mut labels = Vec::new();
    for label in &message.label_ids {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }

    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::UNIX_EPOCH);

    ParsedMessage {
        provider_message_id: message.id.clone(),
        provider_thread_id: message.thread_id.clone().unwrap_or_default(),
        subject,
        snippet: message.snippet.clone(),
        from_email: from.as_ref().map(|r| r.email.clone()).unwrap_or_default(),
        from_name: from.and_then(|r| r.name),
        to,
        cc,
        bcc,
        body_html,
        body_text,
        received_at,
        is_read: !labels.iter().any(|l| l == "UNREAD"),
        is_starred: labels.iter().any(|l| l == "STARRED"),
        labels,
        attachments,
    }
}

fn header_value(payload: Option<&MessagePart>, name: &str) -> Option<String> {
    payload.and_then(|p| part_header(p, name))
}

fn part_header(part: &MessagePart, name: &str) -> Option<String> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn parse_single_recipient(value: String) -> Option<Recipient> {
    parse_recipient(value.trim())
}

fn parse_recipient_list(value: String) -> Vec<Recipient> {
    split_addresses(&value)
        .into_iter()
        .filter_map(|s| parse_recipient(s.trim()))
        .collect()
}

/// Parses `"Name" <addr>`, `Name <addr>` and bare-address forms. Input that
/// fits none of them is kept as a nameless raw address.
fn parse_recipient(input: &str) -> Option<Recipient> {
    if input.is_empty() {
        return None;
    }

    if let (Some(start), Some(end)) = (input.find('<'), input.rfind('>')) {
        let email = input[start + 1..end].trim();
        if email.is_empty() {
            return None;
        }
        let name_raw = input[..start].trim();
        let name = if name_raw.is_empty() {
            None
        } else {
            Some(strip_quotes(name_raw))
        };
        return Some(Recipient {
            email: email.to_string(),
            name,
        });
    }

    let trimmed = input.trim().trim_matches('<').trim_matches('>');
    if trimmed.is_empty() {
        None
    } else {
        Some(Recipient {
            email: trimmed.to_string(),
            name: None,
        })
    }
}

fn strip_quotes(input: &str) -> String {
    let stripped = input
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(input);
    stripped.replace("\\\"", "\"")
}

fn split_addresses(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut prev_char: Option<char> = None;

    for ch in input.chars() {
        match ch {
            '"' => {
                let is_escaped = prev_char == Some('\\');
                if !is_escaped {
                    in_quotes = !in_quotes;
                }
                current.push(ch);
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
        prev_char = Some(ch);
    }

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Maximum depth for MIME tree traversal to prevent stack overflow from malicious emails
const MAX_MIME_DEPTH: usize = 50;

fn walk_parts(
    part: &MessagePart,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<ParsedAttachment>,
    depth: usize,
) {
    if depth > MAX_MIME_DEPTH {
        return;
    }

    let filename = part.filename.as_deref().unwrap_or("");
    let attachment_id = part
        .body
        .as_ref()
        .and_then(|body| body.attachment_id.clone());

    if let Some(attachment_id) = attachment_id {
        if !filename.is_empty() {
            let disposition = part_header(part, "Content-Disposition").unwrap_or_default();
            attachments.push(ParsedAttachment {
                provider_attachment_id: attachment_id,
                filename: filename.to_string(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: part.body.as_ref().map(|b| b.size).unwrap_or(0),
                content_id: part_header(part, "Content-ID")
                    .map(|id| id.trim_matches(['<', '>']).to_string()),
                is_inline: disposition.to_ascii_lowercase().starts_with("inline"),
            });
        }
    } else if let Some(mime) = part.mime_type.as_deref() {
        if let Some(data) = part.body.as_ref().and_then(|body| body.data.as_ref()) {
            let decoded = decode_body(data);
            match mime {
                m if m.eq_ignore_ascii_case("text/plain") => {
                    if body_text.is_none() {
                        *body_text = decoded;
                    }
                }
                m if m.eq_ignore_ascii_case("text/html") => {
                    if body_html.is_none() {
                        *body_html = decoded;
                    }
                }
                _ => {}
            }
        }
    }

    for child in &part.parts {
        walk_parts(child, body_text, body_html, attachments, depth + 1);
    }
}

fn decode_body(data: &str) -> Option<String> {
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(data) {
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }

    if let Ok(bytes) = STANDARD.decode(data) {
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }

    None
}
