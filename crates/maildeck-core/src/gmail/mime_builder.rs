use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mail_builder::MessageBuilder;
use mail_builder::headers::address::Address;
use mail_builder::headers::message_id::MessageId;
use thiserror::Error;

/// Gmail rejects raw messages above 25 MiB.
const MAX_MESSAGE_BYTES: usize = 25 * 1024 * 1024;

/// Simple representation of an email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(name: Option<impl Into<String>>, email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.map(|n| n.into()),
        }
    }
}

impl From<&str> for EmailAddress {
    fn from(email: &str) -> Self {
        Self {
            email: email.to_string(),
            name: None,
        }
    }
}

impl From<String> for EmailAddress {
    fn from(email: String) -> Self {
        Self { email, name: None }
    }
}

/// Represents a binary attachment to include in the MIME message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// High-level MIME message builder for outbound sends. A plain and an HTML
/// body together produce multipart/alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub attachments: Vec<MimeAttachment>,
}

impl MimeMessage {
    /// Build the RFC 5322 message as a string.
    pub fn to_rfc822(self) -> Result<String, MimeBuildError> {
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(MimeBuildError::MissingRecipients);
        }

        if self.body_plain.is_none() && self.body_html.is_none() && self.attachments.is_empty() {
            return Err(MimeBuildError::MissingBody);
        }

        let mut builder = MessageBuilder::new().from(to_header_address(&self.from));

        if !self.to.is_empty() {
            builder = builder.to(address_list(&self.to));
        }
        if !self.cc.is_empty() {
            builder = builder.cc(address_list(&self.cc));
        }
        if !self.bcc.is_empty() {
            builder = builder.bcc(address_list(&self.bcc));
        }
        if let Some(subject) = self.subject.as_ref() {
            builder = builder.subject(subject.as_str());
        }
        if let Some(body) = self.body_plain.as_ref() {
            builder = builder.text_body(body.as_str());
        }
        if let Some(body) = self.body_html.as_ref() {
            builder = builder.html_body(body.as_str());
        }

        if let Some(in_reply_to) = self
            .in_reply_to
            .as_ref()
            .and_then(|id| normalize_message_id(id))
        {
            builder = builder.in_reply_to(MessageId::new(in_reply_to.clone()));
            builder = builder.references(MessageId::from(combined_references(
                &self.references,
                Some(&in_reply_to),
            )));
        } else if !self.references.is_empty() {
            builder =
                builder.references(MessageId::from(combined_references(&self.references, None)));
        }

        for attachment in self.attachments {
            let content_type = if attachment.content_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                attachment.content_type.clone()
            };
            builder = builder.attachment(
                content_type,
                attachment.filename.clone(),
                attachment.data.clone(),
            );
        }

        let raw = builder.write_to_string().map_err(MimeBuildError::Io)?;
        if raw.len() > MAX_MESSAGE_BYTES {
            return Err(MimeBuildError::TooLarge(raw.len()));
        }
        Ok(raw)
    }

    /// Build the message and return it base64url encoded for the Gmail API.
    pub fn to_base64_url(self) -> Result<String, MimeBuildError> {
        let raw = self.to_rfc822()?;
        Ok(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
    }
}

#[derive(Debug, Error)]
pub enum MimeBuildError {
    #[error("at least one recipient is required")]
    MissingRecipients,
    #[error("a body or attachment is required")]
    MissingBody,
    #[error("message of {0} bytes exceeds the 25 MiB limit")]
    TooLarge(usize),
    #[error("failed to build message: {0}")]
    Io(#[from] std::io::Error),
}

fn to_header_address(addr: &EmailAddress) -> Address<'static> {
    Address::new_address(addr.name.clone(), addr.email.clone())
}

fn address_list(addrs: &[EmailAddress]) -> Address<'static> {
    let list: Vec<Address<'static>> = addrs.iter().map(to_header_address).collect();
    Address::new_list(list)
}

/// Normalize a message ID by removing surrounding whitespace and angle brackets.
/// Returns `None` if the result is empty.
pub fn normalize_message_id(id: &str) -> Option<String> {
    let trimmed = id.trim().trim_matches('<').trim_matches('>');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// References = caller-supplied chain plus the replied-to id at the end,
/// without duplicating it.
fn combined_references(references: &[String], in_reply_to: Option<&str>) -> Vec<String> {
    let mut combined: Vec<String> = references
        .iter()
        .filter_map(|id| normalize_message_id(id))
        .collect();

    if let Some(reply_id) = in_reply_to {
        if !combined.iter().any(|id| id == reply_id) {
            combined.push(reply_id.to_string());
        }
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_message() -> MimeMessage {
        MimeMessage {
            from: EmailAddress::new(Some("Sender"), "sender@example.com"),
            to: vec![EmailAddress::from("recipient@example.com")],
            cc: vec![],
            bcc: vec![],
            subject: Some("Test subject".into()),
            body_plain: Some("Plain body".into()),
            body_html: None,
            in_reply_to: None,
            references: vec![],
            attachments: vec![],
        }
    }

    #[test]
    fn builds_plain_text_message() {
        let raw = basic_message().to_rfc822().expect("builds");

        assert!(raw.contains("From: "));
        assert!(raw.contains("sender@example.com"));
        assert!(raw.contains("To: "));
        assert!(raw.contains("Subject: Test subject"));
        assert!(raw.contains("Plain body"));
    }

    #[test]
    fn html_body_produces_multipart_alternative() {
        let mut message = basic_message();
        message.body_html = Some("<p>HTML body</p>".into());

        let raw = message.to_rfc822().expect("builds");
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn requires_at_least_one_recipient() {
        let mut message = basic_message();
        message.to.clear();

        let err = message.to_rfc822().expect_err("should fail");
        assert!(matches!(err, MimeBuildError::MissingRecipients));
    }

    #[test]
    fn requires_body_or_attachment() {
        let mut message = basic_message();
        message.body_plain = None;

        let err = message.to_rfc822().expect_err("should fail");
        assert!(matches!(err, MimeBuildError::MissingBody));
    }

    #[test]
    fn reply_context_sets_threading_headers() {
        let mut message = basic_message();
        message.in_reply_to = Some("<orig-id@example.com>".into());
        message.references = vec!["<earlier@example.com>".into()];

        let raw = message.to_rfc822().expect("builds");
        assert!(raw.contains("In-Reply-To: <orig-id@example.com>"));
        assert!(raw.contains("earlier@example.com"));
        assert!(raw.contains("orig-id@example.com"));
    }

    #[test]
    fn references_do_not_duplicate_reply_id() {
        let combined = combined_references(
            &["<a@x>".to_string(), "<b@x>".to_string()],
            Some("b@x"),
        );
        assert_eq!(combined, vec!["a@x", "b@x"]);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut message = basic_message();
        message.attachments.push(MimeAttachment {
            filename: "huge.bin".into(),
            content_type: "application/octet-stream".into(),
            data: vec![0u8; MAX_MESSAGE_BYTES],
        });

        let err = message.to_rfc822().expect_err("should exceed cap");
        assert!(matches!(err, MimeBuildError::TooLarge(_)));
    }

    #[test]
    fn base64_output_round_trips() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let encoded = basic_message().to_base64_url().expect("builds");
        let decoded = URL_SAFE_NO_PAD.decode(encoded).expect("valid base64url");
        let raw = String::from_utf8(decoded).expect("utf8");
        assert!(raw.contains("Plain body"));
    }

    #[test]
    fn normalize_message_id_strips_brackets() {
        assert_eq!(
            normalize_message_id(" <abc@example.com> ").as_deref(),
            Some("abc@example.com")
        );
        assert_eq!(normalize_message_id("<>"), None);
        assert_eq!(normalize_message_id("  "), None);
    }
}
