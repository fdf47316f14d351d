//! Serialization views of the stored records, as the HTTP surface ships them.
//!
//! Two projections exist for messages: the summary drops bodies, the detailed
//! view carries recipients, bodies, attachments and the AI fields.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::attachments::Attachment;
use crate::columns::Column;
use crate::gmail::parser::Recipient;
use crate::mailboxes::Mailbox;
use crate::messages::{Category, Message, TaskStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxResponse {
    pub id: i64,
    pub provider: String,
    pub email: String,
    pub sync_status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub total_emails: i64,
    pub unread_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Mailbox> for MailboxResponse {
    fn from(mailbox: &Mailbox) -> Self {
        Self {
            id: mailbox.id,
            provider: mailbox.provider.clone(),
            email: mailbox.email.clone(),
            sync_status: mailbox.sync_status.as_str().to_string(),
            last_sync_at: mailbox.last_sync_at,
            last_sync_error: mailbox.last_sync_error.clone(),
            total_emails: mailbox.total_emails,
            unread_count: mailbox.unread_count,
            is_active: mailbox.is_active,
            created_at: mailbox.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: i64,
    pub mailbox_id: i64,
    pub provider_message_id: String,
    pub provider_thread_id: String,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_pinned: bool,
    pub has_attachments: bool,
    pub labels: Vec<String>,
    pub category: Category,
    pub task_status: TaskStatus,
    pub task_deadline: Option<DateTime<Utc>>,
    pub is_snoozed: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub ai_summary: Option<String>,
    pub urgency_score: Option<i64>,
    pub column_id: Option<i64>,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            mailbox_id: message.mailbox_id,
            provider_message_id: message.provider_message_id.clone(),
            provider_thread_id: message.provider_thread_id.clone(),
            subject: message.subject.clone(),
            snippet: message.snippet.clone(),
            from_email: message.from_email.clone(),
            from_name: message.from_name.clone(),
            received_at: message.received_at,
            is_read: message.is_read,
            is_starred: message.is_starred,
            is_pinned: message.is_pinned,
            has_attachments: message.has_attachments,
            labels: message.labels.clone(),
            category: message.category,
            task_status: message.task_status,
            task_deadline: message.task_deadline,
            is_snoozed: message.is_snoozed,
            snoozed_until: message.snoozed_until,
            ai_summary: message.ai_summary.clone(),
            urgency_score: message.urgency_score,
            column_id: message.column_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub ai_action_items: Option<serde_json::Value>,
    pub attachments: Vec<AttachmentResponse>,
}

impl MessageDetail {
    pub fn new(message: &Message, attachments: &[Attachment]) -> Self {
        Self {
            summary: MessageSummary::from(message),
            to: message.to.clone(),
            cc: message.cc.clone(),
            bcc: message.bcc.clone(),
            body_html: message.body_html.clone(),
            body_text: message.body_text.clone(),
            ai_action_items: message.ai_action_items.clone(),
            attachments: attachments.iter().map(AttachmentResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentResponse {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub is_inline: bool,
}

impl From<&Attachment> for AttachmentResponse {
    fn from(attachment: &Attachment) -> Self {
        Self {
            id: attachment.id,
            message_id: attachment.message_id,
            filename: attachment.filename.clone(),
            mime_type: attachment.mime_type.clone(),
            size: attachment.size,
            is_inline: attachment.is_inline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnResponse {
    pub id: i64,
    pub title: String,
    pub order_index: i64,
    pub label_token: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
}

impl From<&Column> for ColumnResponse {
    fn from(column: &Column) -> Self {
        Self {
            id: column.id,
            title: column.title.clone(),
            order_index: column.order_index,
            label_token: column.label_token.clone(),
            color: column.color.clone(),
            is_default: column.is_default,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub items_per_page: u32,
    pub total_items: u64,
    pub current_page: u32,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u32, limit: u32, total_items: u64) -> Self {
        let items_per_page = limit.clamp(1, 100);
        let total_pages = total_items.div_ceil(items_per_page as u64);
        Self {
            items_per_page,
            total_items,
            current_page: page.max(1),
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationLinks {
    pub current: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
    pub links: PaginationLinks,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, meta: PaginationMeta, current: String) -> Self {
        Self {
            data,
            meta,
            links: PaginationLinks { current },
        }
    }
}
