use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, Value, params, params_from_iter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, StoreError};
use crate::gmail::parser::{ParsedMessage, Recipient};
use crate::users::is_unique_violation;

const MESSAGE_COLUMNS: &str = "id, mailbox_id, provider_message_id, provider_thread_id, subject, snippet, from_email, from_name, to_json, cc_json, bcc_json, body_html, body_text, received_at, is_read, is_starred, has_attachments, labels_json, category, task_status, task_deadline, is_pinned, is_snoozed, snoozed_until, ai_summary, ai_action_items_json, urgency_score, column_id, embedding, embedding_generated_at, created_at, updated_at, deleted_at";

/// Expected width of stored embedding vectors.
pub const EMBEDDING_DIM: usize = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Primary,
    Social,
    Promotions,
    Updates,
    Forums,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Primary => "primary",
            Category::Social => "social",
            Category::Promotions => "promotions",
            Category::Updates => "updates",
            Category::Forums => "forums",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Category::Primary),
            "social" => Some(Category::Social),
            "promotions" => Some(Category::Promotions),
            "updates" => Some(Category::Updates),
            "forums" => Some(Category::Forums),
            _ => None,
        }
    }

    /// Category is derived from provider labels at ingest time.
    pub fn from_labels(labels: &[String]) -> Self {
        for label in labels {
            match label.as_str() {
                "CATEGORY_SOCIAL" => return Category::Social,
                "CATEGORY_PROMOTIONS" => return Category::Promotions,
                "CATEGORY_UPDATES" => return Category::Updates,
                "CATEGORY_FORUMS" => return Category::Forums,
                _ => {}
            }
        }
        Category::Primary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    None,
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::None => "none",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "none" => Some(TaskStatus::None),
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub mailbox_id: i64,
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
    pub has_attachments: bool,
    pub labels: Vec<String>,
    pub category: Category,
    pub task_status: TaskStatus,
    pub task_deadline: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub is_snoozed: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub ai_summary: Option<String>,
    pub ai_action_items: Option<serde_json::Value>,
    pub urgency_score: Option<i64>,
    pub column_id: Option<i64>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patchable user-facing fields. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub is_pinned: Option<bool>,
    pub task_status: Option<TaskStatus>,
    pub task_deadline: Option<Option<DateTime<Utc>>>,
    pub snoozed_until: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    #[serde(rename = "receivedAt")]
    ReceivedAt,
    #[serde(rename = "subject")]
    Subject,
    #[serde(rename = "fromEmail")]
    FromEmail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "ASC")]
    Asc,
    #[default]
    #[serde(rename = "DESC")]
    Desc,
}

/// Filter surface of the paginated listing.
#[derive(Debug, Clone, Default)]
pub struct MessageListFilter {
    pub mailbox_id: Option<i64>,
    pub search: Option<String>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub has_attachments: Option<bool>,
    pub category: Option<Category>,
    pub task_status: Option<TaskStatus>,
    pub from_email: Option<String>,
    pub label: Option<String>,
    pub exclude_label: Option<String>,
    pub is_snoozed: Option<bool>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

/// Projection used by the fuzzy ranker.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub id: i64,
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub body_text: Option<String>,
    pub ai_summary: Option<String>,
    pub labels: Vec<String>,
    pub mailbox_id: i64,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Clone)]
pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ingestion upsert. New observations insert the row plus its attachments;
    /// re-observations overwrite scalar fields and the label set but never
    /// re-insert attachments. Derived fields are recomputed in both paths.
    pub async fn ingest(
        &self,
        mailbox_id: i64,
        parsed: &ParsedMessage,
    ) -> Result<Message, MessageError> {
        let now = now_rfc3339();
        let to_json = serde_json::to_string(&parsed.to)?;
        let cc_json = serde_json::to_string(&parsed.cc)?;
        let bcc_json = serde_json::to_string(&parsed.bcc)?;
        let labels_json = serde_json::to_string(&parsed.labels)?;
        let category = Category::from_labels(&parsed.labels);
        let has_attachments = !parsed.attachments.is_empty();
        let from_name = parsed.from_name.clone();

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO messages (
                        mailbox_id, provider_message_id, provider_thread_id, subject, snippet,
                        from_email, from_name, to_json, cc_json, bcc_json, body_html, body_text,
                        received_at, is_read, is_starred, has_attachments, labels_json, category,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
                     ON CONFLICT(mailbox_id, provider_message_id) DO UPDATE SET
                        provider_thread_id = excluded.provider_thread_id,
                        subject = excluded.subject,
                        snippet = excluded.snippet,
                        from_email = excluded.from_email,
                        from_name = excluded.from_name,
                        to_json = excluded.to_json,
                        cc_json = excluded.cc_json,
                        bcc_json = excluded.bcc_json,
                        body_html = excluded.body_html,
                        body_text = excluded.body_text,
                        received_at = excluded.received_at,
                        is_read = excluded.is_read,
                        is_starred = excluded.is_starred,
                        labels_json = excluded.labels_json,
                        category = excluded.category,
                        deleted_at = NULL,
                        updated_at = excluded.updated_at
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![
                    mailbox_id,
                    parsed.provider_message_id.clone(),
                    parsed.provider_thread_id.clone(),
                    parsed.subject.clone(),
                    parsed.snippet.clone(),
                    parsed.from_email.clone(),
                    from_name,
                    to_json,
                    cc_json,
                    bcc_json,
                    parsed.body_html.clone(),
                    parsed.body_text.clone(),
                    to_rfc3339(parsed.received_at),
                    parsed.is_read as i64,
                    parsed.is_starred as i64,
                    has_attachments as i64,
                    labels_json,
                    category.as_str(),
                    now
                ],
            )
            .await?;

        let message = match rows.next().await? {
            Some(row) => row_to_message(row)?,
            None => return Err(MessageError::NotFound(parsed.provider_message_id.clone())),
        };

        if !parsed.attachments.is_empty() {
            self.insert_attachments_if_absent(&conn, message.id, parsed)
                .await?;
        }
        self.sync_has_attachments(&conn, message.id).await?;

        self.get_by_id(message.id).await
    }

    async fn insert_attachments_if_absent(
        &self,
        conn: &libsql::Connection,
        message_id: i64,
        parsed: &ParsedMessage,
    ) -> Result<(), MessageError> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM attachments WHERE message_id = ?1",
                params![message_id],
            )
            .await?;
        let existing: i64 = rows
            .next()
            .await?
            .ok_or_else(|| MessageError::InvalidValue("attachment count".into()))?
            .get(0)?;
        if existing > 0 {
            return Ok(());
        }

        let now = now_rfc3339();
        let tx = conn.transaction().await?;
        for attachment in &parsed.attachments {
            let result = tx
                .execute(
                    "INSERT INTO attachments (message_id, provider_attachment_id, filename, mime_type, size, content_id, is_inline, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        message_id,
                        attachment.provider_attachment_id.clone(),
                        attachment.filename.clone(),
                        attachment.mime_type.clone(),
                        attachment.size,
                        attachment.content_id.clone(),
                        attachment.is_inline as i64,
                        now.clone()
                    ],
                )
                .await;
            if let Err(err) = result {
                if is_unique_violation(&err) {
                    continue;
                }
                return Err(err.into());
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn sync_has_attachments(
        &self,
        conn: &libsql::Connection,
        message_id: i64,
    ) -> Result<(), MessageError> {
        conn.execute(
            "UPDATE messages
             SET has_attachments = EXISTS (SELECT 1 FROM attachments WHERE message_id = ?1)
             WHERE id = ?1",
            params![message_id],
        )
        .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Message, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND deleted_at IS NULL"
                ),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(id.to_string())),
        }
    }

    /// Ownership-checked lookup through the owning mailbox.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Message, MessageError> {
        let conn = self.db.connection().await?;
        let columns = prefixed_columns("m");
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {columns} FROM messages m
                     JOIN mailboxes b ON b.id = m.mailbox_id
                     WHERE m.id = ?1 AND b.user_id = ?2
                       AND m.deleted_at IS NULL AND b.deleted_at IS NULL"
                ),
                params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(id.to_string())),
        }
    }

    pub async fn get_by_provider_id(
        &self,
        mailbox_id: i64,
        provider_message_id: &str,
    ) -> Result<Message, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE mailbox_id = ?1 AND provider_message_id = ?2 AND deleted_at IS NULL"
                ),
                params![mailbox_id, provider_message_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(provider_message_id.to_string())),
        }
    }

    pub async fn soft_delete(&self, id: i64) -> Result<(), MessageError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "UPDATE messages SET deleted_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, now],
            )
            .await?;
        if affected == 0 {
            return Err(MessageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Batch soft delete by provider id list, used by incremental sync.
    pub async fn soft_delete_by_provider_ids(
        &self,
        mailbox_id: i64,
        provider_ids: &[String],
    ) -> Result<u64, MessageError> {
        if provider_ids.is_empty() {
            return Ok(0);
        }

        let now = now_rfc3339();
        let placeholders: Vec<String> = (0..provider_ids.len())
            .map(|i| format!("?{}", i + 3))
            .collect();
        let sql = format!(
            "UPDATE messages SET deleted_at = ?2, updated_at = ?2
             WHERE mailbox_id = ?1 AND deleted_at IS NULL AND provider_message_id IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<Value> = vec![Value::Integer(mailbox_id), Value::Text(now)];
        values.extend(provider_ids.iter().map(|id| Value::Text(id.clone())));

        let conn = self.db.connection().await?;
        let affected = conn.execute(&sql, params_from_iter(values)).await?;
        Ok(affected)
    }

    /// Applies `(old \ removed) ∪ added` to the stored label set, preserving
    /// existing order and appending new labels, then recomputes the derived
    /// read/starred flags. Unknown messages are skipped.
    pub async fn apply_label_delta(
        &self,
        mailbox_id: i64,
        provider_message_id: &str,
        added: &[String],
        removed: &[String],
    ) -> Result<Option<Message>, MessageError> {
        let message = match self.get_by_provider_id(mailbox_id, provider_message_id).await {
            Ok(message) => message,
            Err(MessageError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let labels = merge_labels(&message.labels, added, removed);
        Ok(Some(self.replace_labels(message.id, &labels, None).await?))
    }

    /// Overwrites the label set (and optionally the column binding),
    /// recomputing the derived read/starred flags.
    pub async fn replace_labels(
        &self,
        id: i64,
        labels: &[String],
        column_id: Option<i64>,
    ) -> Result<Message, MessageError> {
        let now = now_rfc3339();
        let labels_json = serde_json::to_string(labels)?;
        let is_read = !labels.iter().any(|l| l == "UNREAD");
        let is_starred = labels.iter().any(|l| l == "STARRED");

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE messages
                     SET labels_json = ?2, is_read = ?3, is_starred = ?4,
                         column_id = COALESCE(?5, column_id), updated_at = ?6
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![id, labels_json, is_read as i64, is_starred as i64, column_id, now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(id.to_string())),
        }
    }

    /// User-facing field updates. Read/starred changes are written through the
    /// label set so the derived flags stay consistent with it.
    pub async fn patch(&self, id: i64, patch: MessagePatch) -> Result<Message, MessageError> {
        let message = self.get_by_id(id).await?;

        let mut labels = message.labels.clone();
        if let Some(is_read) = patch.is_read {
            if is_read {
                labels.retain(|l| l != "UNREAD");
            } else if !labels.iter().any(|l| l == "UNREAD") {
                labels.push("UNREAD".to_string());
            }
        }
        if let Some(is_starred) = patch.is_starred {
            if is_starred {
                if !labels.iter().any(|l| l == "STARRED") {
                    labels.push("STARRED".to_string());
                }
            } else {
                labels.retain(|l| l != "STARRED");
            }
        }

        let now = Utc::now();
        let (is_snoozed, snoozed_until) = match patch.snoozed_until {
            Some(Some(until)) => (until > now, Some(until)),
            Some(None) => (false, None),
            None => (message.is_snoozed, message.snoozed_until),
        };

        let task_status = patch.task_status.unwrap_or(message.task_status);
        let task_deadline = match patch.task_deadline {
            Some(deadline) => deadline,
            None => message.task_deadline,
        };
        let is_pinned = patch.is_pinned.unwrap_or(message.is_pinned);

        let labels_json = serde_json::to_string(&labels)?;
        let is_read = !labels.iter().any(|l| l == "UNREAD");
        let is_starred = labels.iter().any(|l| l == "STARRED");

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE messages
                     SET labels_json = ?2, is_read = ?3, is_starred = ?4, is_pinned = ?5,
                         task_status = ?6, task_deadline = ?7, is_snoozed = ?8, snoozed_until = ?9,
                         updated_at = ?10
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![
                    id,
                    labels_json,
                    is_read as i64,
                    is_starred as i64,
                    is_pinned as i64,
                    task_status.as_str(),
                    task_deadline.map(to_rfc3339),
                    is_snoozed as i64,
                    snoozed_until.map(to_rfc3339),
                    now_rfc3339()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(id.to_string())),
        }
    }

    pub async fn set_summary(
        &self,
        id: i64,
        summary: &str,
    ) -> Result<Message, MessageError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE messages SET ai_summary = ?2, updated_at = ?3
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![id, summary, now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_message(row),
            None => Err(MessageError::NotFound(id.to_string())),
        }
    }

    /// Wakes every snooze whose deadline has passed in one batched update.
    pub async fn wake_due_snoozes(&self, now: DateTime<Utc>) -> Result<u64, MessageError> {
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "UPDATE messages
                 SET is_snoozed = 0, snoozed_until = NULL, updated_at = ?2
                 WHERE is_snoozed = 1 AND snoozed_until <= ?1 AND deleted_at IS NULL",
                params![to_rfc3339(now), now_rfc3339()],
            )
            .await?;
        Ok(affected)
    }

    /// Newest-first messages still missing an embedding.
    pub async fn list_missing_embeddings(
        &self,
        mailbox_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE mailbox_id = ?1 AND deleted_at IS NULL AND embedding IS NULL
                     ORDER BY received_at DESC
                     LIMIT ?2"
                ),
                params![mailbox_id, limit as i64],
            )
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }

    pub async fn store_embedding(&self, id: i64, vector: &[f32]) -> Result<(), MessageError> {
        if vector.len() != EMBEDDING_DIM {
            return Err(MessageError::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual: vector.len(),
            });
        }

        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "UPDATE messages SET embedding = ?2, embedding_generated_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, embedding_to_blob(vector), now],
            )
            .await?;
        if affected == 0 {
            return Err(MessageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// (message id, vector) pairs for semantic scoring, scoped to the user and
    /// optionally to one mailbox.
    pub async fn embeddings_for_user(
        &self,
        user_id: i64,
        mailbox_id: Option<i64>,
    ) -> Result<Vec<(i64, Vec<f32>)>, MessageError> {
        let mut sql = String::from(
            "SELECT m.id, m.embedding FROM messages m
             JOIN mailboxes b ON b.id = m.mailbox_id
             WHERE b.user_id = ?1 AND m.deleted_at IS NULL AND b.deleted_at IS NULL
               AND m.embedding IS NOT NULL",
        );
        let mut values: Vec<Value> = vec![Value::Integer(user_id)];
        if let Some(mailbox_id) = mailbox_id {
            sql.push_str(" AND m.mailbox_id = ?2");
            values.push(Value::Integer(mailbox_id));
        }

        let conn = self.db.connection().await?;
        let mut rows = conn.query(&sql, params_from_iter(values)).await?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            result.push((id, blob_to_embedding(&blob)?));
        }
        Ok(result)
    }

    /// Candidate rows for the fuzzy ranker, scoped like
    /// [`Self::embeddings_for_user`].
    pub async fn search_candidates(
        &self,
        user_id: i64,
        mailbox_id: Option<i64>,
    ) -> Result<Vec<SearchCandidate>, MessageError> {
        let mut sql = String::from(
            "SELECT m.id, m.subject, m.from_name, m.from_email, m.body_text, m.ai_summary, m.labels_json, m.mailbox_id
             FROM messages m
             JOIN mailboxes b ON b.id = m.mailbox_id
             WHERE b.user_id = ?1 AND m.deleted_at IS NULL AND b.deleted_at IS NULL",
        );
        let mut values: Vec<Value> = vec![Value::Integer(user_id)];
        if let Some(mailbox_id) = mailbox_id {
            sql.push_str(" AND m.mailbox_id = ?2");
            values.push(Value::Integer(mailbox_id));
        }

        let conn = self.db.connection().await?;
        let mut rows = conn.query(&sql, params_from_iter(values)).await?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().await? {
            let labels_json: String = row.get(6)?;
            result.push(SearchCandidate {
                id: row.get(0)?,
                subject: row.get(1)?,
                from_name: row.get(2)?,
                from_email: row.get(3)?,
                body_text: row.get(4)?,
                ai_summary: row.get(5)?,
                labels: serde_json::from_str(&labels_json)?,
                mailbox_id: row.get(7)?,
            });
        }
        Ok(result)
    }

    /// Bulk load preserving the order of `ids`.
    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<Message>, MessageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE deleted_at IS NULL AND id IN ({})",
            placeholders.join(", ")
        );
        let values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();

        let conn = self.db.connection().await?;
        let mut rows = conn.query(&sql, params_from_iter(values)).await?;

        let mut by_id = std::collections::HashMap::new();
        while let Some(row) = rows.next().await? {
            let message = row_to_message(row)?;
            by_id.insert(message.id, message);
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Filtered, sorted, paginated listing plus the total row count under the
    /// same predicate.
    pub async fn list(
        &self,
        user_id: i64,
        filter: &MessageListFilter,
    ) -> Result<(Vec<Message>, u64), MessageError> {
        let mut clauses = vec![
            "b.user_id = ?".to_string(),
            "m.deleted_at IS NULL".to_string(),
            "b.deleted_at IS NULL".to_string(),
        ];
        let mut values: Vec<Value> = vec![Value::Integer(user_id)];

        if let Some(mailbox_id) = filter.mailbox_id {
            clauses.push("m.mailbox_id = ?".to_string());
            values.push(Value::Integer(mailbox_id));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push(
                "(m.subject LIKE ? OR m.from_email LIKE ? OR m.from_name LIKE ? OR m.snippet LIKE ?)"
                    .to_string(),
            );
            let needle = format!("%{}%", search.trim());
            for _ in 0..4 {
                values.push(Value::Text(needle.clone()));
            }
        }
        if let Some(is_read) = filter.is_read {
            clauses.push("m.is_read = ?".to_string());
            values.push(Value::Integer(is_read as i64));
        }
        if let Some(is_starred) = filter.is_starred {
            clauses.push("m.is_starred = ?".to_string());
            values.push(Value::Integer(is_starred as i64));
        }
        if let Some(has_attachments) = filter.has_attachments {
            clauses.push("m.has_attachments = ?".to_string());
            values.push(Value::Integer(has_attachments as i64));
        }
        if let Some(category) = filter.category {
            clauses.push("m.category = ?".to_string());
            values.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(task_status) = filter.task_status {
            clauses.push("m.task_status = ?".to_string());
            values.push(Value::Text(task_status.as_str().to_string()));
        }
        if let Some(from_email) = filter.from_email.as_deref() {
            clauses.push("m.from_email = ?".to_string());
            values.push(Value::Text(from_email.to_string()));
        }
        if let Some(label) = filter.label.as_deref() {
            clauses.push(
                "EXISTS (SELECT 1 FROM json_each(m.labels_json) WHERE json_each.value = ?)"
                    .to_string(),
            );
            values.push(Value::Text(label.to_string()));
        }
        if let Some(exclude_label) = filter.exclude_label.as_deref() {
            clauses.push(
                "NOT EXISTS (SELECT 1 FROM json_each(m.labels_json) WHERE json_each.value = ?)"
                    .to_string(),
            );
            values.push(Value::Text(exclude_label.to_string()));
        }
        if let Some(is_snoozed) = filter.is_snoozed {
            clauses.push("m.is_snoozed = ?".to_string());
            values.push(Value::Integer(is_snoozed as i64));
        }

        let where_sql = renumber_placeholders(&clauses.join(" AND "));
        let order_column = match filter.sort_by {
            SortBy::ReceivedAt => "m.received_at",
            SortBy::Subject => "m.subject",
            SortBy::FromEmail => "m.from_email",
        };
        let order_dir = match filter.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let limit = filter.limit.clamp(1, 100) as i64;
        let page = filter.page.max(1) as i64;
        let offset = (page - 1) * limit;

        let conn = self.db.connection().await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM messages m JOIN mailboxes b ON b.id = m.mailbox_id WHERE {where_sql}"
        );
        let mut rows = conn
            .query(&count_sql, params_from_iter(values.clone()))
            .await?;
        let total: i64 = rows
            .next()
            .await?
            .ok_or_else(|| MessageError::InvalidValue("count".into()))?
            .get(0)?;

        let columns = prefixed_columns("m");
        let list_sql = format!(
            "SELECT {columns} FROM messages m JOIN mailboxes b ON b.id = m.mailbox_id
             WHERE {where_sql}
             ORDER BY {order_column} {order_dir}, m.id ASC
             LIMIT {limit} OFFSET {offset}"
        );
        let mut rows = conn.query(&list_sql, params_from_iter(values)).await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(row_to_message(row)?);
        }
        Ok((messages, total as u64))
    }

    /// Per-label (total, unread) counts for one mailbox.
    pub async fn label_counts(
        &self,
        mailbox_id: i64,
        label: &str,
    ) -> Result<(i64, i64), MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(is_read = 0), 0) FROM messages
                 WHERE mailbox_id = ?1 AND deleted_at IS NULL
                   AND EXISTS (SELECT 1 FROM json_each(messages.labels_json) WHERE json_each.value = ?2)",
                params![mailbox_id, label],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| MessageError::InvalidValue("label count".into()))?;
        Ok((row.get(0)?, row.get(1)?))
    }

    /// Distinct sender contacts for suggestion ranking.
    pub async fn sender_contacts(&self, user_id: i64) -> Result<Vec<(Option<String>, String)>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT m.from_name, m.from_email FROM messages m
                 JOIN mailboxes b ON b.id = m.mailbox_id
                 WHERE b.user_id = ?1 AND m.deleted_at IS NULL AND b.deleted_at IS NULL
                   AND m.from_email != ''",
                params![user_id],
            )
            .await?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await? {
            contacts.push((row.get(0)?, row.get(1)?));
        }
        Ok(contacts)
    }

    /// Non-null subjects for suggestion keyword ranking.
    pub async fn subjects(&self, user_id: i64) -> Result<Vec<String>, MessageError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT m.subject FROM messages m
                 JOIN mailboxes b ON b.id = m.mailbox_id
                 WHERE b.user_id = ?1 AND m.deleted_at IS NULL AND b.deleted_at IS NULL
                   AND m.subject IS NOT NULL",
                params![user_id],
            )
            .await?;

        let mut subjects = Vec::new();
        while let Some(row) = rows.next().await? {
            subjects.push(row.get(0)?);
        }
        Ok(subjects)
    }
}

/// `(old \ removed) ∪ added`, deduplicated, old order preserved, additions
/// appended in their own order.
pub fn merge_labels(old: &[String], added: &[String], removed: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = old
        .iter()
        .filter(|label| !removed.contains(label))
        .cloned()
        .collect();
    for label in added {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

pub(crate) fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, MessageError> {
    if blob.len() % 4 != 0 {
        return Err(MessageError::InvalidValue("embedding blob length".into()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn prefixed_columns(alias: &str) -> String {
    MESSAGE_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrites anonymous `?` placeholders into the numbered form libsql expects.
fn renumber_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    for ch in sql.chars() {
        if ch == '?' {
            index += 1;
            result.push('?');
            result.push_str(&index.to_string());
        } else {
            result.push(ch);
        }
    }
    result
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_message(row: Row) -> Result<Message, MessageError> {
    let to_json: String = row.get(8)?;
    let cc_json: String = row.get(9)?;
    let bcc_json: String = row.get(10)?;
    let received_at: String = row.get(13)?;
    let is_read: i64 = row.get(14)?;
    let is_starred: i64 = row.get(15)?;
    let has_attachments: i64 = row.get(16)?;
    let labels_json: String = row.get(17)?;
    let category: String = row.get(18)?;
    let task_status: String = row.get(19)?;
    let task_deadline: Option<String> = row.get(20)?;
    let is_pinned: i64 = row.get(21)?;
    let is_snoozed: i64 = row.get(22)?;
    let snoozed_until: Option<String> = row.get(23)?;
    let ai_action_items_json: Option<String> = row.get(25)?;
    let embedding: Option<Vec<u8>> = row.get(28)?;
    let embedding_generated_at: Option<String> = row.get(29)?;
    let created_at: String = row.get(30)?;
    let updated_at: String = row.get(31)?;

    Ok(Message {
        id: row.get(0)?,
        mailbox_id: row.get(1)?,
        provider_message_id: row.get(2)?,
        provider_thread_id: row.get(3)?,
        subject: row.get(4)?,
        snippet: row.get(5)?,
        from_email: row.get(6)?,
        from_name: row.get(7)?,
        to: serde_json::from_str(&to_json)?,
        cc: serde_json::from_str(&cc_json)?,
        bcc: serde_json::from_str(&bcc_json)?,
        body_html: row.get(11)?,
        body_text: row.get(12)?,
        received_at: DateTime::parse_from_rfc3339(&received_at)?.with_timezone(&Utc),
        is_read: is_read != 0,
        is_starred: is_starred != 0,
        has_attachments: has_attachments != 0,
        labels: serde_json::from_str(&labels_json)?,
        category: Category::from_str(&category).ok_or(MessageError::InvalidValue(category))?,
        task_status: TaskStatus::from_str(&task_status)
            .ok_or(MessageError::InvalidValue(task_status))?,
        task_deadline: parse_optional_datetime(task_deadline)?,
        is_pinned: is_pinned != 0,
        is_snoozed: is_snoozed != 0,
        snoozed_until: parse_optional_datetime(snoozed_until)?,
        ai_summary: row.get(24)?,
        ai_action_items: ai_action_items_json
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        urgency_score: row.get(26)?,
        column_id: row.get(27)?,
        embedding: embedding.map(|blob| blob_to_embedding(&blob)).transpose()?,
        embedding_generated_at: parse_optional_datetime(embedding_generated_at)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

fn parse_optional_datetime(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, MessageError> {
    match value {
        Some(value) => Ok(Some(
            DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc),
        )),
        None => Ok(None),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::mailboxes::test_support::{seed_mailbox, seed_user, setup_db};
    use chrono::Duration;

    #[tokio::test]
    async fn ingest_creates_message_with_derived_fields() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let mut parsed = sample_parsed("m1");
        parsed.labels = vec![
            "INBOX".into(),
            "UNREAD".into(),
            "CATEGORY_PROMOTIONS".into(),
        ];
        parsed.subject = Some("50% off".into());

        let message = repo.ingest(mailbox.id, &parsed).await.expect("ingest");

        assert_eq!(message.category, Category::Promotions);
        assert!(!message.is_read);
        assert!(!message.is_starred);
        assert!(!message.has_attachments);
        assert_eq!(message.task_status, TaskStatus::None);
    }

    #[tokio::test]
    async fn ingest_twice_keeps_single_row() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let parsed = sample_parsed("m1");
        let first = repo.ingest(mailbox.id, &parsed).await.expect("first");

        let mut updated = parsed.clone();
        updated.subject = Some("Updated".into());
        updated.labels = vec!["INBOX".into(), "STARRED".into()];
        updated.is_read = true;
        updated.is_starred = true;
        let second = repo.ingest(mailbox.id, &updated).await.expect("second");

        assert_eq!(first.id, second.id, "upsert keeps the row");
        assert_eq!(second.subject.as_deref(), Some("Updated"));
        assert!(second.is_read);
        assert!(second.is_starred);

        let (_, total) = repo
            .list(user_id, &MessageListFilter {
                limit: 50,
                page: 1,
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn ingest_inserts_attachments_once() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let parsed = parsed_with_attachment("m1");
        let message = repo.ingest(mailbox.id, &parsed).await.expect("first");
        assert!(message.has_attachments);

        let again = repo.ingest(mailbox.id, &parsed).await.expect("second");
        assert!(again.has_attachments);

        let conn = db.connection().await.expect("conn");
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM attachments WHERE message_id = ?1",
                params![message.id],
            )
            .await
            .expect("query");
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1, "attachments are not re-inserted");
    }

    #[tokio::test]
    async fn apply_label_delta_preserves_order_and_derives_flags() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let mut parsed = sample_parsed("m1");
        parsed.labels = vec![
            "INBOX".into(),
            "UNREAD".into(),
            "CATEGORY_PROMOTIONS".into(),
        ];
        repo.ingest(mailbox.id, &parsed).await.expect("ingest");

        let updated = repo
            .apply_label_delta(
                mailbox.id,
                "m1",
                &["STARRED".to_string()],
                &["UNREAD".to_string()],
            )
            .await
            .expect("apply delta")
            .expect("message known");

        assert_eq!(
            updated.labels,
            vec!["INBOX", "CATEGORY_PROMOTIONS", "STARRED"]
        );
        assert!(updated.is_read);
        assert!(updated.is_starred);
        assert_eq!(
            updated.category,
            Category::Promotions,
            "category derives at ingest only"
        );
    }

    #[tokio::test]
    async fn apply_label_delta_skips_unknown_messages() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let result = repo
            .apply_label_delta(mailbox.id, "ghost", &["STARRED".to_string()], &[])
            .await
            .expect("delta on unknown message");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn batch_soft_delete_by_provider_ids() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        for id in ["m1", "m2", "m3"] {
            repo.ingest(mailbox.id, &sample_parsed(id)).await.expect("ingest");
        }

        let deleted = repo
            .soft_delete_by_provider_ids(mailbox.id, &["m1".to_string(), "m3".to_string()])
            .await
            .expect("batch delete");
        assert_eq!(deleted, 2);

        assert!(repo.get_by_provider_id(mailbox.id, "m2").await.is_ok());
        assert!(matches!(
            repo.get_by_provider_id(mailbox.id, "m1").await,
            Err(MessageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn patch_updates_labels_with_read_and_star_changes() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let message = repo
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");
        assert!(message.labels.iter().any(|l| l == "UNREAD"));

        let patched = repo
            .patch(
                message.id,
                MessagePatch {
                    is_read: Some(true),
                    is_starred: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("patch");

        assert!(patched.is_read);
        assert!(patched.is_starred);
        assert!(!patched.labels.iter().any(|l| l == "UNREAD"));
        assert!(patched.labels.iter().any(|l| l == "STARRED"));
    }

    #[tokio::test]
    async fn patch_snooze_respects_deadline_invariant() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());
        let message = repo
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        let future = Utc::now() + Duration::hours(2);
        let snoozed = repo
            .patch(
                message.id,
                MessagePatch {
                    snoozed_until: Some(Some(future)),
                    ..Default::default()
                },
            )
            .await
            .expect("snooze");
        assert!(snoozed.is_snoozed);
        assert!(snoozed.snoozed_until.is_some());

        let unsnoozed = repo
            .patch(
                message.id,
                MessagePatch {
                    snoozed_until: Some(None),
                    ..Default::default()
                },
            )
            .await
            .expect("unsnooze");
        assert!(!unsnoozed.is_snoozed);
        assert!(unsnoozed.snoozed_until.is_none());

        let past = Utc::now() - Duration::hours(1);
        let stale = repo
            .patch(
                message.id,
                MessagePatch {
                    snoozed_until: Some(Some(past)),
                    ..Default::default()
                },
            )
            .await
            .expect("past snooze");
        assert!(!stale.is_snoozed, "past deadline does not snooze");
    }

    #[tokio::test]
    async fn wake_due_snoozes_is_batched_and_idempotent() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let due = repo
            .ingest(mailbox.id, &sample_parsed("due"))
            .await
            .expect("ingest");
        let held = repo
            .ingest(mailbox.id, &sample_parsed("held"))
            .await
            .expect("ingest");

        repo.patch(
            due.id,
            MessagePatch {
                snoozed_until: Some(Some(Utc::now() + Duration::milliseconds(1))),
                ..Default::default()
            },
        )
        .await
        .expect("snooze due");
        repo.patch(
            held.id,
            MessagePatch {
                snoozed_until: Some(Some(Utc::now() + Duration::hours(4))),
                ..Default::default()
            },
        )
        .await
        .expect("snooze held");

        let wake_time = Utc::now() + Duration::seconds(1);
        let woken = repo.wake_due_snoozes(wake_time).await.expect("wake");
        assert_eq!(woken, 1);

        let reloaded = repo.get_by_id(due.id).await.expect("reload");
        assert!(!reloaded.is_snoozed);
        assert!(reloaded.snoozed_until.is_none());

        let still_held = repo.get_by_id(held.id).await.expect("reload held");
        assert!(still_held.is_snoozed);

        let second = repo.wake_due_snoozes(wake_time).await.expect("second wake");
        assert_eq!(second, 0, "second run is a no-op");
    }

    #[tokio::test]
    async fn embedding_round_trip_and_dimension_check() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());
        let message = repo
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        let err = repo
            .store_embedding(message.id, &[0.5; 3])
            .await
            .expect_err("wrong dimension");
        assert!(matches!(
            err,
            MessageError::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual: 3
            }
        ));

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        vector[0] = 1.0;
        vector[767] = -0.25;
        repo.store_embedding(message.id, &vector)
            .await
            .expect("store embedding");

        let stored = repo.get_by_id(message.id).await.expect("reload");
        let embedding = stored.embedding.expect("embedding present");
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert_eq!(embedding[0], 1.0);
        assert_eq!(embedding[767], -0.25);
        assert!(stored.embedding_generated_at.is_some());

        let pending = repo
            .list_missing_embeddings(mailbox.id, 10)
            .await
            .expect("missing");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_label_membership() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let mut inboxed = sample_parsed("m1");
        inboxed.labels = vec!["INBOX".into(), "UNREAD".into()];
        repo.ingest(mailbox.id, &inboxed).await.expect("ingest");

        let mut archived = sample_parsed("m2");
        archived.labels = vec!["UNREAD".into()];
        repo.ingest(mailbox.id, &archived).await.expect("ingest");

        let (rows, total) = repo
            .list(
                user_id,
                &MessageListFilter {
                    label: Some("INBOX".into()),
                    page: 1,
                    limit: 50,
                    ..Default::default()
                },
            )
            .await
            .expect("list by label");
        assert_eq!(total, 1);
        assert_eq!(rows[0].provider_message_id, "m1");

        let (rows, total) = repo
            .list(
                user_id,
                &MessageListFilter {
                    exclude_label: Some("INBOX".into()),
                    page: 1,
                    limit: 50,
                    ..Default::default()
                },
            )
            .await
            .expect("list excluding label");
        assert_eq!(total, 1);
        assert_eq!(rows[0].provider_message_id, "m2");
    }

    #[tokio::test]
    async fn list_sorts_and_paginates() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        for (id, subject, offset) in [
            ("m1", "Alpha", 3),
            ("m2", "Bravo", 2),
            ("m3", "Charlie", 1),
        ] {
            let mut parsed = sample_parsed(id);
            parsed.subject = Some(subject.into());
            parsed.received_at = Utc::now() - Duration::hours(offset);
            repo.ingest(mailbox.id, &parsed).await.expect("ingest");
        }

        let (rows, total) = repo
            .list(
                user_id,
                &MessageListFilter {
                    sort_by: SortBy::ReceivedAt,
                    sort_order: SortOrder::Desc,
                    page: 1,
                    limit: 2,
                    ..Default::default()
                },
            )
            .await
            .expect("page 1");
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].provider_message_id, "m3", "newest first");

        let (rows, _) = repo
            .list(
                user_id,
                &MessageListFilter {
                    sort_by: SortBy::Subject,
                    sort_order: SortOrder::Asc,
                    page: 1,
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .expect("by subject");
        assert_eq!(rows[0].subject.as_deref(), Some("Alpha"));
    }

    #[tokio::test]
    async fn label_counts_use_membership() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let repo = MessageRepository::new(db.clone());

        let mut unread_inbox = sample_parsed("m1");
        unread_inbox.labels = vec!["INBOX".into(), "UNREAD".into()];
        repo.ingest(mailbox.id, &unread_inbox).await.expect("ingest");

        let mut read_inbox = sample_parsed("m2");
        read_inbox.labels = vec!["INBOX".into()];
        read_inbox.is_read = true;
        repo.ingest(mailbox.id, &read_inbox).await.expect("ingest");

        let mut spam = sample_parsed("m3");
        spam.labels = vec!["SPAM".into(), "UNREAD".into()];
        repo.ingest(mailbox.id, &spam).await.expect("ingest");

        let (total, unread) = repo
            .label_counts(mailbox.id, "INBOX")
            .await
            .expect("counts");
        assert_eq!(total, 2);
        assert_eq!(unread, 1);

        let (total, unread) = repo.label_counts(mailbox.id, "SPAM").await.expect("counts");
        assert_eq!(total, 1);
        assert_eq!(unread, 1);
    }

    #[tokio::test]
    async fn ownership_check_hides_foreign_messages() {
        let (db, _dir) = setup_db().await;
        let owner = seed_user(&db).await;
        let stranger = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, owner).await;
        let repo = MessageRepository::new(db.clone());

        let message = repo
            .ingest(mailbox.id, &sample_parsed("m1"))
            .await
            .expect("ingest");

        repo.get_owned(owner, message.id).await.expect("owner sees it");
        let err = repo
            .get_owned(stranger, message.id)
            .await
            .expect_err("stranger gets not-found");
        assert!(matches!(err, MessageError::NotFound(_)));
    }

    #[test]
    fn merge_labels_dedupes_and_preserves_order() {
        let old = vec!["INBOX".to_string(), "UNREAD".to_string()];
        let merged = merge_labels(
            &old,
            &["STARRED".to_string(), "INBOX".to_string()],
            &["UNREAD".to_string()],
        );
        assert_eq!(merged, vec!["INBOX", "STARRED"]);
    }

    #[test]
    fn category_derivation_from_labels() {
        let labels = |l: &str| vec!["INBOX".to_string(), l.to_string()];
        assert_eq!(
            Category::from_labels(&labels("CATEGORY_SOCIAL")),
            Category::Social
        );
        assert_eq!(
            Category::from_labels(&labels("CATEGORY_PROMOTIONS")),
            Category::Promotions
        );
        assert_eq!(
            Category::from_labels(&labels("CATEGORY_UPDATES")),
            Category::Updates
        );
        assert_eq!(
            Category::from_labels(&labels("CATEGORY_FORUMS")),
            Category::Forums
        );
        assert_eq!(
            Category::from_labels(&["INBOX".to_string()]),
            Category::Primary
        );
    }
}
