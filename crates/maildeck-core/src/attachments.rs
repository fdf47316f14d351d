use chrono::{DateTime, Utc};
use libsql::{Row, params};
use thiserror::Error;

use crate::db::{Database, StoreError};

const ATTACHMENT_COLUMNS: &str =
    "id, message_id, provider_attachment_id, filename, mime_type, size, content_id, is_inline, created_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("attachment not found: {0}")]
    NotFound(i64),
}

#[derive(Clone)]
pub struct AttachmentRepository {
    db: Database,
}

impl AttachmentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_for_message(
        &self,
        message_id: i64,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = ?1 ORDER BY id"
                ),
                params![message_id],
            )
            .await?;

        let mut attachments = Vec::new();
        while let Some(row) = rows.next().await? {
            attachments.push(row_to_attachment(row)?);
        }
        Ok(attachments)
    }

    /// Ownership-checked lookup through message and mailbox.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Attachment, AttachmentError> {
        let conn = self.db.connection().await?;
        let columns = ATTACHMENT_COLUMNS
            .split(", ")
            .map(|col| format!("a.{col}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {columns} FROM attachments a
                     JOIN messages m ON m.id = a.message_id
                     JOIN mailboxes b ON b.id = m.mailbox_id
                     WHERE a.id = ?1 AND b.user_id = ?2
                       AND m.deleted_at IS NULL AND b.deleted_at IS NULL"
                ),
                params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_attachment(row),
            None => Err(AttachmentError::NotFound(id)),
        }
    }
}

fn row_to_attachment(row: Row) -> Result<Attachment, AttachmentError> {
    let is_inline: i64 = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(Attachment {
        id: row.get(0)?,
        message_id: row.get(1)?,
        provider_attachment_id: row.get(2)?,
        filename: row.get(3)?,
        mime_type: row.get(4)?,
        size: row.get(5)?,
        content_id: row.get(6)?,
        is_inline: is_inline != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailboxes::test_support::{seed_mailbox, seed_user, setup_db};
    use crate::messages::MessageRepository;
    use crate::messages::test_support::parsed_with_attachment;

    #[tokio::test]
    async fn lists_attachments_for_message() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, user_id).await;
        let messages = MessageRepository::new(db.clone());
        let attachments = AttachmentRepository::new(db.clone());

        let message = messages
            .ingest(mailbox.id, &parsed_with_attachment("m1"))
            .await
            .expect("ingest");

        let listed = attachments
            .list_for_message(message.id)
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "invoice.pdf");
        assert_eq!(listed[0].provider_attachment_id, "att-1");
        assert!(!listed[0].is_inline);
    }

    #[tokio::test]
    async fn get_owned_enforces_ownership() {
        let (db, _dir) = setup_db().await;
        let owner = seed_user(&db).await;
        let stranger = seed_user(&db).await;
        let mailbox = seed_mailbox(&db, owner).await;
        let messages = MessageRepository::new(db.clone());
        let attachments = AttachmentRepository::new(db.clone());

        let message = messages
            .ingest(mailbox.id, &parsed_with_attachment("m1"))
            .await
            .expect("ingest");
        let listed = attachments
            .list_for_message(message.id)
            .await
            .expect("list");
        let attachment_id = listed[0].id;

        attachments
            .get_owned(owner, attachment_id)
            .await
            .expect("owner fetches attachment");
        let err = attachments
            .get_owned(stranger, attachment_id)
            .await
            .expect_err("stranger is denied");
        assert!(matches!(err, AttachmentError::NotFound(_)));
    }
}
