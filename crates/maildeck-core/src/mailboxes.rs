use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;

use crate::db::{Database, StoreError};
use crate::gmail::oauth::OAuthTokens;
use crate::secrets::{SecretBox, SecretBoxError};
use crate::users::is_unique_violation;

const MAILBOX_COLUMNS: &str = "id, user_id, provider, email, access_token_enc, refresh_token_enc, token_expires_at, sync_status, last_sync_at, last_sync_error, history_cursor, total_emails, unread_count, is_active, created_at, updated_at, deleted_at";

/// Synchronization lifecycle of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "synced" => Some(SyncStatus::Synced),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub email: String,
    /// Tokens are stored encrypted; this view is already decrypted.
    pub tokens: OAuthTokens,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub history_cursor: Option<String>,
    pub total_emails: i64,
    pub unread_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("mailbox not found: {0}")]
    NotFound(i64),
    #[error("mailbox already connected: {0}")]
    Duplicate(String),
    #[error("token encryption error: {0}")]
    Crypto(#[from] SecretBoxError),
    #[error("optimistic locking conflict for mailbox {0}")]
    Conflict(i64),
    #[error("invalid sync status value {0}")]
    InvalidStatus(String),
}

/// Store access for mailboxes. Owns the secret box so provider tokens never
/// touch the database in the clear.
#[derive(Clone)]
pub struct MailboxRepository {
    db: Database,
    secrets: Arc<SecretBox>,
}

impl MailboxRepository {
    pub fn new(db: Database, secrets: Arc<SecretBox>) -> Self {
        Self { db, secrets }
    }

    pub async fn create(
        &self,
        user_id: i64,
        email: &str,
        tokens: OAuthTokens,
    ) -> Result<Mailbox, MailboxError> {
        let now = now_rfc3339();
        let access_enc = self.secrets.encrypt(&tokens.access_token)?;
        let refresh_enc = self.secrets.encrypt(&tokens.refresh_token)?;
        let expires = to_rfc3339(tokens.expires_at);

        let conn = self.db.connection().await?;
        let result = conn
            .query(
                &format!(
                    "INSERT INTO mailboxes (user_id, provider, email, access_token_enc, refresh_token_enc, token_expires_at, sync_status, created_at, updated_at)
                     VALUES (?1, 'gmail', ?2, ?3, ?4, ?5, 'pending', ?6, ?6)
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![user_id, email, access_enc, refresh_enc, expires, now],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => {
                return Err(MailboxError::Duplicate(email.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        match rows.next().await? {
            Some(row) => self.row_to_mailbox(row),
            None => Err(MailboxError::NotFound(user_id)),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Mailbox, MailboxError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE id = ?1 AND deleted_at IS NULL"
                ),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => self.row_to_mailbox(row),
            None => Err(MailboxError::NotFound(id)),
        }
    }

    /// Ownership-checked lookup. A mailbox belonging to someone else is
    /// indistinguishable from a missing one.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Mailbox, MailboxError> {
        let mailbox = self.get_by_id(id).await?;
        if mailbox.user_id != user_id {
            return Err(MailboxError::NotFound(id));
        }
        Ok(mailbox)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Mailbox>, MailboxError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAILBOX_COLUMNS} FROM mailboxes
                     WHERE user_id = ?1 AND deleted_at IS NULL
                     ORDER BY created_at"
                ),
                params![user_id],
            )
            .await?;

        let mut mailboxes = Vec::new();
        while let Some(row) = rows.next().await? {
            mailboxes.push(self.row_to_mailbox(row)?);
        }
        Ok(mailboxes)
    }

    /// Active, non-deleted mailboxes, the working set for every timer.
    pub async fn list_active(&self) -> Result<Vec<Mailbox>, MailboxError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAILBOX_COLUMNS} FROM mailboxes
                     WHERE is_active = 1 AND deleted_at IS NULL
                     ORDER BY id"
                ),
                (),
            )
            .await?;

        let mut mailboxes = Vec::new();
        while let Some(row) = rows.next().await? {
            mailboxes.push(self.row_to_mailbox(row)?);
        }
        Ok(mailboxes)
    }

    /// Active mailboxes whose access token expires inside `horizon`.
    pub async fn list_needing_refresh(
        &self,
        horizon: Duration,
    ) -> Result<Vec<Mailbox>, MailboxError> {
        let cutoff = to_rfc3339(Utc::now() + horizon);
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAILBOX_COLUMNS} FROM mailboxes
                     WHERE is_active = 1 AND deleted_at IS NULL AND token_expires_at <= ?1
                     ORDER BY id"
                ),
                params![cutoff],
            )
            .await?;

        let mut mailboxes = Vec::new();
        while let Some(row) = rows.next().await? {
            mailboxes.push(self.row_to_mailbox(row)?);
        }
        Ok(mailboxes)
    }

    pub async fn mark_syncing(&self, id: i64) -> Result<Mailbox, MailboxError> {
        self.update_status(id, SyncStatus::Syncing, None, None, false)
            .await
    }

    /// Successful sync: status synced, error cleared, cursor advanced.
    pub async fn mark_synced(
        &self,
        id: i64,
        history_cursor: Option<String>,
    ) -> Result<Mailbox, MailboxError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE mailboxes
                     SET sync_status = 'synced', last_sync_at = ?2, last_sync_error = NULL,
                         history_cursor = COALESCE(?3, history_cursor), updated_at = ?2
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![id, now, history_cursor],
            )
            .await?;

        match rows.next().await? {
            Some(row) => self.row_to_mailbox(row),
            None => Err(MailboxError::NotFound(id)),
        }
    }

    pub async fn mark_error(&self, id: i64, message: &str) -> Result<Mailbox, MailboxError> {
        self.update_status(id, SyncStatus::Error, Some(message.to_string()), None, false)
            .await
    }

    /// Stale-cursor recovery: drop the cursor and fall back to pending so the
    /// next attempt runs a full sync.
    pub async fn reset_for_full_sync(&self, id: i64) -> Result<Mailbox, MailboxError> {
        self.update_status(id, SyncStatus::Pending, None, None, true)
            .await
    }

    async fn update_status(
        &self,
        id: i64,
        status: SyncStatus,
        error: Option<String>,
        cursor: Option<String>,
        clear_cursor: bool,
    ) -> Result<Mailbox, MailboxError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = if clear_cursor {
            conn.query(
                &format!(
                    "UPDATE mailboxes
                     SET sync_status = ?2, last_sync_error = ?3, history_cursor = NULL, updated_at = ?4
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![id, status.as_str(), error, now],
            )
            .await?
        } else {
            conn.query(
                &format!(
                    "UPDATE mailboxes
                     SET sync_status = ?2, last_sync_error = ?3,
                         history_cursor = COALESCE(?5, history_cursor), updated_at = ?4
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![id, status.as_str(), error, now, cursor],
            )
            .await?
        };

        match rows.next().await? {
            Some(row) => self.row_to_mailbox(row),
            None => Err(MailboxError::NotFound(id)),
        }
    }

    /// Persist refreshed tokens. When `expected_updated_at` is supplied the
    /// write only lands if nobody refreshed concurrently.
    pub async fn update_tokens(
        &self,
        id: i64,
        tokens: &OAuthTokens,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<Mailbox, MailboxError> {
        let now = now_rfc3339();
        let access_enc = self.secrets.encrypt(&tokens.access_token)?;
        let refresh_enc = self.secrets.encrypt(&tokens.refresh_token)?;
        let expires = to_rfc3339(tokens.expires_at);
        let conn = self.db.connection().await?;

        let mut rows = if let Some(expected) = expected_updated_at {
            conn.query(
                &format!(
                    "UPDATE mailboxes
                     SET access_token_enc = ?2, refresh_token_enc = ?3, token_expires_at = ?4, updated_at = ?5
                     WHERE id = ?1 AND updated_at = ?6 AND deleted_at IS NULL
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![id, access_enc, refresh_enc, expires, now, to_rfc3339(expected)],
            )
            .await?
        } else {
            conn.query(
                &format!(
                    "UPDATE mailboxes
                     SET access_token_enc = ?2, refresh_token_enc = ?3, token_expires_at = ?4, updated_at = ?5
                     WHERE id = ?1 AND deleted_at IS NULL
                     RETURNING {MAILBOX_COLUMNS}"
                ),
                params![id, access_enc, refresh_enc, expires, now],
            )
            .await?
        };

        match rows.next().await? {
            Some(row) => self.row_to_mailbox(row),
            None => match expected_updated_at {
                Some(_) => Err(MailboxError::Conflict(id)),
                None => Err(MailboxError::NotFound(id)),
            },
        }
    }

    /// Counters are recomputed from non-deleted rows, never incremented, so
    /// retried ingestion batches cannot skew them.
    pub async fn recount(&self, id: i64) -> Result<(), MailboxError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "UPDATE mailboxes
                 SET total_emails = (SELECT COUNT(*) FROM messages WHERE mailbox_id = ?1 AND deleted_at IS NULL),
                     unread_count = (SELECT COUNT(*) FROM messages WHERE mailbox_id = ?1 AND deleted_at IS NULL AND is_read = 0),
                     updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )
            .await?;
        if affected == 0 {
            return Err(MailboxError::NotFound(id));
        }
        Ok(())
    }

    pub async fn soft_delete(&self, id: i64) -> Result<(), MailboxError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let affected = conn
            .execute(
                "UPDATE mailboxes SET deleted_at = ?2, is_active = 0, updated_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, now],
            )
            .await?;
        if affected == 0 {
            return Err(MailboxError::NotFound(id));
        }
        Ok(())
    }

    /// Watchdog: any mailbox stuck in `syncing` longer than `threshold` is
    /// forced back to `synced` so the next tick can try again.
    pub async fn reset_stuck_syncing(&self, threshold: Duration) -> Result<Vec<i64>, MailboxError> {
        let cutoff = to_rfc3339(Utc::now() - threshold);
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "UPDATE mailboxes SET sync_status = 'synced', updated_at = ?2
                 WHERE sync_status = 'syncing' AND updated_at < ?1 AND deleted_at IS NULL
                 RETURNING id",
                params![cutoff, now],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        Ok(ids)
    }

    fn row_to_mailbox(&self, row: Row) -> Result<Mailbox, MailboxError> {
        let access_enc: String = row.get(4)?;
        let refresh_enc: String = row.get(5)?;
        let token_expires_at: Option<String> = row.get(6)?;
        let sync_status: String = row.get(7)?;
        let last_sync_at: Option<String> = row.get(8)?;
        let is_active: i64 = row.get(13)?;
        let created_at: String = row.get(14)?;
        let updated_at: String = row.get(15)?;

        let expires_at = match token_expires_at {
            Some(value) => DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(Mailbox {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            email: row.get(3)?,
            tokens: OAuthTokens {
                access_token: self.secrets.decrypt(&access_enc)?,
                refresh_token: self.secrets.decrypt(&refresh_enc)?,
                expires_at,
            },
            sync_status: SyncStatus::from_str(&sync_status)
                .ok_or(MailboxError::InvalidStatus(sync_status))?,
            last_sync_at: match last_sync_at {
                Some(value) => Some(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc)),
                None => None,
            },
            last_sync_error: row.get(9)?,
            history_cursor: row.get(10)?,
            total_emails: row.get(11)?,
            unread_count: row.get(12)?,
            is_active: is_active != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        })
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::users::{AuthProvider, UserRepository};
    use tempfile::TempDir;

    pub const TEST_KEY: &str = "9f3c1a6b8e2d4075a1c9e8f7b6d5c4a3928170695e4d3c2b1a0f9e8d7c6b5a40";

    pub fn test_secrets() -> Arc<SecretBox> {
        Arc::new(SecretBox::from_hex_key(TEST_KEY).expect("valid key"))
    }

    pub fn sample_tokens(expires_in: Duration) -> OAuthTokens {
        OAuthTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + expires_in,
        }
    }

    pub async fn setup_db() -> (Database, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_name = format!("db_{}.sqlite", uuid::Uuid::new_v4());
        let db_path = dir.path().join(db_name);
        let db = Database::open(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");
        (db, dir)
    }

    pub async fn seed_user(db: &Database) -> i64 {
        let repo = UserRepository::new(db.clone());
        repo.create(
            &format!("user-{}@example.com", uuid::Uuid::new_v4()),
            "Test",
            "User",
            AuthProvider::External,
            None,
        )
        .await
        .expect("create user")
        .id
    }

    pub async fn seed_mailbox(db: &Database, user_id: i64) -> Mailbox {
        let repo = MailboxRepository::new(db.clone(), test_secrets());
        repo.create(user_id, "inbox@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("create mailbox")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use libsql::params;

    #[tokio::test]
    async fn create_encrypts_tokens_at_rest() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());

        let mailbox = repo
            .create(user_id, "inbox@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("create mailbox");

        assert_eq!(mailbox.sync_status, SyncStatus::Pending);
        assert_eq!(mailbox.tokens.access_token, "access");

        let conn = db.connection().await.expect("conn");
        let mut rows = conn
            .query(
                "SELECT access_token_enc FROM mailboxes WHERE id = ?1",
                params![mailbox.id],
            )
            .await
            .expect("query");
        let stored: String = rows
            .next()
            .await
            .expect("row")
            .expect("row value")
            .get(0)
            .expect("value");
        assert_ne!(stored, "access", "token must not be stored in the clear");
        assert_eq!(stored.split(':').count(), 3, "secret box envelope");
    }

    #[tokio::test]
    async fn duplicate_mailbox_conflicts_case_insensitively() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());

        repo.create(user_id, "inbox@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("first create");
        let err = repo
            .create(user_id, "INBOX@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect_err("duplicate should conflict");
        assert!(matches!(err, MailboxError::Duplicate(_)));
    }

    #[tokio::test]
    async fn soft_deleted_mailbox_frees_the_email() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());

        let mailbox = repo
            .create(user_id, "inbox@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("create");
        repo.soft_delete(mailbox.id).await.expect("soft delete");

        let err = repo
            .get_by_id(mailbox.id)
            .await
            .expect_err("deleted is hidden");
        assert!(matches!(err, MailboxError::NotFound(_)));

        repo.create(user_id, "inbox@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("email reusable after delete");
    }

    #[tokio::test]
    async fn status_transitions_update_fields() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());
        let mailbox = seed_mailbox(&db, user_id).await;

        let syncing = repo.mark_syncing(mailbox.id).await.expect("mark syncing");
        assert_eq!(syncing.sync_status, SyncStatus::Syncing);

        let synced = repo
            .mark_synced(mailbox.id, Some("H100".into()))
            .await
            .expect("mark synced");
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.history_cursor.as_deref(), Some("H100"));
        assert!(synced.last_sync_at.is_some());
        assert!(synced.last_sync_error.is_none());

        let errored = repo
            .mark_error(mailbox.id, "network down")
            .await
            .expect("mark error");
        assert_eq!(errored.sync_status, SyncStatus::Error);
        assert_eq!(errored.last_sync_error.as_deref(), Some("network down"));
        assert_eq!(
            errored.history_cursor.as_deref(),
            Some("H100"),
            "error keeps cursor"
        );

        let reset = repo
            .reset_for_full_sync(mailbox.id)
            .await
            .expect("reset for full sync");
        assert_eq!(reset.sync_status, SyncStatus::Pending);
        assert!(reset.history_cursor.is_none(), "stale cursor cleared");
    }

    #[tokio::test]
    async fn token_update_respects_optimistic_locking() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());
        let mailbox = seed_mailbox(&db, user_id).await;

        // A concurrent writer moves updated_at forward.
        repo.mark_syncing(mailbox.id).await.expect("mark syncing");

        let fresh = sample_tokens(Duration::hours(2));
        let err = repo
            .update_tokens(mailbox.id, &fresh, Some(mailbox.updated_at))
            .await
            .expect_err("stale write should conflict");
        assert!(matches!(err, MailboxError::Conflict(_)));

        let current = repo.get_by_id(mailbox.id).await.expect("reload");
        let updated = repo
            .update_tokens(mailbox.id, &fresh, Some(current.updated_at))
            .await
            .expect("fresh write lands");
        assert_eq!(updated.tokens.expires_at.timestamp(), fresh.expires_at.timestamp());
    }

    #[tokio::test]
    async fn list_needing_refresh_filters_by_horizon() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());

        let expiring = repo
            .create(user_id, "soon@example.com", sample_tokens(Duration::minutes(5)))
            .await
            .expect("create expiring");
        repo.create(user_id, "later@example.com", sample_tokens(Duration::hours(2)))
            .await
            .expect("create fresh");

        let due = repo
            .list_needing_refresh(Duration::minutes(10))
            .await
            .expect("list due");
        let ids: Vec<i64> = due.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![expiring.id]);
    }

    #[tokio::test]
    async fn watchdog_resets_only_stuck_mailboxes() {
        let (db, _dir) = setup_db().await;
        let user_id = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());
        let stuck = seed_mailbox(&db, user_id).await;
        repo.mark_syncing(stuck.id).await.expect("mark syncing");

        // Backdate updated_at past the watchdog threshold.
        let conn = db.connection().await.expect("conn");
        conn.execute(
            "UPDATE mailboxes SET updated_at = '2020-01-01T00:00:00.000Z' WHERE id = ?1",
            params![stuck.id],
        )
        .await
        .expect("backdate");

        let fresh = repo
            .create(user_id, "fresh@example.com", sample_tokens(Duration::hours(1)))
            .await
            .expect("create fresh");
        repo.mark_syncing(fresh.id).await.expect("mark syncing");

        let reset = repo
            .reset_stuck_syncing(Duration::minutes(5))
            .await
            .expect("watchdog");
        assert_eq!(reset, vec![stuck.id]);

        let reloaded = repo.get_by_id(stuck.id).await.expect("reload stuck");
        assert_eq!(reloaded.sync_status, SyncStatus::Synced);
        let reloaded = repo.get_by_id(fresh.id).await.expect("reload fresh");
        assert_eq!(reloaded.sync_status, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn ownership_check_hides_foreign_mailboxes() {
        let (db, _dir) = setup_db().await;
        let owner = seed_user(&db).await;
        let other = seed_user(&db).await;
        let repo = MailboxRepository::new(db.clone(), test_secrets());
        let mailbox = seed_mailbox(&db, owner).await;

        repo.get_owned(owner, mailbox.id).await.expect("owner sees it");
        let err = repo
            .get_owned(other, mailbox.id)
            .await
            .expect_err("stranger gets not-found");
        assert!(matches!(err, MailboxError::NotFound(_)));
    }
}
