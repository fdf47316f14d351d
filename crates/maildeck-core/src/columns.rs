use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;

use crate::db::{Database, StoreError};
use crate::users::is_unique_violation;

const COLUMN_COLUMNS: &str =
    "id, user_id, title, order_index, label_token, color, is_default, created_at, updated_at";

/// The six columns seeded for a new user. The first three mirror provider
/// labels and cannot be deleted.
const DEFAULT_COLUMNS: &[(&str, Option<&str>, bool)] = &[
    ("Inbox", Some("INBOX"), true),
    ("Important", Some("IMPORTANT"), true),
    ("Starred", Some("STARRED"), true),
    ("To Do", None, false),
    ("In Progress", None, false),
    ("Done", None, false),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub order_index: i64,
    pub label_token: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnUpdate {
    pub title: Option<String>,
    pub order_index: Option<i64>,
    pub label_token: Option<Option<String>>,
    pub color: Option<Option<String>>,
}

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("column not found: {0}")]
    NotFound(i64),
    #[error("column title already in use: {0}")]
    DuplicateTitle(String),
    #[error("default columns cannot be deleted")]
    DefaultUndeletable,
}

/// Kanban column management: CRUD, dense 0..N-1 ordering per user,
/// gap-preserving reorder and default seeding.
#[derive(Clone)]
pub struct ColumnRepository {
    db: Database,
}

impl ColumnRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: i64,
        title: &str,
        order_index: Option<i64>,
        label_token: Option<String>,
        color: Option<String>,
    ) -> Result<Column, ColumnError> {
        let conn = self.db.connection().await?;
        let order_index = match order_index {
            Some(index) => index,
            None => next_order_index(&conn, user_id).await?,
        };

        self.insert(&conn, user_id, title, order_index, label_token, color, false)
            .await
    }

    async fn insert(
        &self,
        conn: &libsql::Connection,
        user_id: i64,
        title: &str,
        order_index: i64,
        label_token: Option<String>,
        color: Option<String>,
        is_default: bool,
    ) -> Result<Column, ColumnError> {
        let now = now_rfc3339();
        let result = conn
            .query(
                &format!(
                    "INSERT INTO columns (user_id, title, order_index, label_token, color, is_default, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     RETURNING {COLUMN_COLUMNS}"
                ),
                params![
                    user_id,
                    title,
                    order_index,
                    label_token,
                    color,
                    is_default as i64,
                    now
                ],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => {
                return Err(ColumnError::DuplicateTitle(title.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        match rows.next().await? {
            Some(row) => row_to_column(row),
            None => Err(ColumnError::NotFound(user_id)),
        }
    }

    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Column, ColumnError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {COLUMN_COLUMNS} FROM columns WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_column(row),
            None => Err(ColumnError::NotFound(id)),
        }
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Column>, ColumnError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {COLUMN_COLUMNS} FROM columns WHERE user_id = ?1 ORDER BY order_index"
                ),
                params![user_id],
            )
            .await?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next().await? {
            columns.push(row_to_column(row)?);
        }
        Ok(columns)
    }

    /// Title renames enforce per-user uniqueness; order changes shift the
    /// in-between columns by one so indices stay dense.
    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        update: ColumnUpdate,
    ) -> Result<Column, ColumnError> {
        let current = self.get_owned(user_id, id).await?;
        let conn = self.db.connection().await?;
        let now = now_rfc3339();

        if let Some(new_index) = update.order_index {
            let old_index = current.order_index;
            if new_index > old_index {
                // Forward move: (old, new] shift left.
                conn.execute(
                    "UPDATE columns SET order_index = order_index - 1, updated_at = ?4
                     WHERE user_id = ?1 AND order_index > ?2 AND order_index <= ?3",
                    params![user_id, old_index, new_index, now.clone()],
                )
                .await?;
            } else if new_index < old_index {
                // Backward move: [new, old) shift right.
                conn.execute(
                    "UPDATE columns SET order_index = order_index + 1, updated_at = ?4
                     WHERE user_id = ?1 AND order_index >= ?2 AND order_index < ?3",
                    params![user_id, new_index, old_index, now.clone()],
                )
                .await?;
            }
        }

        let title = update.title.unwrap_or(current.title);
        let order_index = update.order_index.unwrap_or(current.order_index);
        let label_token = match update.label_token {
            Some(token) => token,
            None => current.label_token,
        };
        let color = match update.color {
            Some(color) => color,
            None => current.color,
        };

        let result = conn
            .query(
                &format!(
                    "UPDATE columns
                     SET title = ?3, order_index = ?4, label_token = ?5, color = ?6, updated_at = ?7
                     WHERE id = ?1 AND user_id = ?2
                     RETURNING {COLUMN_COLUMNS}"
                ),
                params![id, user_id, title.clone(), order_index, label_token, color, now],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => {
                return Err(ColumnError::DuplicateTitle(title));
            }
            Err(err) => return Err(err.into()),
        };

        match rows.next().await? {
            Some(row) => row_to_column(row),
            None => Err(ColumnError::NotFound(id)),
        }
    }

    /// Deleting re-densifies the remaining indices to 0..N-1.
    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), ColumnError> {
        let column = self.get_owned(user_id, id).await?;
        if column.is_default {
            return Err(ColumnError::DefaultUndeletable);
        }

        let conn = self.db.connection().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "UPDATE messages SET column_id = NULL WHERE column_id = ?1",
            params![id],
        )
        .await?;
        tx.execute(
            "DELETE FROM columns WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )
        .await?;
        tx.execute(
            "UPDATE columns SET order_index = order_index - 1, updated_at = ?3
             WHERE user_id = ?1 AND order_index > ?2",
            params![user_id, column.order_index, now_rfc3339()],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Seeds the default board. Idempotent: any existing column short-circuits.
    pub async fn seed_defaults(&self, user_id: i64) -> Result<Vec<Column>, ColumnError> {
        let existing = self.list_for_user(user_id).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let conn = self.db.connection().await?;
        let mut created = Vec::new();
        for (index, (title, label_token, is_default)) in DEFAULT_COLUMNS.iter().enumerate() {
            let column = self
                .insert(
                    &conn,
                    user_id,
                    title,
                    index as i64,
                    label_token.map(str::to_string),
                    None,
                    *is_default,
                )
                .await?;
            created.push(column);
        }
        Ok(created)
    }
}

async fn next_order_index(
    conn: &libsql::Connection,
    user_id: i64,
) -> Result<i64, ColumnError> {
    let mut rows = conn
        .query(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM columns WHERE user_id = ?1",
            params![user_id],
        )
        .await?;
    let row = rows.next().await?.ok_or(ColumnError::NotFound(user_id))?;
    Ok(row.get(0)?)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_column(row: Row) -> Result<Column, ColumnError> {
    let is_default: i64 = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Column {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        order_index: row.get(3)?,
        label_token: row.get(4)?,
        color: row.get(5)?,
        is_default: is_default != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}
