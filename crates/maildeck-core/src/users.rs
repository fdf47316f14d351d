use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;

use crate::db::{Database, StoreError};

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, auth_provider, external_id, is_verified, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProvider {
    Local,
    External,
}

impl AuthProvider {
    fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::External => "external",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "local" => Some(AuthProvider::Local),
            "external" => Some(AuthProvider::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub auth_provider: AuthProvider,
    pub external_id: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("user already exists: {0}")]
    Duplicate(String),
    #[error("invalid auth provider value {0}")]
    InvalidProvider(String),
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        auth_provider: AuthProvider,
        external_id: Option<String>,
    ) -> Result<User, UserError> {
        let email = email.trim().to_lowercase();
        let now = now_rfc3339();

        let conn = self.db.connection().await?;
        let result = conn
            .query(
                &format!(
                    "INSERT INTO users (email, first_name, last_name, auth_provider, external_id, is_verified, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
                     RETURNING {USER_COLUMNS}"
                ),
                params![
                    email.clone(),
                    first_name,
                    last_name,
                    auth_provider.as_str(),
                    external_id,
                    now
                ],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => return Err(UserError::Duplicate(email)),
            Err(err) => return Err(err.into()),
        };

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(email)),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(id.to_string())),
        }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, UserError> {
        let email = email.trim().to_lowercase();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.clone()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(email)),
        }
    }
}

pub(crate) fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_user(row: Row) -> Result<User, UserError> {
    let auth_provider: String = row.get(4)?;
    let is_verified: i64 = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        auth_provider: AuthProvider::from_str(&auth_provider)
            .ok_or(UserError::InvalidProvider(auth_provider))?,
        external_id: row.get(5)?,
        is_verified: is_verified != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use tempfile::TempDir;

    async fn setup_repo() -> (UserRepository, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_name = format!("db_{}.sqlite", uuid::Uuid::new_v4());
        let db_path = dir.path().join(db_name);
        let db = Database::open(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");
        (UserRepository::new(db), dir)
    }

    #[tokio::test]
    async fn create_and_lookup_user() {
        let (repo, _dir) = setup_repo().await;

        let user = repo
            .create(
                "User@Example.com",
                "Ada",
                "Lovelace",
                AuthProvider::External,
                Some("google-123".into()),
            )
            .await
            .expect("create user");

        assert_eq!(user.email, "user@example.com", "email is lowercased");
        assert_eq!(user.auth_provider, AuthProvider::External);
        assert!(!user.is_verified);

        let by_id = repo.get_by_id(user.id).await.expect("get by id");
        assert_eq!(by_id, user);

        let by_email = repo
            .get_by_email("USER@example.com")
            .await
            .expect("get by email");
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (repo, _dir) = setup_repo().await;
        repo.create("user@example.com", "A", "B", AuthProvider::Local, None)
            .await
            .expect("first create");

        let err = repo
            .create("USER@example.com", "C", "D", AuthProvider::Local, None)
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, UserError::Duplicate(_)));
    }

    #[tokio::test]
    async fn missing_user_reports_not_found() {
        let (repo, _dir) = setup_repo().await;

        let err = repo.get_by_id(42).await.expect_err("should be missing");
        assert!(matches!(err, UserError::NotFound(_)));

        let err = repo
            .get_by_email("absent@example.com")
            .await
            .expect_err("should be missing");
        assert!(matches!(err, UserError::NotFound(_)));
    }
}
