use std::{env, path::Path, sync::Arc};

use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;

/// Pragmas applied to every connection. Foreign keys guard the
/// mailbox→message→attachment ownership chain; the busy timeout covers the
/// sync, snooze and enrichment timers all writing to one file.
const SESSION_PRAGMAS: &[&str] = &["PRAGMA foreign_keys = ON", "PRAGMA busy_timeout = 5000"];

/// Handle to the libsql store shared by all repositories.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open database at {path}: {source}")]
    Open {
        path: String,
        source: libsql::Error,
    },
    #[error("connection setup failed: {0}")]
    Session(libsql::Error),
    #[error("remote database requires LIBSQL_AUTH_TOKEN to be set")]
    RemoteAuth,
}

impl Database {
    /// Open a local file or, for `libsql://`/`http(s)://` targets, a remote
    /// database authenticated through `LIBSQL_AUTH_TOKEN`.
    pub async fn open(database_path: &Path) -> Result<Self, StoreError> {
        let target = database_path.to_string_lossy().into_owned();

        let built = if has_remote_scheme(&target) {
            let token = env::var("LIBSQL_AUTH_TOKEN")
                .ok()
                .filter(|token| !token.is_empty())
                .ok_or(StoreError::RemoteAuth)?;
            Builder::new_remote(target.clone(), token).build().await
        } else {
            Builder::new_local(target.clone()).build().await
        };

        let inner = built.map_err(|source| StoreError::Open {
            path: target,
            source,
        })?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub async fn connection(&self) -> Result<Connection, StoreError> {
        let conn = self.inner.connect().map_err(StoreError::Session)?;
        for pragma in SESSION_PRAGMAS {
            conn.execute(pragma, ())
                .await
                .map_err(StoreError::Session)?;
        }
        Ok(conn)
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.query("SELECT 1", ())
            .await
            .map_err(StoreError::Session)?
            .next()
            .await
            .map_err(StoreError::Session)?;
        Ok(())
    }
}

fn has_remote_scheme(target: &str) -> bool {
    ["libsql://", "http://", "https://"]
        .iter()
        .any(|scheme| target.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    async fn pragma_value(conn: &Connection, pragma: &str) -> i64 {
        let mut rows = conn
            .query(&format!("PRAGMA {pragma}"), ())
            .await
            .expect("pragma query");
        rows.next()
            .await
            .expect("pragma row")
            .expect("pragma value present")
            .get(0)
            .expect("pragma value")
    }

    #[tokio::test]
    async fn session_pragmas_apply_to_every_connection() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(&dir.path().join("deck.sqlite"))
            .await
            .expect("open db");

        let conn = db.connection().await.expect("first connection");
        assert_eq!(pragma_value(&conn, "foreign_keys").await, 1);
        assert_eq!(pragma_value(&conn, "busy_timeout").await, 5000);

        let other = db.connection().await.expect("second connection");
        assert_eq!(pragma_value(&other, "foreign_keys").await, 1);
    }

    #[tokio::test]
    async fn ping_answers_on_a_fresh_file() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(&dir.path().join("deck.sqlite"))
            .await
            .expect("open db");

        db.ping().await.expect("ping succeeds");
    }

    #[tokio::test]
    async fn remote_target_without_token_is_rejected() {
        let _guard = ENV_LOCK.lock().expect("lock env");
        unsafe { env::remove_var("LIBSQL_AUTH_TOKEN") };

        let err = Database::open(Path::new("libsql://deck.example.com/main"))
            .await
            .expect_err("remote open must demand a token");
        assert!(matches!(err, StoreError::RemoteAuth));
    }

    #[test]
    fn remote_scheme_detection() {
        assert!(has_remote_scheme("libsql://host/db"));
        assert!(has_remote_scheme("https://host/db"));
        assert!(!has_remote_scheme("/var/lib/maildeck/deck.sqlite"));
        assert!(!has_remote_scheme("deck.sqlite"));
    }
}
