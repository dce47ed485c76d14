use async_trait::async_trait;
use cairn_core::{CoreError, UserDatabase};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

enum Location {
    File(PathBuf),
    Memory,
}

/// Viewer database. Connected during startup, flipped offline at shutdown.
pub struct SqliteUserDb {
    location: Location,
    pool: OnceCell<SqlitePool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub online: bool,
}

impl SqliteUserDb {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            pool: OnceCell::new(),
        }
    }

    pub fn memory() -> Self {
        Self {
            location: Location::Memory,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, CoreError> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<SqlitePool, CoreError> {
        let pool = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| CoreError::io(format!("create {}", parent.display()), e))?;
                }
                let opts = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(opts)
                    .await
            }
            // every in-memory connection is its own database
            Location::Memory => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect("sqlite::memory:")
                    .await
            }
        }
        .map_err(|e| CoreError::Storage(format!("sqlite connect: {e}")))?;
        ensure_schema(&pool).await?;
        Ok(pool)
    }

    pub async fn upsert_user(&self, id: &str, username: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO users (id, username, online, last_seen) VALUES (?, ?, 0, ?)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
        )
        .bind(id)
        .bind(username)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool().await?)
        .await
        .map_err(|e| CoreError::Storage(format!("upsert user: {e}")))?;
        Ok(())
    }

    pub async fn set_online(&self, id: &str, online: bool) -> Result<(), CoreError> {
        let res = sqlx::query("UPDATE users SET online = ?, last_seen = ? WHERE id = ?")
            .bind(online as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool().await?)
            .await
            .map_err(|e| CoreError::Storage(format!("update user: {e}")))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::Storage(format!("unknown user {id}")));
        }
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>, CoreError> {
        let rows = sqlx::query("SELECT id, username, online FROM users ORDER BY username ASC")
            .fetch_all(self.pool().await?)
            .await
            .map_err(|e| CoreError::Storage(format!("list users: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|row| UserRow {
                id: row.get::<String, _>("id"),
                username: row.get::<String, _>("username"),
                online: row.get::<i64, _>("online") != 0,
            })
            .collect())
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), CoreError> {
    const STMT: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
      id         TEXT PRIMARY KEY,
      username   TEXT NOT NULL,
      online     INTEGER NOT NULL DEFAULT 0,
      last_seen  TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_users_online ON users (online);
    "#;

    // Execute statements one by one for compatibility.
    for chunk in STMT.split(';') {
        let sql = chunk.trim();
        if sql.is_empty() {
            continue;
        }
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| CoreError::Storage(format!("sqlite schema: {e}")))?;
    }
    Ok(())
}

#[async_trait]
impl UserDatabase for SqliteUserDb {
    async fn connect(&self) -> Result<(), CoreError> {
        self.pool().await?;
        info!("user database connected");
        Ok(())
    }

    async fn set_all_users_offline(&self) -> Result<u64, CoreError> {
        let res = sqlx::query("UPDATE users SET online = 0, last_seen = ? WHERE online != 0")
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool().await?)
            .await
            .map_err(|e| CoreError::Storage(format!("set users offline: {e}")))?;
        debug!(users = res.rows_affected(), "set all users offline");
        Ok(res.rows_affected())
    }
}
