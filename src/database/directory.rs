use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors from the shared user directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// A registered user. The password hash never leaves the server.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    /// Connection string of the user's private store
    pub store_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn principal_id(&self) -> String {
        self.id.to_string()
    }

    /// The store address, when one is configured and non-blank
    pub fn store_address(&self) -> Option<&str> {
        self.store_uri.as_deref().map(str::trim).filter(|uri| !uri.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub store_uri: Option<String>,
}

/// Shared database mapping principals to their tenant store address
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_by_id(&self, principal_id: &str) -> Result<Option<UserRecord>, DirectoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError>;

    /// Fails with `Conflict` when the email is already registered
    async fn insert(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;

    async fn ping(&self) -> Result<(), DirectoryError>;

    async fn close(&self);
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Directory backed by the `users` table of the central PostgreSQL database
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                store_uri TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("Connected to central directory database");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_by_id(&self, principal_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        // Principals are UUIDs; anything else cannot be registered
        let Ok(id) = Uuid::parse_str(principal_id) else {
            return Ok(None);
        };

        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, password_hash, store_uri, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(directory_error)?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, password_hash, store_uri, created_at FROM users WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(directory_error)?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let email = normalize_email(&user.email);
        let result = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, name, email, password_hash, store_uri)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, password_hash, store_uri, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.name.trim())
        .bind(&email)
        .bind(&user.password_hash)
        .bind(&user.store_uri)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(DirectoryError::Conflict(email)),
            Err(err) => Err(directory_error(err)),
        }
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(directory_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed central directory database");
    }
}

/// Connection-class failures mean the directory is unreachable, not that the
/// query was wrong.
fn directory_error(err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DirectoryError::Unavailable(err.to_string()),
        other => DirectoryError::Sqlx(other),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}
