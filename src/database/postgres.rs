use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::inventory::{InventoryItem, InventoryRepository, ItemUpdate, NewItem, RepositoryError};
use crate::tenant::transport::{
    redact_address, EventSink, StoreHandle, StoreTransport, TenantConnection, TransportError,
};

const ITEM_COLUMNS: &str = "id, name, quantity, price, description, expiry_date, owner_id, created_at";

/// Opens one connection pool per tenant database
pub struct PgTransport {
    max_connections: u32,
}

impl PgTransport {
    pub fn new(max_connections: u32) -> Self {
        Self { max_connections }
    }
}

#[async_trait]
impl StoreTransport for PgTransport {
    async fn open(
        &self,
        address: &str,
        timeout: Duration,
        events: EventSink,
    ) -> Result<StoreHandle, TransportError> {
        let options: PgConnectOptions = address
            .parse()
            .map_err(|e: sqlx::Error| TransportError::InvalidAddress(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .map_err(|e| TransportError::Refused(e.to_string()))?;

        if let Err(e) = PgInventoryRepository::migrate(&pool).await {
            pool.close().await;
            return Err(TransportError::Refused(format!("schema setup failed: {}", e)));
        }

        debug!("Opened tenant pool for {}", redact_address(address));
        Ok(std::sync::Arc::new(PgTenantConnection {
            repository: PgInventoryRepository { pool, events },
        }))
    }
}

pub struct PgTenantConnection {
    repository: PgInventoryRepository,
}

#[async_trait]
impl TenantConnection for PgTenantConnection {
    fn inventory(&self) -> &dyn InventoryRepository {
        &self.repository
    }

    fn is_ready(&self) -> bool {
        !self.repository.pool.is_closed()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.repository.pool.close().await;
        Ok(())
    }
}

/// `inventory_items` table of one tenant database
pub struct PgInventoryRepository {
    pool: PgPool,
    events: EventSink,
}

impl PgInventoryRepository {
    async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory_items (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                quantity BIGINT NOT NULL CHECK (quantity >= 0),
                price DOUBLE PRECISION NOT NULL CHECK (price >= 0),
                description TEXT,
                expiry_date TIMESTAMPTZ NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS inventory_items_owner_expiry ON inventory_items (owner_id, expiry_date)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Map a sqlx failure, reporting transport-level ones to the connection
    /// manager so the pool gets evicted.
    fn storage_error(&self, err: sqlx::Error) -> RepositoryError {
        match err {
            sqlx::Error::PoolClosed => {
                self.events.disconnected();
                RepositoryError::Unavailable("connection closed".to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                warn!("Tenant store transport error: {}", err);
                self.events.error(err.to_string());
                RepositoryError::Unavailable(err.to_string())
            }
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
impl InventoryRepository for PgInventoryRepository {
    async fn insert_one(&self, owner: &str, item: NewItem) -> Result<InventoryItem, RepositoryError> {
        item.validate()?;
        let item = item.into_item(owner);

        let sql = format!(
            "INSERT INTO inventory_items ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {cols}",
            cols = ITEM_COLUMNS
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(item.id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.price)
            .bind(&item.description)
            .bind(item.expiry_date)
            .bind(&item.owner_id)
            .bind(item.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Vec<InventoryItem>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM inventory_items WHERE owner_id = $1 ORDER BY expiry_date ASC, created_at ASC",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn find_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        let sql = format!("SELECT {} FROM inventory_items WHERE id = $1 AND owner_id = $2", ITEM_COLUMNS);
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn update_one(
        &self,
        id: Uuid,
        owner: &str,
        update: ItemUpdate,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        update.validate()?;

        let sql = format!(
            r#"
            UPDATE inventory_items SET
                name = COALESCE($3, name),
                quantity = COALESCE($4, quantity),
                price = COALESCE($5, price),
                description = COALESCE($6, description),
                expiry_date = COALESCE($7, expiry_date)
            WHERE id = $1 AND owner_id = $2
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(id)
            .bind(owner)
            .bind(update.name.as_deref().map(str::trim))
            .bind(update.quantity)
            .bind(update.price)
            .bind(&update.description)
            .bind(update.expiry_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn delete_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        let sql = format!(
            "DELETE FROM inventory_items WHERE id = $1 AND owner_id = $2 RETURNING {}",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn reduce_quantity(&self, id: Uuid, owner: &str, amount: i64) -> Result<InventoryItem, RepositoryError> {
        crate::database::inventory::validate_reduce_amount(amount)?;

        // Check and decrement in one statement so concurrent reductions cannot overdraw
        let sql = format!(
            r#"
            UPDATE inventory_items SET quantity = quantity - $3
            WHERE id = $1 AND owner_id = $2 AND quantity >= $3
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );
        let reduced = sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(id)
            .bind(owner)
            .bind(amount)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.storage_error(e))?;

        if let Some(item) = reduced {
            return Ok(item);
        }

        match self.find_one(id, owner).await? {
            Some(item) => Err(RepositoryError::InsufficientQuantity {
                available: item.quantity,
                requested: amount,
            }),
            None => Err(RepositoryError::NotFound),
        }
    }
}
