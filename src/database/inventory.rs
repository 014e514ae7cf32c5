use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Errors from inventory repositories
#[derive(Debug, Error, PartialEq)]
pub enum RepositoryError {
    #[error("Item not found")]
    NotFound,

    #[error("Insufficient quantity: {available} available, {requested} requested")]
    InsufficientQuantity { available: i64, requested: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    /// The tenant connection failed underneath the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: i64,
    pub price: f64,
    pub description: Option<String>,
    pub expiry_date: DateTime<Utc>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub quantity: i64,
    pub price: f64,
    pub description: Option<String>,
    pub expiry_date: DateTime<Utc>,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), RepositoryError> {
        validate_name(&self.name)?;
        validate_quantity(self.quantity)?;
        validate_price(self.price)
    }

    pub(crate) fn into_item(self, owner: &str) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            quantity: self.quantity,
            price: self.price,
            description: self.description,
            expiry_date: self.expiry_date,
            owner_id: owner.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl ItemUpdate {
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(quantity) = self.quantity {
            validate_quantity(quantity)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        Ok(())
    }

    pub(crate) fn apply(&self, item: &mut InventoryItem) {
        if let Some(name) = &self.name {
            item.name = name.trim().to_string();
        }
        if let Some(quantity) = self.quantity {
            item.quantity = quantity;
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(description) = &self.description {
            item.description = Some(description.clone());
        }
        if let Some(expiry_date) = self.expiry_date {
            item.expiry_date = expiry_date;
        }
    }
}

/// Inventory collection inside one tenant store. Every operation is scoped
/// to the owning principal.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn insert_one(&self, owner: &str, item: NewItem) -> Result<InventoryItem, RepositoryError>;

    /// Items of `owner`, soonest expiry first
    async fn find_by_owner(&self, owner: &str) -> Result<Vec<InventoryItem>, RepositoryError>;

    async fn find_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError>;

    async fn update_one(
        &self,
        id: Uuid,
        owner: &str,
        update: ItemUpdate,
    ) -> Result<Option<InventoryItem>, RepositoryError>;

    async fn delete_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError>;

    /// Decrement stock by `amount`. Fails with `InsufficientQuantity` and
    /// leaves the item untouched when `amount` exceeds the current stock.
    async fn reduce_quantity(&self, id: Uuid, owner: &str, amount: i64) -> Result<InventoryItem, RepositoryError>;
}

fn validate_name(name: &str) -> Result<(), RepositoryError> {
    if name.trim().is_empty() {
        return Err(RepositoryError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_quantity(quantity: i64) -> Result<(), RepositoryError> {
    if quantity < 0 {
        return Err(RepositoryError::Validation("quantity must not be negative".to_string()));
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<(), RepositoryError> {
    if !price.is_finite() || price < 0.0 {
        return Err(RepositoryError::Validation("price must be a non-negative number".to_string()));
    }
    Ok(())
}

pub fn validate_reduce_amount(amount: i64) -> Result<(), RepositoryError> {
    if amount < 1 {
        return Err(RepositoryError::Validation("quantity to reduce must be at least 1".to_string()));
    }
    Ok(())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_expiry_date(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| RepositoryError::Validation(format!("invalid expiry_date: {}", value)))
}
