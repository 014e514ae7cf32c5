// handlers/inventory.rs - /api/inventory/* handlers
//
// Every handler runs behind jwt + tenant middleware, so the caller's store
// handle is already resolved. Items are always scoped to the caller.

use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::inventory::{parse_expiry_date, validate_reduce_amount, ItemUpdate, NewItem};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, TenantStore};

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub expiry_date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub expiry_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReduceRequest {
    pub quantity: Option<i64>,
}

impl CreateItemRequest {
    fn into_new_item(self) -> Result<NewItem, ApiError> {
        let name = self.name.filter(|n| !n.trim().is_empty());
        let expiry = self.expiry_date.filter(|d| !d.trim().is_empty());

        let mut missing = Vec::new();
        if name.is_none() {
            missing.push("name");
        }
        if self.quantity.is_none() {
            missing.push("quantity");
        }
        if self.price.is_none() {
            missing.push("price");
        }
        if expiry.is_none() {
            missing.push("expiry_date");
        }

        match (name, self.quantity, self.price, expiry) {
            (Some(name), Some(quantity), Some(price), Some(expiry)) => {
                let item = NewItem {
                    name,
                    quantity,
                    price,
                    description: self.description,
                    expiry_date: parse_expiry_date(&expiry)?,
                };
                item.validate()?;
                Ok(item)
            }
            _ => Err(ApiError::missing_fields(&missing)),
        }
    }
}

impl UpdateItemRequest {
    fn into_update(self) -> Result<ItemUpdate, ApiError> {
        let expiry_date = self.expiry_date.as_deref().map(parse_expiry_date).transpose()?;
        let update = ItemUpdate {
            name: self.name,
            quantity: self.quantity,
            price: self.price,
            description: self.description,
            expiry_date,
        };
        update.validate()?;
        Ok(update)
    }
}

/// POST /api/inventory
pub async fn create_item(
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
    Json(payload): Json<CreateItemRequest>,
) -> ApiResult<Value> {
    let new_item = payload.into_new_item()?;
    let item = store.inventory().insert_one(&auth.principal_id, new_item).await?;

    tracing::debug!("Created item {} for {}", item.id, auth.principal_id);
    Ok(ApiResponse::created(json!({ "item": item })))
}

/// GET /api/inventory
pub async fn list_items(
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
) -> ApiResult<Value> {
    let items = store.inventory().find_by_owner(&auth.principal_id).await?;
    Ok(ApiResponse::success(json!({ "items": items })))
}

/// GET /api/inventory/:id
pub async fn show_item(
    Path(id): Path<String>,
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
) -> ApiResult<Value> {
    let id = parse_item_id(&id)?;
    let item = store
        .inventory()
        .find_one(id, &auth.principal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;

    Ok(ApiResponse::success(json!({ "item": item })))
}

/// PUT /api/inventory/:id - partial update
pub async fn update_item(
    Path(id): Path<String>,
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
    Json(payload): Json<UpdateItemRequest>,
) -> ApiResult<Value> {
    let id = parse_item_id(&id)?;
    let update = payload.into_update()?;
    let item = store
        .inventory()
        .update_one(id, &auth.principal_id, update)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;

    Ok(ApiResponse::success(json!({ "item": item })))
}

/// DELETE /api/inventory/:id
pub async fn delete_item(
    Path(id): Path<String>,
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
) -> ApiResult<Value> {
    let id = parse_item_id(&id)?;
    let item = store
        .inventory()
        .delete_one(id, &auth.principal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;

    tracing::debug!("Deleted item {} for {}", item.id, auth.principal_id);
    Ok(ApiResponse::success(json!({ "item": item })))
}

/// PUT /api/inventory/:id/reduce
pub async fn reduce_item(
    Path(id): Path<String>,
    Extension(auth): Extension<AuthUser>,
    Extension(TenantStore(store)): Extension<TenantStore>,
    Json(payload): Json<ReduceRequest>,
) -> ApiResult<Value> {
    let id = parse_item_id(&id)?;
    let amount = payload.quantity.ok_or_else(|| ApiError::missing_fields(&["quantity"]))?;
    validate_reduce_amount(amount)?;

    let item = store.inventory().reduce_quantity(id, &auth.principal_id, amount).await?;
    Ok(ApiResponse::success(json!({ "item": item })))
}

fn parse_item_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("Invalid item id"))
}
