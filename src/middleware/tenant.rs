use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::app::AppState;
use crate::error::ApiError;
use crate::tenant::StoreHandle;

/// Handle on the authenticated principal's store, injected by middleware
#[derive(Clone)]
pub struct TenantStore(pub StoreHandle);

/// Resolves the principal's tenant store through the connection manager.
/// Must run after [`jwt_auth_middleware`](super::jwt_auth_middleware).
pub async fn tenant_store_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before tenant resolution"))?;

    let handle = state.tenants.resolve(&auth_user.principal_id).await.map_err(|e| {
        tracing::warn!("Tenant resolution failed for {}: {}", auth_user.principal_id, e);
        ApiError::from(e)
    })?;

    tracing::debug!("Tenant store attached for {}", auth_user.principal_id);
    request.extensions_mut().insert(TenantStore(handle));

    Ok(next.run(request).await)
}
