// handlers/account.rs - /api/auth/* handlers

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::{generate_jwt, hash_password, verify_password};
use crate::database::directory::NewUser;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

/// Default password minimum length
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Connection string of the user's own inventory database
    pub store_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// POST /api/auth/register - create an account in the directory
pub async fn register(State(state): State<AppState>, Json(payload): Json<RegisterRequest>) -> ApiResult<Value> {
    let name = non_blank(payload.name);
    let email = non_blank(payload.email);
    let password = payload.password.filter(|p| !p.is_empty());

    let mut missing = Vec::new();
    if name.is_none() {
        missing.push("name");
    }
    if email.is_none() {
        missing.push("email");
    }
    if password.is_none() {
        missing.push("password");
    }
    let (Some(name), Some(email), Some(password)) = (name, email, password) else {
        return Err(ApiError::missing_fields(&missing));
    };

    validate_email_format(&email).map_err(ApiError::bad_request)?;
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let store_uri = non_blank(payload.store_uri);
    if let Some(uri) = &store_uri {
        url::Url::parse(uri).map_err(|_| ApiError::bad_request("store_uri must be a valid connection string"))?;
    }

    // Insert still enforces uniqueness
    if state.directory.find_by_email(&email).await?.is_some() {
        return Err(ApiError::bad_request("User already exists"));
    }

    let password_hash = hash_password(password, state.config.security.bcrypt_cost).await?;
    let user = state
        .directory
        .insert(NewUser {
            name,
            email,
            password_hash,
            store_uri,
        })
        .await?;

    tracing::info!("Registered user {}", user.id);
    Ok(ApiResponse::created(json!({
        "message": "User registered successfully",
        "id": user.id,
    })))
}

/// POST /api/auth/login - exchange credentials for a JWT
pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> ApiResult<Value> {
    let (Some(email), Some(password)) = (non_blank(payload.email), payload.password) else {
        return Err(ApiError::missing_fields(&["email", "password"]));
    };

    let Some(user) = state.directory.find_by_email(&email).await? else {
        tracing::debug!("Login failed: unknown email");
        return Err(ApiError::bad_request("Invalid credentials"));
    };

    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::debug!("Login failed: wrong password for {}", user.id);
        return Err(ApiError::bad_request("Invalid credentials"));
    }

    let token = generate_jwt(&user.principal_id(), &state.config.security)?;
    Ok(ApiResponse::success(json!({
        "token": token,
        "expires_in": state.config.security.jwt_expiry_hours * 3600,
    })))
}

/// GET /api/auth/whoami - the authenticated principal's directory record
pub async fn whoami(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    let user = state
        .directory
        .find_by_id(&auth.principal_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

    Ok(ApiResponse::success(json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "store_configured": user.store_address().is_some(),
        "store_connected": state.tenants.is_cached(&auth.principal_id).await,
        "created_at": user.created_at,
    })))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_email_format(email: &str) -> Result<(), String> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || !parts[1].contains('.') {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}
