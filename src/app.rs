// app.rs - shared application state and the HTTP router

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AppConfig, SecurityConfig, StorageBackend};
use crate::database::directory::{Directory, PgDirectory};
use crate::database::memory::{MemoryDirectory, MemoryTransport};
use crate::database::postgres::PgTransport;
use crate::handlers::{account, inventory, system};
use crate::middleware::{jwt_auth_middleware, tenant_store_middleware};
use crate::tenant::{StoreTransport, TenantConnectionManager};

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub directory: Arc<dyn Directory>,
    pub tenants: TenantConnectionManager,
}

impl AppState {
    pub fn new(config: AppConfig, directory: Arc<dyn Directory>, transport: Arc<dyn StoreTransport>) -> Self {
        let tenants = TenantConnectionManager::new(
            directory.clone(),
            transport,
            config.database.connect_timeout(),
        );
        Self {
            config: Arc::new(config),
            directory,
            tenants,
        }
    }

    /// Build state for the configured storage backend, connecting to the
    /// central directory when running against PostgreSQL.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        match config.storage {
            StorageBackend::Postgres => {
                let url = config
                    .database
                    .directory_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;

                let directory = PgDirectory::connect(&url, config.database.directory_max_connections).await?;
                tracing::info!("Connected to user directory");

                let transport = PgTransport::new(config.database.tenant_max_connections);
                Ok(Self::new(config, Arc::new(directory), Arc::new(transport)))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; all data is lost on exit");
                Ok(Self::new(
                    config,
                    Arc::new(MemoryDirectory::new()),
                    Arc::new(MemoryTransport::new()),
                ))
            }
        }
    }

    /// Close every tenant connection, then the directory.
    pub async fn shutdown(&self) {
        self.tenants.close_all().await;
        self.directory.close().await;
        tracing::info!("Storage connections closed");
    }
}

pub fn router(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.security));

    Router::new()
        // Public
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .merge(auth_public_routes())
        // Protected
        .merge(auth_routes(state.clone()))
        .merge(inventory_routes(state.clone()))
        .layer(middleware_stack)
        .with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(account::register))
        .route("/api/auth/login", post(account::login))
}

fn auth_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/whoami", get(account::whoami))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn inventory_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/inventory",
            get(inventory::list_items).post(inventory::create_item),
        )
        .route(
            "/api/inventory/:id",
            get(inventory::show_item)
                .put(inventory::update_item)
                .delete(inventory::delete_item),
        )
        .route("/api/inventory/:id/reduce", put(inventory::reduce_item))
        // Layers run outermost-last: jwt authenticates, then the tenant store is resolved
        .route_layer(middleware::from_fn_with_state(state.clone(), tenant_store_middleware))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
