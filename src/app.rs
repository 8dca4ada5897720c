use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::EventBus;
use crate::jwt::JwtConfig;
use crate::routes::{auth, authorizations, catalog, health, inventory, machines, org};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, event_rx) = crate::events::init_event_bus();
    let state = AppState::new(pool.clone(), jwt_config, event_bus);

    // Persist activity/event-store projections off the request path
    tokio::spawn(crate::events::start_activity_listener(event_rx, pool));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let machine_routes = Router::new()
        .route("/", get(machines::list_machines))
        .route("/", post(machines::create_machine))
        .route("/:id", get(machines::get_machine))
        .route("/:id/inventory", post(machines::report_inventory))
        .route("/:id/software", get(machines::list_software));

    let catalog_routes = Router::new()
        .route("/", get(catalog::list_references))
        .route("/", post(catalog::create_reference))
        .route("/sync", post(catalog::sync_catalog))
        .route("/sync-one", post(catalog::sync_catalog_one))
        .route("/forbid", post(authorizations::forbid))
        .route("/categories", get(catalog::list_categories))
        .route("/categories", post(catalog::create_category))
        .route("/:id", get(catalog::get_reference))
        .route("/:id", put(catalog::update_reference));

    let authorization_routes = Router::new()
        .route("/", get(authorizations::list_records))
        .route("/bulk-deny", post(authorizations::bulk_deny))
        .route("/bulk-grant", post(authorizations::bulk_grant));

    let inventory_routes = Router::new()
        .route("/equipment", get(inventory::list_equipment))
        .route("/equipment", post(inventory::create_equipment))
        .route("/equipment/:id/authorizations", get(inventory::list_equipment_authorizations))
        .route("/authorizations/sync", post(inventory::sync_authorizations));

    let org_routes = Router::new()
        .route("/structures", get(org::list_structures))
        .route("/structures", post(org::create_structure))
        .route("/groups", get(org::list_groups))
        .route("/groups", post(org::create_group))
        .route("/sites", get(org::list_sites))
        .route("/sites", post(org::create_site));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .route("/software/blocked", get(machines::blocked_software))
        .nest("/auth", auth_routes)
        .nest("/machines", machine_routes)
        .nest("/catalog", catalog_routes)
        .nest("/authorizations", authorization_routes)
        .nest("/inventory", inventory_routes)
        .nest("/org", org_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
