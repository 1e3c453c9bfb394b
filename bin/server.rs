// Anonymous Usage Measurement - Web Server
// REST API over the settings store and the tracker registry

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use usage_measurement::logging::init_tracing;
use usage_measurement::{
    AppConfig, Command, PageContext, Settings, SqliteSettingsStore, TargetResolver,
    TrackerRegistry,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<Mutex<TrackerRegistry>>,
    store: Arc<SqliteSettingsStore>,
    resolver: TargetResolver,
}

impl AppState {
    fn new(store: Arc<SqliteSettingsStore>, resolver: TargetResolver) -> Self {
        let registry = TrackerRegistry::new(resolver.clone(), Arc::clone(&store))
            .with_access_variable("user");
        AppState {
            registry: Arc::new(Mutex::new(registry)),
            store,
            resolver,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(%status, error = %message, "request failed");
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct PreviewQuery {
    url: String,
    referrer: Option<String>,
}

#[derive(Serialize)]
struct PreviewEntry {
    tracker_url: String,
    request: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/targets - Targets of the live trackers
async fn get_targets(State(state): State<AppState>) -> Response {
    let mut registry = match state.registry.lock() {
        Ok(registry) => registry,
        Err(_) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry lock poisoned"),
    };

    match registry.ensure_initialized() {
        Ok(()) => ApiResponse::ok(registry.targets()),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/settings - Stored settings
async fn get_settings(State(state): State<AppState>) -> Response {
    match state.store.read() {
        Ok(settings) => ApiResponse::ok(settings),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

/// PUT /api/settings - Replace settings; trackers are rebuilt on next use
async fn put_settings(State(state): State<AppState>, Json(settings): Json<Settings>) -> Response {
    if let Err(e) = state.store.save(&settings) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
    }

    match state.registry.lock() {
        Ok(mut registry) => registry.reset(),
        Err(_) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry lock poisoned"),
    }

    ApiResponse::ok(settings)
}

/// POST /api/commands - Broadcast `["operation", ...args]` to every tracker
async fn post_command(State(state): State<AppState>, Json(entry): Json<Value>) -> Response {
    let command = match Command::from_json(&entry) {
        Some(command) => command,
        None => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "expected a JSON array [operationName, ...args]",
            )
        }
    };

    let mut registry = match state.registry.lock() {
        Ok(registry) => registry,
        Err(_) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "registry lock poisoned"),
    };

    match registry.dispatch_command(command) {
        Ok(outcome) => ApiResponse::ok(outcome),
        Err(e) => api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

/// GET /api/preview?url=...&referrer=... - Requests each tracker would send
async fn preview(State(state): State<AppState>, Query(query): Query<PreviewQuery>) -> Response {
    let mut page = PageContext::new(query.url);
    if let Some(referrer) = query.referrer {
        page = page.with_referrer(referrer);
    }

    let mut registry = TrackerRegistry::new(state.resolver.clone(), Arc::clone(&state.store))
        .with_page(page)
        .with_access_variable("user");

    let outcome = match registry.dispatch("getRequest", &[json!("")]) {
        Ok(outcome) => outcome,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let entries: Vec<PreviewEntry> = registry
        .trackers()
        .iter()
        .zip(outcome.results)
        .map(|(tracker, request)| PreviewEntry {
            tracker_url: tracker.tracker_url().to_string(),
            request: request.as_str().unwrap_or_default().to_string(),
        })
        .collect();

    ApiResponse::ok(entries)
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/targets", get(get_targets))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/commands", post(post_command))
        .route("/preview", get(preview))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let store = Arc::new(SqliteSettingsStore::open(&config.settings_db)?);
    tracing::info!(db = %config.settings_db, "settings store opened");

    let state = AppState::new(store, TargetResolver::new(&config.local_base_url));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("🚀 usage server running on http://{}", config.listen_addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
