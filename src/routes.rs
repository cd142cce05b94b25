use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{admin, data, public, reports, session};
use crate::middleware::{guard_middleware, session_middleware};
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let guarded = Router::new()
        .merge(session_routes())
        .merge(data_routes())
        .merge(report_routes())
        .merge(admin_routes())
        // route_layer so MatchedPath and path params are available to the guard
        .route_layer(middleware::from_fn_with_state(state.clone(), guard_middleware));

    let mut router = Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(guarded)
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    if state.config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    if state.config.security.enable_cors {
        router = router.layer(cors_layer(&state.config.security.cors_origins));
    }

    router.with_state(state)
}

fn session_routes() -> Router<AppState> {
    Router::new().route("/api/session", get(session::whoami))
}

fn data_routes() -> Router<AppState> {
    Router::new()
        // Collection
        .route("/api/data/:resource", get(data::list).post(data::create))
        // Individual record
        .route(
            "/api/data/:resource/:id",
            get(data::get).patch(data::update).put(data::update).delete(data::delete),
        )
        // Record actions: restore, approve
        .route("/api/data/:resource/:id/:action", post(data::record_action))
        // Filtered search
        .route("/api/find/:resource", post(data::find))
}

fn report_routes() -> Router<AppState> {
    Router::new().route("/api/reports/summary", get(reports::summary))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/tenants", get(admin::list_tenants).post(admin::create_tenant))
        .route("/api/admin/users/:id/permissions", put(admin::set_permissions))
        .route("/api/admin/impersonate/:id", post(admin::impersonate))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::HeaderName::from_static("x-tenant-id")])
}
