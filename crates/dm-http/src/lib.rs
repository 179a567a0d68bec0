//! HTTP/REST+SSE transport: the same `DeviceRegistry` driven over `dm-grpc`
//! exposed again as an `axum::Router`, route for route. Built directly on
//! `axum::Router` rather than a controller-macro DI layer, since there is
//! exactly one controller's worth of routes here.

pub mod asset;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod sse;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use dm_core::DeviceRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub authz_disabled: bool,
    pub asset_root: PathBuf,
}

/// Builds the full router: the `DeviceService`-mirroring JSON/SSE routes
/// plus the asset controller, with permissive CORS (the device model has no
/// browser-origin restrictions of its own) and request tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/get-value", post(handlers::get_value))
        .route("/v1/set-value", post(handlers::set_value))
        .route("/v1/multi-set-value", post(handlers::multi_set_value))
        .route("/v1/get-param", post(handlers::get_param))
        .route("/v1/device-request", get(handlers::device_request))
        .route("/v1/param-info-request", get(handlers::param_info_request))
        .route(
            "/v1/basic-param-info-request",
            get(handlers::basic_param_info_request),
        )
        .route("/v1/execute-command", post(handlers::execute_command))
        .route(
            "/v1/language-pack-request",
            get(handlers::language_pack_request),
        )
        .route("/v1/add-language", post(handlers::add_language))
        .route(
            "/v1/remove-language",
            axum::routing::delete(handlers::remove_language),
        )
        .route("/v1/languages", get(handlers::languages))
        .route("/v1/populated-slots", get(handlers::populated_slots))
        .route(
            "/v1/update-subscriptions",
            post(handlers::update_subscriptions),
        )
        .route("/v1/connect", get(handlers::connect))
        .route(
            "/v1/devices/{slot}/assets/{*oid}",
            get(asset::get_asset)
                .post(asset::post_asset)
                .put(asset::put_asset)
                .delete(asset::delete_asset),
        )
        .fallback(handlers::not_found)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
