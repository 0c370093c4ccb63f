use crate::state::AppState;
use crate::{api, logging, openapi};
use axum::middleware;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "sentinel API",
        description = "Anomaly alerting: rules, notification channels, alerts and monitoring",
    ),
    tags(
        (name = "Alerts", description = "Alert history and lifecycle"),
        (name = "Alert Rules", description = "Rule management and dry runs"),
        (name = "Channels", description = "Notification channels"),
        (name = "Monitoring", description = "Health, statistics and scheduler control")
    )
)]
struct ApiDoc;

/// Builds the router with every `/v1` route, the OpenAPI document, CORS and
/// request logging.
pub fn build_http_app(state: AppState) -> Router {
    let (router, spec) = api::routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(spec);
    let spec = Arc::new(merged_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .with_state(state)
        .merge(openapi::json_route(spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
