use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        // Recommendations
        .route("/recommendations", post(handlers::post_recommendations))
        .route("/recommendations/:post_id", get(handlers::get_recommendations))
        .route("/trending", get(handlers::trending))
        .route("/posts", get(handlers::posts))
        // Real-time learning
        .route("/interaction", post(handlers::track_interaction))
        .route("/learning/stats", get(handlers::learning_stats))
        .route("/learning/update", post(handlers::trigger_learning_update))
        // Analytics
        .route("/analytics/engagement", get(handlers::engagement_metrics))
        .route("/analytics/journeys", get(handlers::journey_patterns))
        // Graph
        .route("/graph/stats", get(handlers::graph_stats))
        .route("/graph/export", post(handlers::export_graph))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
