use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::models::{
    EnhancedRecommendation, GraphStats, Interaction, InteractionRequest, JourneyStep, Post,
    Recommendation, TrendingPost,
};
use crate::services::learning::{LearningStatsReport, UpdateOutcome};

use super::{AppState, InitStatus};

/// Posts returned by the trending endpoint
pub const TRENDING_LIMIT: usize = 10;
/// Longest analytics lookback accepted, in days
pub const MAX_ANALYTICS_DAYS: u32 = 365;

// Request/Response types

fn default_num_recommendations() -> usize {
    5
}

fn default_days() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub post_id: String,
    #[serde(default = "default_num_recommendations")]
    pub num_recommendations: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    #[serde(default = "default_num_recommendations")]
    pub num_recommendations: usize,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

/// Base or analytics-enhanced recommendations
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RecommendationList {
    Base(Vec<Recommendation>),
    Enhanced(Vec<EnhancedRecommendation>),
}

impl RecommendationList {
    fn len(&self) -> usize {
        match self {
            RecommendationList::Base(recs) => recs.len(),
            RecommendationList::Enhanced(recs) => recs.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub recommendations: RecommendationList,
    pub post_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub initialized: bool,
    pub error: Option<String>,
    pub num_posts: Option<usize>,
    pub num_edges: Option<usize>,
    pub analytics_enabled: bool,
    pub realtime_learning: bool,
    pub features: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct TrendingResponse {
    pub trending_posts: Vec<TrendingPost>,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LearningStatsResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<LearningStatsReport>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LearningUpdateResponse {
    pub success: bool,
    pub message: String,
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Serialize)]
pub struct EngagementResponse {
    pub engagement_metrics: HashMap<String, f64>,
    pub days: u32,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct JourneysResponse {
    pub journey_patterns: HashMap<String, Vec<JourneyStep>>,
    pub days: u32,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct GraphStatsResponse {
    pub stats: GraphStats,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct GraphExportResponse {
    pub success: bool,
    pub path: String,
}

fn validate_days(days: u32) -> AppResult<u32> {
    if (1..=MAX_ANALYTICS_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(AppError::InvalidInput(format!(
            "days must be between 1 and {}",
            MAX_ANALYTICS_DAYS
        )))
    }
}

// Handlers

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Graph content recommender",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (initialized, error) = match state.status().await {
        InitStatus::Ready => (true, None),
        InitStatus::Initializing => (false, None),
        InitStatus::Failed(error) => (false, Some(error)),
    };

    let mut response = StatusResponse {
        initialized,
        error,
        num_posts: None,
        num_edges: None,
        analytics_enabled: false,
        realtime_learning: false,
        features: vec!["graph_recommendations", "trending_posts", "similarity_scoring"],
    };

    if let Ok(components) = state.components().await {
        response.num_posts = Some(components.recommender.catalog().len());
        response.num_edges = Some(components.recommender.num_edges().await);

        if components.analytics.is_some() {
            response.analytics_enabled = true;
            response
                .features
                .extend(["engagement_metrics", "user_journeys", "enhanced_trending"]);
        }
        if components.learning.is_some() {
            response.realtime_learning = true;
            response
                .features
                .extend(["realtime_learning", "interaction_tracking", "online_updates"]);
        }
    }

    Json(response)
}

async fn recommend(
    state: &AppState,
    post_id: String,
    num_recommendations: usize,
) -> AppResult<Json<RecommendationResponse>> {
    if num_recommendations == 0 {
        return Err(AppError::InvalidInput(
            "num_recommendations must be positive".to_string(),
        ));
    }

    let components = state.components().await?;
    let recommendations = match &components.enhanced {
        Some(enhanced) => RecommendationList::Enhanced(
            enhanced.recommendations(&post_id, num_recommendations).await,
        ),
        None => RecommendationList::Base(
            components
                .recommender
                .recommendations(&post_id, num_recommendations)
                .await,
        ),
    };

    let message = match &recommendations {
        RecommendationList::Enhanced(recs) => {
            format!("Found {} analytics-enhanced recommendations", recs.len())
        }
        RecommendationList::Base(recs) => format!("Found {} recommendations", recs.len()),
    };

    tracing::debug!(
        post_id = %post_id,
        count = recommendations.len(),
        "Served recommendations"
    );

    Ok(Json(RecommendationResponse {
        recommendations,
        post_id,
        success: true,
        message,
    }))
}

pub async fn post_recommendations(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationResponse>> {
    recommend(&state, request.post_id, request.num_recommendations).await
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    recommend(&state, post_id, query.num_recommendations).await
}

pub async fn trending(State(state): State<AppState>) -> AppResult<Json<TrendingResponse>> {
    let components = state.components().await?;

    let (trending_posts, message) = match &components.enhanced {
        Some(enhanced) => {
            let posts: Vec<TrendingPost> = enhanced
                .trending(TRENDING_LIMIT)
                .await
                .into_iter()
                .map(TrendingPost::Analytics)
                .collect();
            (posts, "Found analytics-powered trending posts".to_string())
        }
        None => {
            let posts: Vec<TrendingPost> = components
                .recommender
                .trending(TRENDING_LIMIT)
                .await
                .into_iter()
                .map(TrendingPost::Centrality)
                .collect();
            let message = format!("Found {} posts with centrality scores", posts.len());
            (posts, message)
        }
    };

    Ok(Json(TrendingResponse {
        trending_posts,
        success: true,
        message,
    }))
}

pub async fn posts(State(state): State<AppState>) -> AppResult<Json<PostsResponse>> {
    let recommender = state.recommender().await?;
    let posts = recommender.posts().to_vec();
    let message = format!("Retrieved {} blog posts", posts.len());

    Ok(Json(PostsResponse {
        posts,
        success: true,
        message,
    }))
}

pub async fn track_interaction(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<InteractionRequest>,
) -> AppResult<Json<InteractionResponse>> {
    // Interactions are accepted even before the recommender is ready
    let learning = match state.components().await {
        Ok(components) => components.learning,
        Err(AppError::NotInitialized(_)) => None,
        Err(e) => return Err(e),
    };

    let Some(learning) = learning else {
        tracing::info!(
            request_id = %request_id,
            post_id = %request.post_id,
            action = %request.action,
            "Interaction tracked (learning disabled)"
        );
        return Ok(Json(InteractionResponse {
            success: true,
            message: "Interaction tracked (real-time learning not enabled)".to_string(),
        }));
    };

    let interaction = Interaction::from(request);
    let message = format!(
        "Interaction recorded: {} on {}",
        interaction.action, interaction.post_id
    );

    tracing::info!(
        request_id = %request_id,
        post_id = %interaction.post_id,
        action = %interaction.action,
        "Interaction recorded"
    );
    learning.record_interaction(interaction).await;

    Ok(Json(InteractionResponse {
        success: true,
        message,
    }))
}

pub async fn learning_stats(
    State(state): State<AppState>,
) -> AppResult<Json<LearningStatsResponse>> {
    let components = state.components().await?;

    let response = match components.learning {
        Some(learning) => LearningStatsResponse {
            enabled: true,
            stats: Some(learning.stats().await),
            message: None,
        },
        None => LearningStatsResponse {
            enabled: false,
            stats: None,
            message: Some("Real-time learning not enabled".to_string()),
        },
    };

    Ok(Json(response))
}

pub async fn trigger_learning_update(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> AppResult<Json<LearningUpdateResponse>> {
    let learning = state.learning().await?;
    let outcome = learning.update_model().await?;

    tracing::info!(
        request_id = %request_id,
        edges_added = outcome.edges_added,
        "Manual model update completed"
    );

    Ok(Json(LearningUpdateResponse {
        success: true,
        message: "Model update triggered successfully".to_string(),
        outcome,
    }))
}

pub async fn engagement_metrics(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> AppResult<Json<EngagementResponse>> {
    let days = validate_days(query.days)?;
    let analytics = state.analytics().await?;
    let engagement_metrics = analytics.engagement_metrics(days).await?;

    Ok(Json(EngagementResponse {
        engagement_metrics,
        days,
        success: true,
    }))
}

pub async fn journey_patterns(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> AppResult<Json<JourneysResponse>> {
    let days = validate_days(query.days)?;
    let analytics = state.analytics().await?;
    let journey_patterns = analytics.journey_patterns(days).await?;

    Ok(Json(JourneysResponse {
        journey_patterns,
        days,
        success: true,
    }))
}

pub async fn graph_stats(State(state): State<AppState>) -> AppResult<Json<GraphStatsResponse>> {
    let recommender = state.recommender().await?;

    Ok(Json(GraphStatsResponse {
        stats: recommender.graph_stats().await,
        success: true,
    }))
}

pub async fn export_graph(State(state): State<AppState>) -> AppResult<Json<GraphExportResponse>> {
    let learning = state.learning().await?;
    let path = state.graph_export_path();
    learning.export_graph(path).await?;

    Ok(Json(GraphExportResponse {
        success: true,
        path: path.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_days_bounds() {
        assert_eq!(validate_days(1).unwrap(), 1);
        assert_eq!(validate_days(365).unwrap(), 365);
        assert!(matches!(validate_days(0), Err(AppError::InvalidInput(_))));
        assert!(matches!(validate_days(366), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_recommendation_request_defaults() {
        let request: RecommendationRequest =
            serde_json::from_value(json!({ "post_id": "graph-learning" })).unwrap();
        assert_eq!(request.num_recommendations, 5);
    }
}
