use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use graph_recommender::api::{create_router, AppState, Components};
use graph_recommender::config::{LearningSettings, RecommenderSettings, ScoringMode};
use graph_recommender::error::AppResult;
use graph_recommender::models::{JourneyStep, PostRecord, TrendingTopic};
use graph_recommender::services::graph::GraphBuilder;
use graph_recommender::services::{AnalyticsSource, LearningEngine, Recommender};

fn record(id: &str, title: &str, excerpt: &str) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        title: Some(title.to_string()),
        url: Some(format!("https://example.com/blog/{}", id)),
        excerpt: Some(excerpt.to_string()),
    }
}

fn recommender() -> Arc<Recommender> {
    let records = vec![
        record("rust-graphs", "Graph algorithms in Rust", "Network data structures"),
        record("neural-nets", "Neural networks", "AI research notes"),
        record("trade-deal", "India USA trade", "Economy and business"),
        record("startup-notes", "Startup lessons", "Business and venture capital"),
    ];
    let embeddings = vec![
        vec![1.0, 0.2, 0.0],
        vec![0.8, 0.4, 0.1],
        vec![0.0, 0.1, 1.0],
        vec![0.1, 0.0, 0.9],
    ];
    let settings = RecommenderSettings {
        content_path: String::new(),
        embeddings_path: String::new(),
        similarity_threshold: 0.3,
        propagation_hops: 2,
        embedding_dim: 8,
        train_epochs: 10,
        train_learning_rate: 0.01,
        scoring_mode: ScoringMode::Graph,
    };

    let builder = GraphBuilder::new(records, embeddings).unwrap();
    Arc::new(Recommender::from_builder(builder, &settings).unwrap())
}

/// Fixed analytics signals for the enhanced endpoints
struct StaticAnalytics;

#[async_trait::async_trait]
impl AnalyticsSource for StaticAnalytics {
    async fn engagement_metrics(&self, _days: u32) -> AppResult<HashMap<String, f64>> {
        Ok(HashMap::from([("/blog/neural-nets".to_string(), 72.5)]))
    }

    async fn journey_patterns(&self, _days: u32) -> AppResult<HashMap<String, Vec<JourneyStep>>> {
        Ok(HashMap::from([(
            "/blog/rust-graphs".to_string(),
            vec![JourneyStep {
                next_page: "/blog/neural-nets".to_string(),
                count: 9,
            }],
        )]))
    }

    async fn trending_topics(&self, _days: u32, limit: usize) -> AppResult<Vec<TrendingTopic>> {
        let topics = vec![
            TrendingTopic {
                path: "/blog/trade-deal".to_string(),
                unique_users: 30,
                total_events: 90,
                trend_score: 150.0,
            },
            TrendingTopic {
                path: "/blog/removed-post".to_string(),
                unique_users: 5,
                total_events: 10,
                trend_score: 20.0,
            },
        ];
        Ok(topics.into_iter().take(limit).collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn server_with(state: AppState) -> TestServer {
    TestServer::new(create_router(state)).unwrap()
}

async fn ready_server(components: Components) -> TestServer {
    let state = AppState::default();
    state.set_ready(components).await;
    server_with(state)
}

async fn base_server() -> TestServer {
    ready_server(Components::new(recommender())).await
}

async fn learning_server(export_path: &std::path::Path) -> TestServer {
    let recommender = recommender();
    let engine = Arc::new(LearningEngine::new(
        Arc::clone(&recommender),
        LearningSettings::default(),
    ));
    let state = AppState::new(export_path);
    state
        .set_ready(Components::new(recommender).with_learning(engine))
        .await;
    server_with(state)
}

async fn analytics_server() -> TestServer {
    ready_server(
        Components::new(recommender())
            .with_analytics(Arc::new(StaticAnalytics), Duration::from_secs(3600)),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let server = server_with(AppState::default());
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "healthy" }));

    let response = server.get("/").await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["version"].is_string());
}

#[tokio::test]
async fn test_request_id_header_is_echoed() {
    let server = server_with(AppState::default());
    let id = "6f1c2f7e-3c1a-4d7e-9c55-7f3b9d0f1a2b";

    let response = server
        .get("/health")
        .add_header(
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderValue::from_static(id),
        )
        .await;
    assert_eq!(response.header("x-request-id"), id);
}

#[tokio::test]
async fn test_endpoints_unavailable_while_initializing() {
    let server = server_with(AppState::default());

    for path in ["/trending", "/posts", "/graph/stats", "/recommendations/rust-graphs"] {
        let response = server.get(path).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .contains("initializing"));
    }

    let status: Value = server.get("/status").await.json();
    assert_eq!(status["initialized"], false);
    assert!(status["error"].is_null());
}

#[tokio::test]
async fn test_failed_initialization_is_reported() {
    let state = AppState::default();
    state.set_failed("content file not found").await;
    let server = server_with(state);

    let response = server
        .post("/recommendations")
        .json(&json!({ "post_id": "rust-graphs" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("content file not found"));

    let status: Value = server.get("/status").await.json();
    assert_eq!(status["initialized"], false);
    assert_eq!(status["error"], "content file not found");
}

#[tokio::test]
async fn test_status_after_initialization() {
    let server = base_server().await;
    let status: Value = server.get("/status").await.json();

    assert_eq!(status["initialized"], true);
    assert_eq!(status["num_posts"], 4);
    assert!(status["num_edges"].as_u64().unwrap() > 0);
    assert_eq!(status["analytics_enabled"], false);
    assert_eq!(status["realtime_learning"], false);
    assert_eq!(status["features"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_post_recommendations() {
    let server = base_server().await;

    let response = server
        .post("/recommendations")
        .json(&json!({ "post_id": "rust-graphs", "num_recommendations": 2 }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["post_id"], "rust-graphs");
    let recs = body["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| r["id"] != "rust-graphs"));
    assert!(recs[0]["score"].as_f64().unwrap() >= recs[1]["score"].as_f64().unwrap());
}

#[tokio::test]
async fn test_get_recommendations_defaults_and_unknown_post() {
    let server = base_server().await;

    let body: Value = server.get("/recommendations/neural-nets").await.json();
    assert_eq!(body["recommendations"].as_array().unwrap().len(), 3);

    let body: Value = server
        .get("/recommendations/neural-nets")
        .add_query_param("num_recommendations", 1)
        .await
        .json();
    assert_eq!(body["recommendations"].as_array().unwrap().len(), 1);

    let response = server.get("/recommendations/unknown-post").await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["recommendations"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_zero_recommendations_rejected() {
    let server = base_server().await;
    let response = server
        .post("/recommendations")
        .json(&json!({ "post_id": "rust-graphs", "num_recommendations": 0 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trending_by_centrality() {
    let server = base_server().await;
    let body: Value = server.get("/trending").await.json();

    let posts = body["trending_posts"].as_array().unwrap();
    assert_eq!(posts.len(), 4);
    let scores: Vec<f64> = posts
        .iter()
        .map(|p| p["centrality_score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_posts_and_graph_stats() {
    let server = base_server().await;

    let body: Value = server.get("/posts").await.json();
    let posts = body["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 4);
    assert_eq!(posts[0]["id"], "rust-graphs");
    assert!(posts[0]["tags"]
        .as_array()
        .unwrap()
        .contains(&json!("graph")));

    let body: Value = server.get("/graph/stats").await.json();
    let stats = &body["stats"];
    assert_eq!(stats["num_posts"], 4);
    assert_eq!(
        stats["total_nodes"].as_u64().unwrap(),
        4 + stats["num_tags"].as_u64().unwrap()
    );
    assert_eq!(stats["node_features_dim"], 6);
}

#[tokio::test]
async fn test_interaction_accepted_without_learning_engine() {
    let server = base_server().await;

    let response = server
        .post("/interaction")
        .json(&json!({ "post_id": "rust-graphs", "action": "view" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("not enabled"));

    let body: Value = server.get("/learning/stats").await.json();
    assert_eq!(body["enabled"], false);

    server
        .post("/learning/update")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_interaction_accepted_before_initialization() {
    let server = server_with(AppState::default());

    let response = server
        .post("/interaction")
        .json(&json!({ "post_id": "rust-graphs", "action": "view" }))
        .await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["message"]
        .as_str()
        .unwrap()
        .contains("not enabled"));

    let state = AppState::default();
    state.set_failed("content file not found").await;
    let server = server_with(state);
    server
        .post("/interaction")
        .json(&json!({ "post_id": "rust-graphs", "action": "like" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_invalid_interaction_action_rejected() {
    let server = base_server().await;
    let response = server
        .post("/interaction")
        .json(&json!({ "post_id": "rust-graphs", "action": "teleport" }))
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_learning_flow() {
    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("learned_graph.json");
    let server = learning_server(&export_path).await;

    let response = server
        .post("/interaction")
        .json(&json!({
            "user_id": "visitor-1",
            "post_id": "trade-deal",
            "action": "click",
            "context": { "source_post": "rust-graphs" }
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>()["message"],
        "Interaction recorded: click on trade-deal"
    );

    let body: Value = server.get("/learning/stats").await.json();
    assert_eq!(body["enabled"], true);
    assert_eq!(body["stats"]["total_interactions"], 1);
    assert_eq!(body["stats"]["buffer_size"], 1);
    assert_eq!(body["stats"]["pending_edge_updates"], 1);

    let edges_before: Value = server.get("/graph/stats").await.json();
    let response = server.post("/learning/update").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["outcome"]["edges_added"], 1);

    let edges_after: Value = server.get("/graph/stats").await.json();
    assert_eq!(
        edges_after["stats"]["total_edges"].as_u64().unwrap(),
        edges_before["stats"]["total_edges"].as_u64().unwrap() + 2
    );

    let body: Value = server.get("/learning/stats").await.json();
    assert_eq!(body["stats"]["model_updates"], 1);
    assert_eq!(body["stats"]["edge_additions"], 1);
    assert_eq!(body["stats"]["buffer_size"], 1);
    assert_eq!(body["stats"]["pending_edge_updates"], 0);

    server.post("/graph/export").await.assert_status_ok();
    let exported: Value =
        serde_json::from_slice(&std::fs::read(&export_path).unwrap()).unwrap();
    assert_eq!(exported["num_edges"], edges_after["stats"]["total_edges"]);
    assert_eq!(exported["stats"]["model_updates"], 1);
}

#[tokio::test]
async fn test_analytics_endpoints_disabled() {
    let server = base_server().await;

    for path in ["/analytics/engagement", "/analytics/journeys"] {
        let response = server.get(path).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .contains("not enabled"));
    }
}

#[tokio::test]
async fn test_analytics_endpoints_enabled() {
    let server = analytics_server().await;

    let body: Value = server
        .get("/analytics/engagement")
        .add_query_param("days", 14)
        .await
        .json();
    assert_eq!(body["days"], 14);
    assert_eq!(body["engagement_metrics"]["/blog/neural-nets"], 72.5);

    let body: Value = server.get("/analytics/journeys").await.json();
    assert_eq!(body["days"], 7);
    assert_eq!(
        body["journey_patterns"]["/blog/rust-graphs"][0]["next_page"],
        "/blog/neural-nets"
    );

    server
        .get("/analytics/engagement")
        .add_query_param("days", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let status: Value = server.get("/status").await.json();
    assert_eq!(status["analytics_enabled"], true);
}

#[tokio::test]
async fn test_enhanced_recommendations_and_trending() {
    let server = analytics_server().await;

    let body: Value = server
        .get("/recommendations/rust-graphs")
        .add_query_param("num_recommendations", 3)
        .await
        .json();
    let recs = body["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 3);
    assert!(recs.iter().all(|r| r["final_score"].as_f64().unwrap() <= 1.0));

    let neural = recs.iter().find(|r| r["id"] == "neural-nets").unwrap();
    assert_eq!(neural["engagement_score"], 72.5);
    assert_eq!(neural["journey_relevance"], true);

    let trade = recs.iter().find(|r| r["id"] == "trade-deal").unwrap();
    assert_eq!(trade["is_trending"], true);

    let body: Value = server.get("/trending").await.json();
    let trending = body["trending_posts"].as_array().unwrap();
    assert_eq!(trending.len(), 1);
    assert_eq!(trending[0]["id"], "trade-deal");
    assert_eq!(trending[0]["unique_users"], 30);
}
