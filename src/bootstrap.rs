//! Background start-up: load content, train the model and wire optional services.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    api::{AppState, Components},
    config::Config,
    db::{create_pool, create_redis_client, run_migrations, Cache, CacheWriterHandle},
    error::AppError,
    services::{AnalyticsSource, LearningEngine, LearningLoopHandle, PgAnalytics, Recommender},
};

/// Background tasks started during initialisation
#[derive(Default)]
pub struct BackgroundHandles {
    learning: Option<LearningLoopHandle>,
    cache_writer: Option<CacheWriterHandle>,
}

impl BackgroundHandles {
    /// Stops the learning loop and flushes pending cache writes
    pub async fn shutdown(self) {
        if let Some(learning) = self.learning {
            learning.shutdown().await;
        }
        if let Some(cache_writer) = self.cache_writer {
            cache_writer.shutdown().await;
        }
    }
}

/// Initialises all services and marks `state` ready, or records the failure.
///
/// Analytics and caching are optional: connection failures are logged and the
/// service runs without them.
pub async fn initialize(state: AppState, config: Config) -> BackgroundHandles {
    let mut handles = BackgroundHandles::default();

    let settings = config.recommender_settings();
    let recommender = match tokio::task::spawn_blocking(move || Recommender::initialize(&settings))
        .await
        .map_err(|e| AppError::Internal(format!("initialisation task failed: {}", e)))
        .and_then(|result| result)
    {
        Ok(recommender) => Arc::new(recommender),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize recommender");
            state.set_failed(e.to_string()).await;
            return handles;
        }
    };

    let mut components = Components::new(Arc::clone(&recommender));

    if let Some(database_url) = config.database_url.as_deref() {
        match connect_analytics(database_url, &config).await {
            Ok((analytics, cache_writer)) => {
                tracing::info!(source = analytics.name(), "Analytics integration enabled");
                components = components.with_analytics(
                    analytics,
                    Duration::from_secs(config.analytics_cache_ttl_secs),
                );
                handles.cache_writer = cache_writer;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Analytics unavailable, continuing without it");
            }
        }
    }

    if config.realtime_learning {
        let engine = Arc::new(LearningEngine::new(
            Arc::clone(&recommender),
            config.learning_settings(),
        ));
        handles.learning = Some(engine.start());
        components = components.with_learning(engine);
    }

    state.set_ready(components).await;
    tracing::info!("Recommender ready");

    handles
}

async fn connect_analytics(
    database_url: &str,
    config: &Config,
) -> anyhow::Result<(Arc<dyn AnalyticsSource>, Option<CacheWriterHandle>)> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;

    let (cache, cache_writer) = match config.redis_url.as_deref() {
        Some(redis_url) => match connect_cache(redis_url).await {
            Ok((cache, writer)) => (Some(cache), Some(writer)),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, analytics results will not be cached");
                (None, None)
            }
        },
        None => (None, None),
    };

    let analytics = PgAnalytics::new(pool, cache, config.analytics_cache_ttl_secs);
    Ok((Arc::new(analytics), cache_writer))
}

async fn connect_cache(redis_url: &str) -> anyhow::Result<(Cache, CacheWriterHandle)> {
    let client = create_redis_client(redis_url)?;
    Ok(Cache::connect(client).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InitStatus;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn json_file(value: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", value).unwrap();
        file
    }

    fn config_for(content: &NamedTempFile, embeddings: &NamedTempFile) -> Config {
        let vars = vec![
            (
                "CONTENT_PATH".to_string(),
                content.path().display().to_string(),
            ),
            (
                "EMBEDDINGS_PATH".to_string(),
                embeddings.path().display().to_string(),
            ),
            ("EMBEDDING_DIM".to_string(), "4".to_string()),
            ("TRAIN_EPOCHS".to_string(), "5".to_string()),
        ];
        envy::from_iter(vars).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_marks_state_ready() {
        let content = json_file(serde_json::json!([
            {"id": "a", "title": "Rust graphs", "excerpt": "python data"},
            {"id": "b", "title": "Graph learning", "excerpt": "neural ai"},
        ]));
        let embeddings = json_file(serde_json::json!([[1.0, 0.0], [0.9, 0.1]]));

        let state = AppState::default();
        let handles = initialize(state.clone(), config_for(&content, &embeddings)).await;

        assert_eq!(state.status().await, InitStatus::Ready);
        let components = state.components().await.unwrap();
        assert_eq!(components.recommender.catalog().len(), 2);
        assert!(components.learning.is_some());
        assert!(components.analytics.is_none());

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_records_failure() {
        let embeddings = json_file(serde_json::json!([[1.0, 0.0]]));
        let mut config = config_for(&embeddings, &embeddings);
        config.content_path = "/nonexistent/content.json".to_string();

        let state = AppState::default();
        initialize(state.clone(), config).await;

        assert!(matches!(state.status().await, InitStatus::Failed(_)));
        assert!(state.recommender().await.is_err());
    }
}
