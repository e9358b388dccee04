use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::services::{AnalyticsSource, EnhancedRecommender, LearningEngine, Recommender};

/// Progress of the background initialisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    Initializing,
    Ready,
    Failed(String),
}

/// Services available once initialisation succeeded
#[derive(Clone)]
pub struct Components {
    pub recommender: Arc<Recommender>,
    pub analytics: Option<Arc<dyn AnalyticsSource>>,
    pub enhanced: Option<Arc<EnhancedRecommender>>,
    pub learning: Option<Arc<LearningEngine>>,
}

impl Components {
    pub fn new(recommender: Arc<Recommender>) -> Self {
        Self {
            recommender,
            analytics: None,
            enhanced: None,
            learning: None,
        }
    }

    /// Enables analytics endpoints and analytics-enhanced ranking
    pub fn with_analytics(
        mut self,
        analytics: Arc<dyn AnalyticsSource>,
        signal_ttl: std::time::Duration,
    ) -> Self {
        self.enhanced = Some(Arc::new(EnhancedRecommender::new(
            Arc::clone(&self.recommender),
            Arc::clone(&analytics),
            signal_ttl,
        )));
        self.analytics = Some(analytics);
        self
    }

    pub fn with_learning(mut self, learning: Arc<LearningEngine>) -> Self {
        self.learning = Some(learning);
        self
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<RwLock<AppStateInner>>,
    graph_export_path: Arc<PathBuf>,
}

/// Inner state that can be modified
pub struct AppStateInner {
    pub status: InitStatus,
    pub components: Option<Components>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new("learned_graph.json")
    }
}

impl AppState {
    /// Creates a state that reports itself as initialising
    pub fn new(graph_export_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AppStateInner {
                status: InitStatus::Initializing,
                components: None,
            })),
            graph_export_path: Arc::new(graph_export_path.into()),
        }
    }

    pub async fn set_ready(&self, components: Components) {
        let mut inner = self.inner.write().await;
        inner.components = Some(components);
        inner.status = InitStatus::Ready;
    }

    pub async fn set_failed(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.components = None;
        inner.status = InitStatus::Failed(error.into());
    }

    pub async fn status(&self) -> InitStatus {
        self.inner.read().await.status.clone()
    }

    /// Initialised services, or 503 while initialising or after a failure
    pub async fn components(&self) -> AppResult<Components> {
        let inner = self.inner.read().await;
        match (&inner.status, &inner.components) {
            (InitStatus::Ready, Some(components)) => Ok(components.clone()),
            (InitStatus::Failed(error), _) => Err(AppError::NotInitialized(error.clone())),
            _ => Err(AppError::NotInitialized(
                "still initializing, try again in a moment".to_string(),
            )),
        }
    }

    pub async fn recommender(&self) -> AppResult<Arc<Recommender>> {
        Ok(self.components().await?.recommender)
    }

    pub async fn analytics(&self) -> AppResult<Arc<dyn AnalyticsSource>> {
        self.components()
            .await?
            .analytics
            .ok_or(AppError::FeatureDisabled("Analytics integration"))
    }

    pub async fn learning(&self) -> AppResult<Arc<LearningEngine>> {
        self.components()
            .await?
            .learning
            .ok_or(AppError::FeatureDisabled("Real-time learning"))
    }

    pub fn graph_export_path(&self) -> &PathBuf {
        &self.graph_export_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::recommender::tests::sample_recommender;

    #[tokio::test]
    async fn test_new_state_is_initializing() {
        let state = AppState::default();
        assert_eq!(state.status().await, InitStatus::Initializing);

        let err = state.recommender().await.err().unwrap();
        assert!(matches!(err, AppError::NotInitialized(msg) if msg.contains("initializing")));
    }

    #[tokio::test]
    async fn test_failed_state_reports_error() {
        let state = AppState::default();
        state.set_failed("content file missing").await;

        let err = state.recommender().await.err().unwrap();
        assert!(matches!(err, AppError::NotInitialized(msg) if msg == "content file missing"));
    }

    #[tokio::test]
    async fn test_ready_state_without_optional_features() {
        let state = AppState::default();
        state
            .set_ready(Components::new(Arc::new(sample_recommender())))
            .await;

        assert_eq!(state.status().await, InitStatus::Ready);
        assert!(state.recommender().await.is_ok());
        assert!(matches!(
            state.analytics().await.err(),
            Some(AppError::FeatureDisabled(_))
        ));
        assert!(matches!(
            state.learning().await.err(),
            Some(AppError::FeatureDisabled(_))
        ));
    }
}
