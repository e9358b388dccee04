//! Recommendations re-ranked with site behaviour signals.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{
    models::{
        blog_path, EnhancedRecommendation, JourneyStep, TrendingRecommendation, TrendingTopic,
    },
    services::{
        analytics::{post_id_from_path, AnalyticsSource},
        recommender::Recommender,
    },
};

/// Lookback window used when refreshing signals
pub const SIGNAL_LOOKBACK_DAYS: u32 = 7;
/// Trending topics kept per refresh
pub const TRENDING_TOPICS_LIMIT: usize = 10;

const ENGAGEMENT_WEIGHT: f64 = 0.3;
const TRENDING_BOOST: f64 = 0.2;
const JOURNEY_BOOST: f64 = 0.1;

/// Snapshot of analytics signals taken at `fetched_at`
#[derive(Debug, Default)]
struct Signals {
    engagement: HashMap<String, f64>,
    journeys: HashMap<String, Vec<JourneyStep>>,
    trending: Vec<TrendingTopic>,
    fetched_at: Option<Instant>,
}

impl Signals {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at
            .is_some_and(|fetched_at| fetched_at.elapsed() < ttl)
    }

    fn is_trending(&self, path: &str) -> bool {
        self.trending.iter().any(|topic| topic.path == path)
    }

    fn leads_to(&self, from: &str, to: &str) -> bool {
        self.journeys
            .get(from)
            .is_some_and(|steps| steps.iter().any(|step| step.next_page == to))
    }
}

/// Applies engagement, trending and journey boosts to a base similarity score
pub fn boosted_score(base: f32, engagement: f64, is_trending: bool, journey_relevance: bool) -> f64 {
    let mut score = base as f64 + engagement / 100.0 * ENGAGEMENT_WEIGHT;
    if is_trending {
        score += TRENDING_BOOST;
    }
    if journey_relevance {
        score += JOURNEY_BOOST;
    }
    score.min(1.0)
}

pub struct EnhancedRecommender {
    recommender: Arc<Recommender>,
    analytics: Arc<dyn AnalyticsSource>,
    ttl: Duration,
    signals: RwLock<Signals>,
}

impl EnhancedRecommender {
    pub fn new(
        recommender: Arc<Recommender>,
        analytics: Arc<dyn AnalyticsSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            recommender,
            analytics,
            ttl,
            signals: RwLock::new(Signals::default()),
        }
    }

    /// Re-fetches all signals from the analytics source.
    ///
    /// Each failed query is logged and leaves that signal empty until the next refresh.
    pub async fn refresh_signals(&self) {
        let source = self.analytics.name();

        let engagement = self
            .analytics
            .engagement_metrics(SIGNAL_LOOKBACK_DAYS)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(source, error = %e, "Failed to fetch engagement metrics");
                HashMap::new()
            });
        let journeys = self
            .analytics
            .journey_patterns(SIGNAL_LOOKBACK_DAYS)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(source, error = %e, "Failed to fetch journey patterns");
                HashMap::new()
            });
        let trending = self
            .analytics
            .trending_topics(SIGNAL_LOOKBACK_DAYS, TRENDING_TOPICS_LIMIT)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(source, error = %e, "Failed to fetch trending topics");
                Vec::new()
            });

        tracing::info!(
            source,
            pages = engagement.len(),
            journeys = journeys.len(),
            trending = trending.len(),
            "Behaviour signals refreshed"
        );

        *self.signals.write().await = Signals {
            engagement,
            journeys,
            trending,
            fetched_at: Some(Instant::now()),
        };
    }

    async fn ensure_fresh(&self) {
        if !self.signals.read().await.is_fresh(self.ttl) {
            self.refresh_signals().await;
        }
    }

    /// Similar posts boosted by engagement, trending status and observed journeys
    pub async fn recommendations(&self, post_id: &str, limit: usize) -> Vec<EnhancedRecommendation> {
        self.ensure_fresh().await;

        let base = self
            .recommender
            .recommendations(post_id, limit.saturating_mul(2))
            .await;
        let current_path = blog_path(post_id);
        let signals = self.signals.read().await;

        let mut enhanced: Vec<EnhancedRecommendation> = base
            .into_iter()
            .map(|rec| {
                let path = blog_path(&rec.id);
                let engagement_score = signals.engagement.get(&path).copied().unwrap_or(0.0);
                let is_trending = signals.is_trending(&path);
                let journey_relevance = signals.leads_to(&current_path, &path);
                let final_score =
                    boosted_score(rec.score, engagement_score, is_trending, journey_relevance);

                EnhancedRecommendation {
                    base: rec,
                    engagement_score,
                    is_trending,
                    journey_relevance,
                    final_score,
                }
            })
            .collect();

        enhanced.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
        });
        enhanced.truncate(limit);
        enhanced
    }

    /// Trending topics that map to known posts, in trend order
    pub async fn trending(&self, limit: usize) -> Vec<TrendingRecommendation> {
        self.ensure_fresh().await;

        let signals = self.signals.read().await;
        signals
            .trending
            .iter()
            .take(limit)
            .filter_map(|topic| {
                let post_id = post_id_from_path(&topic.path)?;
                let post = self.recommender.post_details(&post_id)?;
                Some(TrendingRecommendation {
                    id: post.id.clone(),
                    title: post.title.clone(),
                    excerpt: post.excerpt.clone(),
                    trend_score: topic.trend_score,
                    unique_users: topic.unique_users,
                    is_trending: true,
                })
            })
            .collect()
    }

    pub fn analytics(&self) -> &Arc<dyn AnalyticsSource> {
        &self.analytics
    }
}
