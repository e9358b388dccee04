use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::AppResult,
    models::{JourneyStep, TrendingTopic},
    services::analytics::{
        calendar_days_between, engagement_score, extract_path, group_journeys, trend_score,
        AnalyticsSource,
    },
};

/// Rows considered by the engagement query
const ENGAGEMENT_PAGE_LIMIT: i64 = 100;

#[derive(Debug, sqlx::FromRow)]
struct EngagementRow {
    page_location: String,
    unique_users: i64,
    page_views: i64,
    avg_engagement_time_sec: Option<f64>,
    scroll_events: i64,
    click_events: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    previous_page: String,
    next_page: String,
    transition_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    page_location: String,
    unique_users: i64,
    total_events: i64,
    last_activity: DateTime<Utc>,
}

/// Analytics over a GA4-style `analytics_events` table in PostgreSQL.
///
/// Query results are cached in Redis when a cache is configured.
#[derive(Clone)]
pub struct PgAnalytics {
    pool: PgPool,
    cache: Option<Cache>,
    cache_ttl: u64,
}

impl PgAnalytics {
    pub fn new(pool: PgPool, cache: Option<Cache>, cache_ttl: u64) -> Self {
        Self {
            pool,
            cache,
            cache_ttl,
        }
    }

    async fn query_engagement(&self, days: u32) -> AppResult<HashMap<String, f64>> {
        let rows = sqlx::query_as::<_, EngagementRow>(
            r#"
            SELECT
                page_location,
                COUNT(DISTINCT user_pseudo_id)::BIGINT AS unique_users,
                COUNT(*)::BIGINT AS page_views,
                (AVG(engagement_time_msec) / 1000.0)::DOUBLE PRECISION AS avg_engagement_time_sec,
                COUNT(*) FILTER (WHERE event_name = 'scroll')::BIGINT AS scroll_events,
                COUNT(*) FILTER (WHERE event_name = 'click')::BIGINT AS click_events
            FROM analytics_events
            WHERE event_timestamp >= NOW() - make_interval(days => $1)
              AND event_name IN ('page_view', 'scroll', 'click', 'user_engagement')
            GROUP BY page_location
            ORDER BY page_views DESC
            LIMIT $2
            "#,
        )
        .bind(days as i32)
        .bind(ENGAGEMENT_PAGE_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let scores: HashMap<String, f64> = rows
            .into_iter()
            .map(|row| {
                let score = engagement_score(
                    row.unique_users,
                    row.page_views,
                    row.avg_engagement_time_sec.unwrap_or(0.0),
                    row.scroll_events,
                    row.click_events,
                );
                (extract_path(&row.page_location), score)
            })
            .collect();

        tracing::info!(pages = scores.len(), days, "Retrieved engagement metrics");
        Ok(scores)
    }

    async fn query_journeys(&self, days: u32) -> AppResult<HashMap<String, Vec<JourneyStep>>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            r#"
            WITH page_views AS (
                SELECT
                    page_location,
                    LAG(page_location) OVER (
                        PARTITION BY user_pseudo_id
                        ORDER BY event_timestamp
                    ) AS previous_page
                FROM analytics_events
                WHERE event_timestamp >= NOW() - make_interval(days => $1)
                  AND event_name = 'page_view'
            )
            SELECT
                previous_page,
                page_location AS next_page,
                COUNT(*)::BIGINT AS transition_count
            FROM page_views
            WHERE previous_page IS NOT NULL
              AND previous_page <> page_location
            GROUP BY previous_page, page_location
            ORDER BY previous_page, transition_count DESC
            "#,
        )
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await?;

        let journeys = group_journeys(
            rows.into_iter()
                .map(|row| (row.previous_page, row.next_page, row.transition_count)),
        );

        tracing::info!(pages = journeys.len(), days, "Analyzed journey patterns");
        Ok(journeys)
    }

    async fn query_trending(&self, days: u32, limit: usize) -> AppResult<Vec<TrendingTopic>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT
                page_location,
                COUNT(DISTINCT user_pseudo_id)::BIGINT AS unique_users,
                COUNT(*)::BIGINT AS total_events,
                MAX(event_timestamp) AS last_activity
            FROM analytics_events
            WHERE event_timestamp >= NOW() - make_interval(days => $1)
              AND event_name IN ('page_view', 'scroll', 'user_engagement')
            GROUP BY page_location
            "#,
        )
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut topics: Vec<TrendingTopic> = rows
            .into_iter()
            .filter_map(|row| {
                let path = extract_path(&row.page_location);
                if !path.starts_with("/blog/") {
                    return None;
                }
                let age_days = calendar_days_between(row.last_activity, now);
                Some(TrendingTopic {
                    path,
                    unique_users: row.unique_users,
                    total_events: row.total_events,
                    trend_score: trend_score(row.unique_users, row.total_events, age_days),
                })
            })
            .collect();

        topics.sort_by(|a, b| {
            b.trend_score
                .partial_cmp(&a.trend_score)
                .unwrap_or(Ordering::Equal)
        });
        topics.truncate(limit);

        tracing::info!(topics = topics.len(), days, "Found trending topics");
        Ok(topics)
    }
}

#[async_trait::async_trait]
impl AnalyticsSource for PgAnalytics {
    async fn engagement_metrics(&self, days: u32) -> AppResult<HashMap<String, f64>> {
        match &self.cache {
            Some(cache) => cached!(
                cache,
                CacheKey::Engagement(days),
                self.cache_ttl,
                self.query_engagement(days)
            ),
            None => self.query_engagement(days).await,
        }
    }

    async fn journey_patterns(&self, days: u32) -> AppResult<HashMap<String, Vec<JourneyStep>>> {
        match &self.cache {
            Some(cache) => cached!(
                cache,
                CacheKey::Journeys(days),
                self.cache_ttl,
                self.query_journeys(days)
            ),
            None => self.query_journeys(days).await,
        }
    }

    async fn trending_topics(&self, days: u32, limit: usize) -> AppResult<Vec<TrendingTopic>> {
        match &self.cache {
            Some(cache) => cached!(
                cache,
                CacheKey::Trending { days, limit },
                self.cache_ttl,
                self.query_trending(days, limit)
            ),
            None => self.query_trending(days, limit).await,
        }
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
