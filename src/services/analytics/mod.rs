//! Behaviour analytics over site events.
//!
//! Sources report per-page engagement, page-to-page journeys and trending
//! pages. Page keys are URL paths as produced by [`extract_path`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{JourneyStep, TrendingTopic},
};

pub mod postgres;

pub use postgres::PgAnalytics;

/// Journey transitions must occur more often than this to be reported
pub const MIN_TRANSITIONS: i64 = 2;
/// Destinations kept per source page
pub const MAX_JOURNEY_STEPS: usize = 5;
/// Days over which trend scores decay by a factor of e
pub const TREND_DECAY_DAYS: f64 = 3.0;

/// Source of page-level behaviour signals
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AnalyticsSource: Send + Sync {
    /// Engagement score (0-100) per page path over the last `days` days
    async fn engagement_metrics(&self, days: u32) -> AppResult<HashMap<String, f64>>;

    /// Most common next pages per page path over the last `days` days
    async fn journey_patterns(&self, days: u32) -> AppResult<HashMap<String, Vec<JourneyStep>>>;

    /// Blog pages with the highest recency-weighted activity
    async fn trending_topics(&self, days: u32, limit: usize) -> AppResult<Vec<TrendingTopic>>;

    /// Source name for logging
    fn name(&self) -> &'static str;
}

/// Extracts the path of a URL, dropping scheme, host, query and fragment.
///
/// Empty input yields an empty string; a URL without a path yields `/`.
pub fn extract_path(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = match without_scheme.split_once('/') {
        Some((_, rest)) => format!("/{}", rest),
        None => "/".to_string(),
    };

    path.split(['?', '#']).next().unwrap_or("/").to_string()
}

/// Composite engagement score in 0..=100, rounded to two decimals
pub fn engagement_score(
    unique_users: i64,
    page_views: i64,
    avg_engagement_secs: f64,
    scroll_events: i64,
    click_events: i64,
) -> f64 {
    let ratio = |events: i64| {
        if page_views > 0 {
            (events as f64 / page_views as f64).min(1.0)
        } else {
            0.0
        }
    };

    let user_score = (unique_users as f64 / 100.0).min(1.0) * 25.0;
    let view_score = (page_views as f64 / 500.0).min(1.0) * 20.0;
    let time_score = (avg_engagement_secs / 120.0).min(1.0) * 25.0;
    let scroll_score = ratio(scroll_events) * 15.0;
    let click_score = ratio(click_events) * 15.0;

    let total = user_score + view_score + time_score + scroll_score + click_score;
    (total * 100.0).round() / 100.0
}

/// Recency-weighted activity score
pub fn trend_score(unique_users: i64, total_events: i64, days_since_last_activity: i64) -> f64 {
    let activity = (unique_users * 2 + total_events) as f64;
    activity * (-(days_since_last_activity.max(0) as f64) / TREND_DECAY_DAYS).exp()
}

/// Whole calendar days (UTC) between the last activity and `now`
pub fn calendar_days_between(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - last_activity.date_naive()).num_days()
}

/// Groups raw `(from_url, to_url, count)` transitions into the top destinations per source path
pub fn group_journeys(
    transitions: impl IntoIterator<Item = (String, String, i64)>,
) -> HashMap<String, Vec<JourneyStep>> {
    let mut journeys: HashMap<String, Vec<JourneyStep>> = HashMap::new();

    for (from_url, to_url, count) in transitions {
        if count <= MIN_TRANSITIONS {
            continue;
        }
        let from = extract_path(&from_url);
        let to = extract_path(&to_url);
        if from.is_empty() || to.is_empty() || from == to {
            continue;
        }
        journeys.entry(from).or_default().push(JourneyStep {
            next_page: to,
            count,
        });
    }

    for steps in journeys.values_mut() {
        steps.sort_by(|a, b| b.count.cmp(&a.count));
        steps.truncate(MAX_JOURNEY_STEPS);
    }

    journeys
}

/// Post id of a `/blog/{id}` path
pub fn post_id_from_path(path: &str) -> Option<String> {
    let id = path.strip_prefix("/blog/")?.replace('/', "");
    (!id.is_empty()).then_some(id)
}
