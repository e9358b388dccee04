use serde::{Deserialize, Serialize};

/// A page commonly visited after another page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JourneyStep {
    pub next_page: String,
    pub count: i64,
}

/// A page with recent, recency-weighted activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendingTopic {
    pub path: String,
    pub unique_users: i64,
    pub total_events: i64,
    pub trend_score: f64,
}
