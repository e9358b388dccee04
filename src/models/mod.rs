use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod interaction;

pub use analytics::{JourneyStep, TrendingTopic};
pub use interaction::{Action, Interaction, InteractionRequest};

/// Raw content record as stored in the content metadata file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// A content item with its derived keyword tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub url: String,
    pub excerpt: String,
    pub tags: Vec<String>,
}

impl Post {
    /// Builds a post from its raw record, filling display defaults
    pub fn from_record(record: PostRecord, tags: Vec<String>) -> Self {
        Self {
            id: record.id,
            title: record.title.unwrap_or_else(|| "Untitled".to_string()),
            url: record.url.unwrap_or_default(),
            excerpt: record.excerpt.unwrap_or_default(),
            tags,
        }
    }

    /// Site path analytics events are recorded under
    pub fn blog_path(&self) -> String {
        blog_path(&self.id)
    }
}

/// Site path for a post id
pub fn blog_path(post_id: &str) -> String {
    format!("/blog/{}", post_id)
}

// ============================================================================
// Recommendation Output Types
// ============================================================================

/// A post recommended for another post, scored by embedding similarity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    pub url: String,
    pub excerpt: String,
    pub score: f32,
    pub tags: Vec<String>,
}

impl Recommendation {
    pub fn new(post: &Post, score: f32) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            url: post.url.clone(),
            excerpt: post.excerpt.clone(),
            score,
            tags: post.tags.clone(),
        }
    }
}

/// Recommendation re-ranked with behaviour signals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedRecommendation {
    #[serde(flatten)]
    pub base: Recommendation,
    pub engagement_score: f64,
    pub is_trending: bool,
    pub journey_relevance: bool,
    pub final_score: f64,
}

/// A post ranked by graph centrality
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPost {
    pub id: String,
    pub title: String,
    pub url: String,
    pub excerpt: String,
    pub centrality_score: f32,
    pub tags: Vec<String>,
}

/// A post ranked by recent analytics activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendingRecommendation {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub trend_score: f64,
    pub unique_users: i64,
    pub is_trending: bool,
}

/// Entry of the trending listing, from whichever source served it
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TrendingPost {
    Centrality(ScoredPost),
    Analytics(TrendingRecommendation),
}

/// Summary of the content graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub num_posts: usize,
    pub num_tags: usize,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_features_dim: usize,
    pub tags: Vec<String>,
}
