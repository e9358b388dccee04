use serde::Deserialize;
use std::time::Duration;

/// How recommendation scores are computed
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Cosine similarity over embeddings produced by the graph model
    Graph,
    /// Cosine similarity over the raw, externally produced embeddings
    Pretrained,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// JSON array of content metadata (id, title, url, excerpt)
    #[serde(default = "default_content_path")]
    pub content_path: String,

    /// JSON array of embedding vectors, index-aligned with the content file
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: String,

    /// Post-post edges require cosine similarity strictly above this value
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Number of adjacency propagation steps before projection
    #[serde(default = "default_propagation_hops")]
    pub propagation_hops: usize,

    /// Output dimension of the learned node embeddings
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Unsupervised training epochs at startup (0 skips training)
    #[serde(default = "default_train_epochs")]
    pub train_epochs: usize,

    #[serde(default = "default_train_learning_rate")]
    pub train_learning_rate: f32,

    #[serde(default = "default_scoring_mode")]
    pub scoring_mode: ScoringMode,

    /// Enables the interaction buffer and periodic model updates
    #[serde(default = "default_realtime_learning")]
    pub realtime_learning: bool,

    #[serde(default = "default_learning_update_interval_secs")]
    pub learning_update_interval_secs: u64,

    /// Minimum buffered interactions before a periodic update runs
    #[serde(default = "default_learning_update_threshold")]
    pub learning_update_threshold: usize,

    #[serde(default = "default_learning_buffer_capacity")]
    pub learning_buffer_capacity: usize,

    #[serde(default = "default_finetune_learning_rate")]
    pub finetune_learning_rate: f32,

    #[serde(default = "default_finetune_batch_size")]
    pub finetune_batch_size: usize,

    /// PostgreSQL URL of the analytics events warehouse. Analytics are disabled when unset.
    pub database_url: Option<String>,

    /// Redis URL used to cache analytics query results
    pub redis_url: Option<String>,

    #[serde(default = "default_analytics_cache_ttl_secs")]
    pub analytics_cache_ttl_secs: u64,

    /// Destination of `POST /graph/export`
    #[serde(default = "default_graph_export_path")]
    pub graph_export_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_content_path() -> String {
    "data/semantic-mapping.json".to_string()
}

fn default_embeddings_path() -> String {
    "data/semantic-embeddings.json".to_string()
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_propagation_hops() -> usize {
    2
}

fn default_embedding_dim() -> usize {
    64
}

fn default_train_epochs() -> usize {
    50
}

fn default_train_learning_rate() -> f32 {
    0.01
}

fn default_scoring_mode() -> ScoringMode {
    ScoringMode::Graph
}

fn default_realtime_learning() -> bool {
    true
}

fn default_learning_update_interval_secs() -> u64 {
    300
}

fn default_learning_update_threshold() -> usize {
    50
}

fn default_learning_buffer_capacity() -> usize {
    1000
}

fn default_finetune_learning_rate() -> f32 {
    0.001
}

fn default_finetune_batch_size() -> usize {
    32
}

fn default_analytics_cache_ttl_secs() -> u64 {
    3600
}

fn default_graph_export_path() -> String {
    "learned_graph.json".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the services cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.learning_update_interval_secs == 0 {
            anyhow::bail!("LEARNING_UPDATE_INTERVAL_SECS must be at least 1");
        }
        if self.embedding_dim == 0 {
            anyhow::bail!("EMBEDDING_DIM must be positive");
        }
        Ok(())
    }

    /// Settings for building and training the recommender
    pub fn recommender_settings(&self) -> RecommenderSettings {
        RecommenderSettings {
            content_path: self.content_path.clone(),
            embeddings_path: self.embeddings_path.clone(),
            similarity_threshold: self.similarity_threshold,
            propagation_hops: self.propagation_hops,
            embedding_dim: self.embedding_dim,
            train_epochs: self.train_epochs,
            train_learning_rate: self.train_learning_rate,
            scoring_mode: self.scoring_mode,
        }
    }

    /// Settings for the real-time learning engine
    pub fn learning_settings(&self) -> LearningSettings {
        LearningSettings {
            update_interval: Duration::from_secs(self.learning_update_interval_secs),
            update_threshold: self.learning_update_threshold,
            buffer_capacity: self.learning_buffer_capacity,
            learning_rate: self.finetune_learning_rate,
            batch_size: self.finetune_batch_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecommenderSettings {
    pub content_path: String,
    pub embeddings_path: String,
    pub similarity_threshold: f32,
    pub propagation_hops: usize,
    pub embedding_dim: usize,
    pub train_epochs: usize,
    pub train_learning_rate: f32,
    pub scoring_mode: ScoringMode,
}

#[derive(Debug, Clone)]
pub struct LearningSettings {
    pub update_interval: Duration,
    pub update_threshold: usize,
    pub buffer_capacity: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(default_learning_update_interval_secs()),
            update_threshold: default_learning_update_threshold(),
            buffer_capacity: default_learning_buffer_capacity(),
            learning_rate: default_finetune_learning_rate(),
            batch_size: default_finetune_batch_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_environment() {
        let config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.scoring_mode, ScoringMode::Graph);
        assert!(config.realtime_learning);
        assert!(config.database_url.is_none());
        assert_eq!(config.learning_settings().update_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides_from_environment() {
        let vars = vec![
            ("PORT".to_string(), "9100".to_string()),
            ("SCORING_MODE".to_string(), "pretrained".to_string()),
            ("SIMILARITY_THRESHOLD".to_string(), "0.5".to_string()),
            ("DATABASE_URL".to_string(), "postgres://localhost/ga4".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.scoring_mode, ScoringMode::Pretrained);
        assert_eq!(config.recommender_settings().similarity_threshold, 0.5);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/ga4"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let vars = vec![(
            "LEARNING_UPDATE_INTERVAL_SECS".to_string(),
            "0".to_string(),
        )];
        let config: Config = envy::from_iter(vars).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LEARNING_UPDATE_INTERVAL_SECS"));
    }
}
