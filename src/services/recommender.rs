use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    config::{RecommenderSettings, ScoringMode},
    error::{AppError, AppResult},
    models::{GraphStats, Post, Recommendation, ScoredPost},
    services::{
        graph::{Catalog, ContentGraph, GraphBuilder},
        model::{GraphModel, Matrix},
        similarity::{cosine_similarity, l2_norm},
    },
};

/// Graph, model parameters and the embeddings derived from them.
///
/// Guarded by a single lock: anything that mutates the graph or the weights
/// must call [`ModelState::refresh`] before releasing it.
pub struct ModelState {
    pub graph: ContentGraph,
    pub model: GraphModel,
    scoring_mode: ScoringMode,
    embeddings: Matrix,
}

impl ModelState {
    fn new(graph: ContentGraph, model: GraphModel, scoring_mode: ScoringMode) -> Self {
        let mut state = Self {
            graph,
            model,
            scoring_mode,
            embeddings: Matrix::zeros(0, 0),
        };
        state.refresh();
        state
    }

    /// Recomputes propagated features and the cached post embeddings
    pub fn refresh(&mut self) {
        self.model.sync_graph(&self.graph);
        self.recompute_embeddings();
    }

    /// Recomputes the cached embeddings after the weights changed
    pub fn recompute_embeddings(&mut self) {
        self.embeddings = match self.scoring_mode {
            ScoringMode::Graph => self.model.embed(),
            ScoringMode::Pretrained => Matrix::from_rows(self.graph.post_embeddings()),
        };
    }

    /// Embedding used for scoring the post at `idx`
    pub fn post_embedding(&self, idx: usize) -> &[f32] {
        self.embeddings.row(idx)
    }
}

/// Serves recommendations and centrality rankings over the content graph
pub struct Recommender {
    catalog: Arc<Catalog>,
    state: RwLock<ModelState>,
}

impl Recommender {
    /// Loads content data, builds the graph and trains the model.
    ///
    /// CPU bound; call from a blocking context.
    pub fn initialize(settings: &RecommenderSettings) -> AppResult<Self> {
        let builder = GraphBuilder::load(&settings.content_path, &settings.embeddings_path)?;
        Self::from_builder(builder, settings)
    }

    /// Builds and trains from an already loaded [`GraphBuilder`]
    pub fn from_builder(builder: GraphBuilder, settings: &RecommenderSettings) -> AppResult<Self> {
        if settings.embedding_dim == 0 {
            return Err(AppError::InvalidInput(
                "embedding dimension must be positive".to_string(),
            ));
        }

        let graph = builder.build(settings.similarity_threshold);
        if graph.num_posts() == 0 {
            return Err(AppError::Data("content file contains no posts".to_string()));
        }

        let mut model = GraphModel::new(&graph, settings.embedding_dim, settings.propagation_hops);

        let scoring_mode = match settings.scoring_mode {
            ScoringMode::Graph => {
                match model.train(&graph, settings.train_epochs, settings.train_learning_rate) {
                    Some(_) => ScoringMode::Graph,
                    None if settings.train_epochs == 0 => {
                        tracing::warn!("Training disabled, falling back to pretrained embeddings");
                        ScoringMode::Pretrained
                    }
                    None => {
                        tracing::warn!("Graph has no edges, scoring with untrained projection");
                        ScoringMode::Graph
                    }
                }
            }
            ScoringMode::Pretrained => ScoringMode::Pretrained,
        };

        tracing::info!(
            posts = graph.num_posts(),
            tags = graph.num_tags(),
            edges = graph.num_edges(),
            scoring_mode = ?scoring_mode,
            "Recommender initialized"
        );

        Ok(Self {
            catalog: graph.catalog().clone(),
            state: RwLock::new(ModelState::new(graph, model, scoring_mode)),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Lock guarding the graph and model parameters
    pub fn state(&self) -> &RwLock<ModelState> {
        &self.state
    }

    /// Posts most similar to `post_id`, best first, never including the post itself.
    ///
    /// Unknown ids yield an empty list.
    pub async fn recommendations(&self, post_id: &str, limit: usize) -> Vec<Recommendation> {
        let Some(target) = self.catalog.index_of(post_id) else {
            tracing::debug!(post_id = %post_id, "Recommendations requested for unknown post");
            return Vec::new();
        };

        let state = self.state.read().await;
        let query = state.post_embedding(target);

        let mut scored: Vec<(usize, f32)> = (0..self.catalog.len())
            .filter(|&idx| idx != target)
            .map(|idx| (idx, cosine_similarity(query, state.post_embedding(idx))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        scored
            .into_iter()
            .take(limit)
            .filter_map(|(idx, score)| {
                self.catalog
                    .post(idx)
                    .map(|post| Recommendation::new(post, score))
            })
            .collect()
    }

    /// All posts ranked by centrality (norm of the node embedding), highest first
    pub async fn posts_with_scores(&self) -> Vec<ScoredPost> {
        let state = self.state.read().await;

        let mut posts: Vec<ScoredPost> = self
            .catalog
            .posts()
            .iter()
            .enumerate()
            .map(|(idx, post)| ScoredPost {
                id: post.id.clone(),
                title: post.title.clone(),
                url: post.url.clone(),
                excerpt: post.excerpt.clone(),
                centrality_score: l2_norm(state.post_embedding(idx)),
                tags: post.tags.clone(),
            })
            .collect();

        posts.sort_by(|a, b| {
            b.centrality_score
                .partial_cmp(&a.centrality_score)
                .unwrap_or(Ordering::Equal)
        });
        posts
    }

    pub async fn trending(&self, limit: usize) -> Vec<ScoredPost> {
        let mut posts = self.posts_with_scores().await;
        posts.truncate(limit);
        posts
    }

    pub fn post_details(&self, post_id: &str) -> Option<&Post> {
        self.catalog.get(post_id)
    }

    pub fn posts(&self) -> &[Post] {
        self.catalog.posts()
    }

    pub async fn num_edges(&self) -> usize {
        self.state.read().await.graph.num_edges()
    }

    pub async fn graph_stats(&self) -> GraphStats {
        let state = self.state.read().await;
        GraphStats {
            num_posts: state.graph.num_posts(),
            num_tags: state.graph.num_tags(),
            total_nodes: state.graph.num_nodes(),
            total_edges: state.graph.num_edges(),
            node_features_dim: state.graph.feature_dim(),
            tags: state.graph.tags().to_vec(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::graph::tests::sample_builder;

    pub(crate) fn settings(scoring_mode: ScoringMode) -> RecommenderSettings {
        RecommenderSettings {
            content_path: String::new(),
            embeddings_path: String::new(),
            similarity_threshold: 0.3,
            propagation_hops: 2,
            embedding_dim: 8,
            train_epochs: 10,
            train_learning_rate: 0.01,
            scoring_mode,
        }
    }

    pub(crate) fn sample_recommender() -> Recommender {
        Recommender::from_builder(sample_builder(), &settings(ScoringMode::Graph)).unwrap()
    }

    #[tokio::test]
    async fn test_recommendations_exclude_self_and_are_sorted() {
        let recommender = sample_recommender();
        let recs = recommender.recommendations("neural-nets", 3).await;

        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.id != "neural-nets"));
        assert!(recs.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(recs.iter().all(|r| (-1.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn test_recommendations_respect_limit() {
        let recommender = sample_recommender();
        assert_eq!(recommender.recommendations("neural-nets", 1).await.len(), 1);
        assert_eq!(recommender.recommendations("neural-nets", 100).await.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_post_yields_empty() {
        let recommender = sample_recommender();
        assert!(recommender.recommendations("does-not-exist", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_pretrained_mode_ranks_by_raw_embeddings() {
        let recommender =
            Recommender::from_builder(sample_builder(), &settings(ScoringMode::Pretrained)).unwrap();

        let recs = recommender.recommendations("neural-nets", 1).await;
        assert_eq!(recs[0].id, "graph-learning");

        let recs = recommender.recommendations("india-usa-trade", 1).await;
        assert_eq!(recs[0].id, "startup-economy");
    }

    #[tokio::test]
    async fn test_zero_epochs_falls_back_to_pretrained() {
        let mut settings = settings(ScoringMode::Graph);
        settings.train_epochs = 0;
        let recommender = Recommender::from_builder(sample_builder(), &settings).unwrap();

        let state = recommender.state().read().await;
        assert_eq!(state.post_embedding(0), &[1.0, 0.1, 0.0]);
    }

    #[tokio::test]
    async fn test_posts_with_scores_sorted_by_centrality() {
        let recommender = sample_recommender();
        let posts = recommender.posts_with_scores().await;

        assert_eq!(posts.len(), 4);
        assert!(posts
            .windows(2)
            .all(|w| w[0].centrality_score >= w[1].centrality_score));
        assert!(posts.iter().all(|p| p.centrality_score >= 0.0));
        assert_eq!(recommender.trending(2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_graph_stats() {
        let recommender = sample_recommender();
        let stats = recommender.graph_stats().await;

        assert_eq!(stats.num_posts, 4);
        assert_eq!(stats.total_nodes, stats.num_posts + stats.num_tags);
        assert_eq!(stats.node_features_dim, 6);
        assert_eq!(stats.tags.len(), stats.num_tags);
        assert_eq!(recommender.num_edges().await, stats.total_edges);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let builder = GraphBuilder::new(vec![], vec![]).unwrap();
        let result = Recommender::from_builder(builder, &settings(ScoringMode::Graph));
        assert!(matches!(result, Err(AppError::Data(_))));
    }

    #[test]
    fn test_post_details() {
        let recommender = sample_recommender();
        assert_eq!(
            recommender.post_details("graph-learning").map(|p| p.title.as_str()),
            Some("Graph learning")
        );
        assert!(recommender.post_details("missing").is_none());
    }
}
