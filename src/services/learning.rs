//! Real-time learning: buffers interactions, turns them into proposed graph
//! and feature deltas, and periodically folds them into the model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::{
    config::LearningSettings,
    error::AppResult,
    models::{Action, Interaction},
    services::recommender::Recommender,
};

const NAVIGATION_EDGE_WEIGHT: f32 = 0.5;
const ENDORSEMENT_EDGE_WEIGHT: f32 = 0.8;
const SEARCH_RELEVANCE_SIGNAL: f32 = 1.0;
const FEATURE_DELTA_SCALE: f32 = 0.1;
const FINETUNE_EPOCHS: usize = 5;
/// Shortest period accepted for the update loop
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Proposed edge between two post nodes
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeProposal {
    pub source: usize,
    pub target: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureKind {
    SearchRelevance,
}

/// Proposed adjustment of a node's features
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureProposal {
    pub feature: FeatureKind,
    pub value: f32,
}

/// Cumulative learning statistics
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LearningStats {
    pub total_interactions: u64,
    pub model_updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub edge_additions: u64,
    pub feature_updates: u64,
}

/// Statistics together with the current buffer occupancy
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LearningStatsReport {
    #[serde(flatten)]
    pub stats: LearningStats,
    pub buffer_size: usize,
    pub pending_edge_updates: usize,
    pub pending_feature_updates: usize,
}

/// Summary of a single model update
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UpdateOutcome {
    pub interactions: usize,
    pub edges_added: usize,
    pub nodes_updated: usize,
    pub positive_pairs: usize,
    pub negative_pairs: usize,
}

#[derive(Default)]
struct Buffers {
    interactions: VecDeque<Interaction>,
    edge_updates: Vec<EdgeProposal>,
    feature_updates: BTreeMap<usize, Vec<FeatureProposal>>,
    stats: LearningStats,
}

/// Exported snapshot of the learned graph
#[derive(Debug, Serialize)]
struct GraphExport {
    edge_index: [Vec<usize>; 2],
    edge_weights: Vec<f32>,
    num_nodes: usize,
    num_edges: usize,
    stats: LearningStats,
    timestamp: DateTime<Utc>,
}

pub struct LearningEngine {
    recommender: Arc<Recommender>,
    settings: LearningSettings,
    buffers: Mutex<Buffers>,
}

/// Handle for stopping the periodic update loop
pub struct LearningLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl LearningLoopHandle {
    /// Signals the loop to stop and waits for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Learning loop task failed");
        }
        tracing::info!("Real-time learning engine stopped");
    }
}

impl LearningEngine {
    pub fn new(recommender: Arc<Recommender>, settings: LearningSettings) -> Self {
        Self {
            recommender,
            settings,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    /// Spawns the periodic update loop
    pub fn start(self: &Arc<Self>) -> LearningLoopHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.update_loop(shutdown_rx).await });

        tracing::info!(
            interval_secs = self.settings.update_interval.as_secs(),
            threshold = self.settings.update_threshold,
            "Real-time learning engine started"
        );

        LearningLoopHandle { shutdown_tx, task }
    }

    async fn update_loop(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = self.settings.update_interval.max(MIN_UPDATE_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let buffered = self.buffers.lock().await.interactions.len();
                    if buffered >= self.settings.update_threshold {
                        if let Err(e) = self.update_model().await {
                            tracing::error!(error = %e, "Periodic model update failed");
                        }
                    } else {
                        tracing::debug!(buffered, "Not enough interactions for a model update");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Buffers an interaction and derives proposed graph/feature updates from it
    pub async fn record_interaction(&self, interaction: Interaction) {
        let catalog = self.recommender.catalog();
        let mut buffers = self.buffers.lock().await;

        let post_idx = catalog.index_of(&interaction.post_id);
        match interaction.action {
            Action::View | Action::Click => {
                let source = interaction.source_post().and_then(|id| catalog.index_of(id));
                if let (Some(source), Some(target)) = (source, post_idx) {
                    buffers.edge_updates.push(EdgeProposal {
                        source,
                        target,
                        weight: NAVIGATION_EDGE_WEIGHT,
                    });
                }
            }
            Action::Like | Action::Share => {
                if let Some(source) = post_idx {
                    for related in interaction.related_posts() {
                        if let Some(target) = catalog.index_of(related) {
                            buffers.edge_updates.push(EdgeProposal {
                                source,
                                target,
                                weight: ENDORSEMENT_EDGE_WEIGHT,
                            });
                        }
                    }
                }
            }
            Action::SearchClick => {
                if let (Some(_), Some(idx)) = (interaction.search_query(), post_idx) {
                    buffers.feature_updates.entry(idx).or_default().push(FeatureProposal {
                        feature: FeatureKind::SearchRelevance,
                        value: SEARCH_RELEVANCE_SIGNAL,
                    });
                }
            }
            Action::Skip => {}
        }

        tracing::debug!(
            action = %interaction.action,
            post_id = %interaction.post_id,
            "Recorded interaction"
        );

        if buffers.interactions.len() >= self.settings.buffer_capacity {
            buffers.interactions.pop_front();
        }
        if self.settings.buffer_capacity > 0 {
            buffers.interactions.push_back(interaction);
        }
        buffers.stats.total_interactions += 1;
    }

    /// Folds buffered interactions and proposals into the graph and the model.
    ///
    /// Holds the model lock for the whole update. Pending proposals are
    /// drained; the interaction buffer stays a sliding window.
    pub async fn update_model(&self) -> AppResult<UpdateOutcome> {
        let mut state = self.recommender.state().write().await;
        tracing::info!("Starting model update");

        let (interactions, edge_updates, feature_updates) = {
            let mut buffers = self.buffers.lock().await;
            (
                buffers.interactions.clone(),
                std::mem::take(&mut buffers.edge_updates),
                std::mem::take(&mut buffers.feature_updates),
            )
        };

        let mut outcome = UpdateOutcome {
            interactions: interactions.len(),
            ..UpdateOutcome::default()
        };

        for proposal in &edge_updates {
            if state.graph.add_edge(proposal.source, proposal.target, proposal.weight) {
                outcome.edges_added += 1;
            }
        }

        for (node, proposals) in &feature_updates {
            let mut sums: BTreeMap<FeatureKind, (f32, usize)> = BTreeMap::new();
            for proposal in proposals {
                let entry = sums.entry(proposal.feature).or_insert((0.0, 0));
                entry.0 += proposal.value;
                entry.1 += 1;
            }
            for (feature, (sum, count)) in sums {
                let mean = sum / count as f32;
                match feature {
                    FeatureKind::SearchRelevance => {
                        if state.graph.bump_metadata_features(*node, mean * FEATURE_DELTA_SCALE) {
                            outcome.nodes_updated += 1;
                        }
                    }
                }
            }
        }

        state.refresh();

        let (positive, negative) = self.training_pairs(&interactions);
        outcome.positive_pairs = positive.len();
        outcome.negative_pairs = negative.len();
        if !positive.is_empty() || !negative.is_empty() {
            state.model.finetune(
                &positive,
                &negative,
                FINETUNE_EPOCHS,
                self.settings.learning_rate,
                self.settings.batch_size,
            );
            tracing::info!(
                positive = positive.len(),
                negative = negative.len(),
                "Fine-tuned model"
            );
            state.recompute_embeddings();
        }

        let mut buffers = self.buffers.lock().await;
        buffers.stats.model_updates += 1;
        buffers.stats.last_update = Some(Utc::now());
        buffers.stats.edge_additions += outcome.edges_added as u64;
        buffers.stats.feature_updates += outcome.nodes_updated as u64;

        tracing::info!(
            interactions = outcome.interactions,
            edges_added = outcome.edges_added,
            nodes_updated = outcome.nodes_updated,
            "Model update completed"
        );

        Ok(outcome)
    }

    /// Positive pairs come from likes/shares reached from another post, negative pairs from skips
    fn training_pairs(
        &self,
        interactions: &VecDeque<Interaction>,
    ) -> (Vec<(usize, usize)>, Vec<(usize, usize)>) {
        let catalog = self.recommender.catalog();
        let mut positive = Vec::new();
        let mut negative = Vec::new();

        for interaction in interactions {
            let Some(target) = catalog.index_of(&interaction.post_id) else {
                continue;
            };
            let Some(source) = interaction.source_post().and_then(|id| catalog.index_of(id)) else {
                continue;
            };

            match interaction.action {
                Action::Like | Action::Share => positive.push((source, target)),
                Action::Skip => negative.push((source, target)),
                _ => {}
            }
        }

        (positive, negative)
    }

    pub async fn stats(&self) -> LearningStatsReport {
        let buffers = self.buffers.lock().await;
        LearningStatsReport {
            stats: buffers.stats.clone(),
            buffer_size: buffers.interactions.len(),
            pending_edge_updates: buffers.edge_updates.len(),
            pending_feature_updates: buffers.feature_updates.values().map(Vec::len).sum(),
        }
    }

    /// Writes the current edge list and statistics as JSON
    pub async fn export_graph(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let export = {
            let state = self.recommender.state().read().await;
            GraphExport {
                edge_index: state.graph.edge_index(),
                edge_weights: state.graph.edge_weights(),
                num_nodes: state.graph.num_nodes(),
                num_edges: state.graph.num_edges(),
                stats: self.buffers.lock().await.stats.clone(),
                timestamp: Utc::now(),
            }
        };

        let json = serde_json::to_vec_pretty(&export)?;
        tokio::fs::write(path, json).await?;

        tracing::info!(path = %path.display(), edges = export.num_edges, "Exported learned graph");
        Ok(())
    }
}
