//! Content graph construction.
//!
//! Posts are the primary nodes (indices `0..P`), keyword tags are auxiliary
//! nodes (indices `P..P+T`, in sorted tag order). Nodes are never removed, so
//! petgraph node indices coincide with these positions.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::{
    error::{AppError, AppResult},
    models::{Post, PostRecord},
    services::similarity::cosine_similarity,
};

/// Number of metadata columns appended to every node's feature vector
pub const METADATA_FEATURES: usize = 3;

/// Weight of post-tag membership edges
pub const MEMBERSHIP_EDGE_WEIGHT: f32 = 1.0;

/// Keywords recognised as tags when they appear as whole tokens
const TECH_KEYWORDS: &[&str] = &[
    "ai", "python", "javascript", "react", "nodejs", "data", "analysis", "research",
    "technology", "programming", "web", "development", "software", "algorithm", "neural",
    "network", "graph", "api", "database", "frontend", "backend", "ui", "ux", "design",
    "india", "usa", "trade", "economy", "business", "startup", "venture", "healthcare",
    "medical", "engineering", "science", "innovation",
];

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("token pattern is valid"));

/// Extracts keyword tags from a post's title and excerpt.
///
/// Tags keep the order of their first occurrence and appear at most once.
pub fn extract_tags(title: &str, excerpt: &str) -> Vec<String> {
    let text = format!("{} {}", title, excerpt).to_lowercase();
    let mut seen = BTreeSet::new();

    TOKEN_RE
        .find_iter(&text)
        .map(|m| m.as_str())
        .filter(|word| TECH_KEYWORDS.contains(word))
        .filter(|word| seen.insert(word.to_string()))
        .map(str::to_string)
        .collect()
}

/// Immutable post catalogue shared by the graph, the recommender and the learning engine
#[derive(Debug)]
pub struct Catalog {
    posts: Vec<Post>,
    index: HashMap<String, usize>,
}

impl Catalog {
    fn new(posts: Vec<Post>) -> Self {
        let mut index = HashMap::with_capacity(posts.len());
        for (idx, post) in posts.iter().enumerate() {
            if index.insert(post.id.clone(), idx).is_some() {
                tracing::warn!(post_id = %post.id, "Duplicate post id, later entry wins");
            }
        }
        Self { posts, index }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, idx: usize) -> Option<&Post> {
        self.posts.get(idx)
    }

    pub fn index_of(&self, post_id: &str) -> Option<usize> {
        self.index.get(post_id).copied()
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.index_of(post_id).and_then(|idx| self.post(idx))
    }
}

/// Loads content metadata and embeddings, then builds a [`ContentGraph`]
#[derive(Debug)]
pub struct GraphBuilder {
    records: Vec<PostRecord>,
    embeddings: Vec<Vec<f32>>,
    embedding_dim: usize,
}

impl GraphBuilder {
    /// Reads the content metadata file and the index-aligned embeddings file
    pub fn load(content_path: impl AsRef<Path>, embeddings_path: impl AsRef<Path>) -> AppResult<Self> {
        let content_path = content_path.as_ref();
        let embeddings_path = embeddings_path.as_ref();

        let records: Vec<PostRecord> = read_json(content_path)?;
        let embeddings: Vec<Vec<f32>> = read_json(embeddings_path)?;

        tracing::info!(
            posts = records.len(),
            embeddings = embeddings.len(),
            content_path = %content_path.display(),
            "Loaded content data"
        );

        Self::new(records, embeddings)
    }

    /// Creates a builder from already parsed data.
    ///
    /// The embedding dimension is taken from the first vector; every other
    /// vector must match it.
    pub fn new(records: Vec<PostRecord>, embeddings: Vec<Vec<f32>>) -> AppResult<Self> {
        let embedding_dim = embeddings.first().map(Vec::len).unwrap_or(0);

        if let Some((idx, v)) = embeddings
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != embedding_dim)
        {
            return Err(AppError::Data(format!(
                "embedding {} has dimension {}, expected {}",
                idx,
                v.len(),
                embedding_dim
            )));
        }

        if embeddings.len() < records.len() {
            tracing::warn!(
                posts = records.len(),
                embeddings = embeddings.len(),
                "Fewer embeddings than posts, missing ones are zero-filled"
            );
        }

        Ok(Self {
            records,
            embeddings,
            embedding_dim,
        })
    }

    /// Builds the graph, linking posts whose embedding similarity is strictly above `similarity_threshold`
    pub fn build(self, similarity_threshold: f32) -> ContentGraph {
        let GraphBuilder {
            records,
            mut embeddings,
            embedding_dim,
        } = self;

        let num_posts = records.len();
        embeddings.truncate(num_posts);
        embeddings.resize(num_posts, vec![0.0; embedding_dim]);

        // Metadata columns use the raw record, before display defaults are applied
        let (posts, metadata): (Vec<Post>, Vec<[f32; METADATA_FEATURES]>) = records
            .into_iter()
            .map(|record| {
                let title = record.title.as_deref().unwrap_or_default();
                let excerpt = record.excerpt.as_deref().unwrap_or_default();
                let tags = extract_tags(title, excerpt);
                let metadata = [
                    title.chars().count() as f32,
                    excerpt.chars().count() as f32,
                    tags.len() as f32,
                ];
                (Post::from_record(record, tags), metadata)
            })
            .unzip();

        let tags: Vec<String> = posts
            .iter()
            .flat_map(|post| post.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut graph = UnGraph::with_capacity(num_posts + tags.len(), 0);
        let mut features = Vec::with_capacity(num_posts + tags.len());
        for ((post, embedding), metadata) in posts.iter().zip(embeddings.iter()).zip(metadata) {
            graph.add_node(Node::Post(post.id.clone()));
            let mut row = embedding.clone();
            row.extend_from_slice(&metadata);
            features.push(row);
        }
        let mut tag_nodes: HashMap<String, NodeIndex> = HashMap::with_capacity(tags.len());
        for tag in &tags {
            tag_nodes.insert(tag.clone(), graph.add_node(Node::Tag(tag.clone())));
            let mut row = vec![0.0; embedding_dim];
            row.extend_from_slice(&[1.0, 0.0, 1.0]);
            features.push(row);
        }

        for (post_idx, post) in posts.iter().enumerate() {
            for tag in &post.tags {
                if let Some(&tag_node) = tag_nodes.get(tag) {
                    graph.add_edge(NodeIndex::new(post_idx), tag_node, MEMBERSHIP_EDGE_WEIGHT);
                }
            }
        }

        for i in 0..num_posts {
            for j in (i + 1)..num_posts {
                let similarity = cosine_similarity(&embeddings[i], &embeddings[j]);
                if similarity > similarity_threshold {
                    graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), similarity);
                }
            }
        }

        let graph = ContentGraph {
            catalog: Arc::new(Catalog::new(posts)),
            tags,
            embeddings,
            features,
            graph,
        };

        tracing::info!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            tags = graph.num_tags(),
            "Built content graph"
        );

        graph
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::Data(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Data(format!("failed to parse {}: {}", path.display(), e)))
}

/// Node payload: the post id or the tag keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Post(String),
    Tag(String),
}

/// Post/tag graph with per-node feature vectors.
///
/// Edge weights are cosine similarity for post-post links,
/// [`MEMBERSHIP_EDGE_WEIGHT`] for post-tag links, and the proposal weight
/// for links learned from interactions.
#[derive(Debug, Clone)]
pub struct ContentGraph {
    catalog: Arc<Catalog>,
    tags: Vec<String>,
    /// Raw post embeddings, one per post
    embeddings: Vec<Vec<f32>>,
    features: Vec<Vec<f32>>,
    graph: UnGraph<Node, f32>,
}

impl ContentGraph {
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn num_posts(&self) -> usize {
        self.catalog.len()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Directed edge count (each undirected edge counts twice)
    pub fn num_edges(&self) -> usize {
        self.graph.edge_count() * 2
    }

    pub fn feature_dim(&self) -> usize {
        self.features.first().map(Vec::len).unwrap_or(METADATA_FEATURES)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.tags
            .binary_search_by(|t| t.as_str().cmp(tag))
            .ok()
            .map(|i| self.num_posts() + i)
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.graph.node_weight(NodeIndex::new(idx))
    }

    pub fn features(&self) -> &[Vec<f32>] {
        &self.features
    }

    pub fn post_embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    fn index(&self, node: usize) -> Option<NodeIndex> {
        (node < self.graph.node_count()).then_some(NodeIndex::new(node))
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.index(node)
            .into_iter()
            .flat_map(|idx| self.graph.neighbors(idx))
            .map(|n| n.index())
    }

    pub fn degree(&self, node: usize) -> usize {
        self.neighbors(node).count()
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.edge_weight(a, b).is_some()
    }

    pub fn edge_weight(&self, a: usize, b: usize) -> Option<f32> {
        let (a, b) = (self.index(a)?, self.index(b)?);
        self.graph
            .find_edge(a, b)
            .and_then(|edge| self.graph.edge_weight(edge))
            .copied()
    }

    /// Adds an undirected weighted edge. Returns `false` for self loops, unknown nodes, or existing edges.
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f32) -> bool {
        match (self.index(a), self.index(b)) {
            (Some(a), Some(b)) if a != b && self.graph.find_edge(a, b).is_none() => {
                self.graph.add_edge(a, b, weight);
                true
            }
            _ => false,
        }
    }

    /// Adds `delta` to the metadata columns of a node
    pub fn bump_metadata_features(&mut self, node: usize, delta: f32) -> bool {
        match self.features.get_mut(node) {
            Some(row) => {
                let start = row.len().saturating_sub(METADATA_FEATURES);
                for value in &mut row[start..] {
                    *value += delta;
                }
                true
            }
            None => false,
        }
    }

    /// Edge list as `[sources, targets]`, both directions of every edge
    pub fn edge_index(&self) -> [Vec<usize>; 2] {
        let mut sources = Vec::with_capacity(self.num_edges());
        let mut targets = Vec::with_capacity(self.num_edges());
        for edge in self.graph.edge_references() {
            let (s, t) = (edge.source().index(), edge.target().index());
            sources.extend([s, t]);
            targets.extend([t, s]);
        }
        [sources, targets]
    }

    /// Weights aligned with [`ContentGraph::edge_index`]
    pub fn edge_weights(&self) -> Vec<f32> {
        self.graph
            .edge_references()
            .flat_map(|edge| [*edge.weight(); 2])
            .collect()
    }
}
