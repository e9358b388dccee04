//! Propagate-then-project graph model.
//!
//! Node features are smoothed over the symmetric normalised adjacency with
//! self loops (`D^-1/2 (A + I) D^-1/2`) for a fixed number of hops, then
//! projected by a single trainable weight matrix. Training pulls the
//! embeddings of connected nodes together; fine-tuning pulls positive pairs
//! together and pushes negative pairs apart.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::services::graph::ContentGraph;

const WEIGHT_SEED: u64 = 0x5eed_6e4e;
const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;

/// Dense row-major matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix from equally sized rows
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            debug_assert_eq!(row.len(), cols);
            data.extend_from_slice(row);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// `self · other`
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.cols, other.rows);
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            let lhs = self.row(i);
            let dst = out.row_mut(i);
            for (k, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (d, &b) in dst.iter_mut().zip(other.row(k)) {
                    *d += a * b;
                }
            }
        }
        out
    }

    /// `selfᵀ · other`
    pub fn transpose_matmul(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.rows, other.rows);
        let mut out = Matrix::zeros(self.cols, other.cols);
        for r in 0..self.rows {
            let lhs = self.row(r);
            let rhs = other.row(r);
            for (i, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (d, &b) in out.row_mut(i).iter_mut().zip(rhs) {
                    *d += a * b;
                }
            }
        }
        out
    }
}

/// Cosine similarity of `a` and `b` with its gradients with respect to both.
///
/// Degenerate (zero norm) inputs yield zero similarity and zero gradients.
fn cosine_with_grad(a: &[f32], b: &[f32]) -> (f32, Vec<f32>, Vec<f32>) {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return (0.0, vec![0.0; a.len()], vec![0.0; b.len()]);
    }

    let cos = dot / (norm_a * norm_b);
    let grad_a = a
        .iter()
        .zip(b)
        .map(|(x, y)| y / (norm_a * norm_b) - cos * x / (norm_a * norm_a))
        .collect();
    let grad_b = a
        .iter()
        .zip(b)
        .map(|(x, y)| x / (norm_a * norm_b) - cos * y / (norm_b * norm_b))
        .collect();

    (cos, grad_a, grad_b)
}

fn add_scaled(dst: &mut [f32], src: &[f32], scale: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += scale * s;
    }
}

/// Adam moment estimates for one optimisation run
struct Adam {
    lr: f32,
    step: i32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    fn new(size: usize, lr: f32) -> Self {
        Self {
            lr,
            step: 0,
            m: vec![0.0; size],
            v: vec![0.0; size],
        }
    }

    fn apply(&mut self, params: &mut [f32], grads: &[f32]) {
        self.step += 1;
        let bias1 = 1.0 - ADAM_BETA1.powi(self.step);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.step);

        for (i, (p, g)) in params.iter_mut().zip(grads).enumerate() {
            self.m[i] = ADAM_BETA1 * self.m[i] + (1.0 - ADAM_BETA1) * g;
            self.v[i] = ADAM_BETA2 * self.v[i] + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
        }
    }
}

/// Graph model with a single trainable projection
#[derive(Debug, Clone)]
pub struct GraphModel {
    hops: usize,
    weights: Matrix,
    /// Node features after propagation, refreshed whenever the graph changes
    propagated: Matrix,
}

impl GraphModel {
    /// Creates a model for `graph` with deterministically initialised weights
    pub fn new(graph: &ContentGraph, embedding_dim: usize, hops: usize) -> Self {
        let input_dim = graph.feature_dim();
        let limit = (6.0 / (input_dim + embedding_dim) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(WEIGHT_SEED);

        let mut weights = Matrix::zeros(input_dim, embedding_dim);
        for w in weights.data.iter_mut() {
            *w = rng.random_range(-limit..limit);
        }

        Self {
            hops,
            weights,
            propagated: propagate(graph, hops),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.rows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.weights.cols()
    }

    /// Recomputes propagated features after the graph's edges or features changed
    pub fn sync_graph(&mut self, graph: &ContentGraph) {
        self.propagated = propagate(graph, self.hops);
    }

    /// Node embeddings, one row per node
    pub fn embed(&self) -> Matrix {
        self.propagated.matmul(&self.weights)
    }

    /// Unsupervised training: maximise the mean cosine similarity over all
    /// directed edges. Returns the final loss, or `None` when the graph has no edges.
    pub fn train(&mut self, graph: &ContentGraph, epochs: usize, lr: f32) -> Option<f32> {
        let [sources, targets] = graph.edge_index();
        if sources.is_empty() || epochs == 0 {
            return None;
        }
        let pairs: Vec<(usize, usize)> = sources.into_iter().zip(targets).collect();
        let scale = 1.0 / pairs.len() as f32;

        let mut adam = Adam::new(self.weights.data.len(), lr);
        let mut loss = 0.0;

        for epoch in 0..epochs {
            let embeddings = self.embed();
            let mut grad = Matrix::zeros(embeddings.rows(), embeddings.cols());
            let mut total = 0.0;

            for &(src, dst) in &pairs {
                let (cos, grad_src, grad_dst) =
                    cosine_with_grad(embeddings.row(src), embeddings.row(dst));
                total += cos;
                add_scaled(grad.row_mut(src), &grad_src, -scale);
                add_scaled(grad.row_mut(dst), &grad_dst, -scale);
            }

            loss = -total * scale;
            self.step(&mut adam, &grad);

            if epoch % 10 == 0 {
                tracing::debug!(epoch, loss, "Training epoch");
            }
        }

        tracing::info!(epochs, loss, edges = pairs.len(), "Graph model trained");
        Some(loss)
    }

    /// Fine-tunes on interaction-derived pairs: positive pairs should embed
    /// similarly, negative pairs dissimilarly. Uses at most `batch_size / 2`
    /// pairs of each kind (at least one). Returns the last loss, or `None` when there are no pairs.
    pub fn finetune(
        &mut self,
        positive: &[(usize, usize)],
        negative: &[(usize, usize)],
        epochs: usize,
        lr: f32,
        batch_size: usize,
    ) -> Option<f32> {
        let per_kind = (batch_size / 2).max(1);
        let positive = &positive[..positive.len().min(per_kind)];
        let negative = &negative[..negative.len().min(per_kind)];
        if positive.is_empty() && negative.is_empty() {
            return None;
        }

        let nodes = self.propagated.rows();
        let in_range = |&(a, b): &(usize, usize)| a < nodes && b < nodes;

        let mut adam = Adam::new(self.weights.data.len(), lr);
        let mut loss = 0.0;

        for _ in 0..epochs {
            let embeddings = self.embed();
            let mut grad = Matrix::zeros(embeddings.rows(), embeddings.cols());
            let mut total = 0.0;

            for &(src, dst) in positive.iter().filter(|p| in_range(*p)) {
                let (cos, grad_src, grad_dst) =
                    cosine_with_grad(embeddings.row(src), embeddings.row(dst));
                total += 1.0 - cos;
                add_scaled(grad.row_mut(src), &grad_src, -1.0);
                add_scaled(grad.row_mut(dst), &grad_dst, -1.0);
            }
            for &(src, dst) in negative.iter().filter(|p| in_range(*p)) {
                let (cos, grad_src, grad_dst) =
                    cosine_with_grad(embeddings.row(src), embeddings.row(dst));
                total += cos;
                add_scaled(grad.row_mut(src), &grad_src, 1.0);
                add_scaled(grad.row_mut(dst), &grad_dst, 1.0);
            }

            loss = total;
            if total > 0.0 {
                self.step(&mut adam, &grad);
            }
        }

        Some(loss)
    }

    /// Back-propagates an embedding gradient through the projection and applies one optimiser step
    fn step(&mut self, adam: &mut Adam, embedding_grad: &Matrix) {
        let weight_grad = self.propagated.transpose_matmul(embedding_grad);
        adam.apply(&mut self.weights.data, &weight_grad.data);
    }
}

/// Applies `hops` rounds of symmetric normalised propagation with self loops
fn propagate(graph: &ContentGraph, hops: usize) -> Matrix {
    let mut current = Matrix::from_rows(graph.features());
    let nodes = current.rows();
    let inv_sqrt_degree: Vec<f32> = (0..nodes)
        .map(|n| 1.0 / ((graph.degree(n) + 1) as f32).sqrt())
        .collect();

    for _ in 0..hops {
        let mut next = Matrix::zeros(nodes, current.cols());
        for node in 0..nodes {
            let dst = next.row_mut(node);
            let self_weight = inv_sqrt_degree[node] * inv_sqrt_degree[node];
            add_scaled(dst, current.row(node), self_weight);
            for neighbor in graph.neighbors(node) {
                add_scaled(
                    dst,
                    current.row(neighbor),
                    inv_sqrt_degree[node] * inv_sqrt_degree[neighbor],
                );
            }
        }
        current = next;
    }

    current
}
