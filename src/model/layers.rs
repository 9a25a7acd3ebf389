//! Spatio-temporal building blocks
//!
//! All layers work on channels-last activations shaped
//! `(batch, nodes, time, channels)`.

use tch::{nn, Kind, Tensor};

/// Gated temporal convolution
///
/// A 1-D convolution along time produces `2 * channels` outputs that are
/// combined by a GLU gate. Padding keeps the time length unchanged.
#[derive(Debug)]
pub struct TemporalConv {
    conv: nn::Conv1D,
    channels: i64,
}

impl TemporalConv {
    pub fn new(vs: &nn::Path, channels: i64, kernel_size: i64) -> Self {
        let conv = nn::conv1d(
            vs / "conv",
            channels,
            2 * channels,
            kernel_size,
            nn::ConvConfig {
                padding: (kernel_size - 1) / 2,
                ..Default::default()
            },
        );
        Self { conv, channels }
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        let (b, n, t, c) = dims4(x);
        // (B, N, T, C) -> (B*N, C, T)
        let seq = x.reshape([b * n, t, c]).permute([0, 2, 1]);
        let gated = seq.apply(&self.conv).glu(1);
        gated
            .permute([0, 2, 1])
            .reshape([b, n, t, self.channels])
    }
}

/// Chebyshev graph convolution of order `k`
///
/// `T_0 x = x`, `T_1 x = S x`, `T_k x = 2 S T_{k-1} x - T_{k-2} x`. The `k`
/// terms are concatenated on the channel axis and mixed by a linear layer.
#[derive(Debug)]
pub struct ChebGraphConv {
    theta: nn::Linear,
    order: i64,
}

impl ChebGraphConv {
    pub fn new(vs: &nn::Path, channels: i64, order: i64) -> Self {
        let theta = nn::linear(vs / "theta", order * channels, channels, Default::default());
        Self { theta, order }
    }

    /// `support` is `(batch, nodes, nodes)`
    pub fn forward(&self, x: &Tensor, support: &Tensor) -> Tensor {
        let (b, n, t, c) = dims4(x);
        let flat = x.reshape([b, n, t * c]);

        let mut terms: Vec<Tensor> = vec![flat.shallow_clone()];
        if self.order > 1 {
            terms.push(support.matmul(&flat));
        }
        for k in 2..self.order as usize {
            let next = support.matmul(&terms[k - 1]) * 2.0 - &terms[k - 2];
            terms.push(next);
        }

        let stacked: Vec<Tensor> = terms.iter().map(|term| term.reshape([b, n, t, c])).collect();
        Tensor::cat(&stacked, -1).apply(&self.theta)
    }
}

/// Scaled dot-product attention between nodes
///
/// Node summaries are averaged over time before scoring, so the weights are
/// `(batch, nodes, nodes)` and every row sums to one.
#[derive(Debug)]
pub struct SpatialAttention {
    query: nn::Linear,
    key: nn::Linear,
    scale: f64,
}

impl SpatialAttention {
    pub fn new(vs: &nn::Path, channels: i64) -> Self {
        Self {
            query: nn::linear(vs / "query", channels, channels, Default::default()),
            key: nn::linear(vs / "key", channels, channels, Default::default()),
            scale: (channels as f64).sqrt(),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        let summary = x.mean_dim(Some([2i64].as_slice()), false, Kind::Float);
        let q = summary.apply(&self.query);
        let k = summary.apply(&self.key);
        (q.matmul(&k.transpose(1, 2)) / self.scale).softmax(-1, Kind::Float)
    }
}

/// One spatial attention + temporal conv + graph conv block with a residual
#[derive(Debug)]
pub struct SpatioTemporalBlock {
    attention: SpatialAttention,
    temporal: TemporalConv,
    graph_conv: ChebGraphConv,
    batch_norm: nn::BatchNorm,
    dropout: f64,
}

impl SpatioTemporalBlock {
    pub fn new(vs: &nn::Path, channels: i64, kt: i64, order: i64, dropout: f64) -> Self {
        Self {
            attention: SpatialAttention::new(&(vs / "attention"), channels),
            temporal: TemporalConv::new(&(vs / "temporal"), channels, kt),
            graph_conv: ChebGraphConv::new(&(vs / "cheb"), channels, order),
            batch_norm: nn::batch_norm2d(vs / "bn", channels, Default::default()),
            dropout,
        }
    }

    /// Returns the block output and its attention weights
    pub fn forward_t(&self, x: &Tensor, adjacency: &Tensor, train: bool) -> (Tensor, Tensor) {
        let weights = self.attention.forward(x);
        let support = adjacency * &weights;

        let out = self.temporal.forward(x);
        let out = self.graph_conv.forward(&out, &support);

        // batch norm over channels: (B, N, T, C) -> (B, C, N, T)
        let out = out
            .permute([0, 3, 1, 2])
            .apply_t(&self.batch_norm, train)
            .permute([0, 2, 3, 1]);
        let out = out.dropout(self.dropout, train);

        ((out + x).relu(), weights)
    }
}

fn dims4(x: &Tensor) -> (i64, i64, i64, i64) {
    let size = x.size();
    (size[0], size[1], size[2], size[3])
}
