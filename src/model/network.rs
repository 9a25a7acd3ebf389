//! Dynamic adaptive graph convolutional network
//!
//! Input projection, stacked spatio-temporal blocks over a refined adjacency,
//! and an output head that maps the full recent window to the forecast
//! horizon of every node.

use tch::{nn, Device, Kind, Tensor};

use super::layers::SpatioTemporalBlock;
use crate::error::{DagcnError, Result};
use crate::utils::ModelConfig;

/// Configuration for the forecasting network
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Input channels taken from the front of the feature axis
    pub c_in: i64,
    /// Hidden width
    pub c_out: i64,
    pub num_nodes: i64,
    /// Recent window length
    pub recent: i64,
    /// Forecast steps
    pub horizon: i64,
    /// Chebyshev order
    pub k: i64,
    /// Temporal kernel width
    pub kt: i64,
    pub num_blocks: usize,
    /// Width of the node embeddings behind the learned adjacency
    pub embed_dim: i64,
    pub dropout: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            c_in: 1,
            c_out: 64,
            num_nodes: 307,
            recent: 24,
            horizon: 12,
            k: 2,
            kt: 3,
            num_blocks: 2,
            embed_dim: 10,
            dropout: 0.1,
        }
    }
}

impl NetworkConfig {
    pub fn from_model_config(model: &ModelConfig, num_nodes: usize, horizon: usize) -> Self {
        Self {
            c_in: model.c_in,
            c_out: model.c_out,
            num_nodes: num_nodes as i64,
            recent: model.length,
            horizon: horizon as i64,
            k: model.k,
            kt: model.kt,
            num_blocks: model.num_blocks,
            embed_dim: model.embed_dim,
            dropout: model.dropout,
        }
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(DagcnError::Config(msg));
        if self.kt <= 0 || self.kt % 2 == 0 {
            return fail(format!("temporal kernel kt = {} must be odd and positive", self.kt));
        }
        if self.k <= 0 {
            return fail("Chebyshev order k must be positive".into());
        }
        if self.c_in <= 0 || self.c_out <= 0 || self.embed_dim <= 0 {
            return fail("c_in, c_out and embed_dim must be positive".into());
        }
        if self.num_nodes <= 0 || self.recent <= 0 || self.horizon <= 0 {
            return fail("num_nodes, recent and horizon must be positive".into());
        }
        if self.num_blocks == 0 {
            return fail("at least one spatio-temporal block is required".into());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout {} must lie in [0, 1)", self.dropout));
        }
        Ok(())
    }
}

/// Everything one forward pass produces
#[derive(Debug)]
pub struct ForecastOutput {
    /// `(batch, nodes, horizon)`
    pub prediction: Tensor,
    /// Attention of the last block, `(batch, nodes, nodes)`
    pub spatial_weights: Tensor,
    /// Support plus learned adjacency, `(nodes, nodes)`
    pub refined_adjacency: Tensor,
}

/// Forecasting network
#[derive(Debug)]
pub struct ForecastNetwork {
    input: nn::Linear,
    source_embedding: Tensor,
    target_embedding: Tensor,
    blocks: Vec<SpatioTemporalBlock>,
    head: nn::Conv1D,
    config: NetworkConfig,
    device: Device,
}

impl ForecastNetwork {
    /// Create the network inside `vs`
    pub fn new(vs: &nn::Path, config: NetworkConfig) -> Result<Self> {
        config.validate()?;

        let input = nn::linear(vs / "input", config.c_in, config.c_out, Default::default());

        let init = nn::Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        let source_embedding = vs.var("source_embedding", &[config.num_nodes, config.embed_dim], init);
        let target_embedding = vs.var("target_embedding", &[config.num_nodes, config.embed_dim], init);

        let blocks = (0..config.num_blocks)
            .map(|i| {
                SpatioTemporalBlock::new(
                    &(vs / format!("block_{}", i)),
                    config.c_out,
                    config.kt,
                    config.k,
                    config.dropout,
                )
            })
            .collect();

        // one kernel spans the whole window: (B*N, C, T) -> (B*N, horizon, 1)
        let head = nn::conv1d(
            vs / "head",
            config.c_out,
            config.horizon,
            config.recent,
            Default::default(),
        );

        Ok(Self {
            input,
            source_embedding,
            target_embedding,
            blocks,
            head,
            device: vs.device(),
            config,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Recent window `(batch, channels, nodes, time)`
    /// * `support` - Dense `(nodes, nodes)` support
    /// * `train` - Enables dropout and batch statistics
    pub fn forward_t(&self, x: &Tensor, support: &Tensor, train: bool) -> Result<ForecastOutput> {
        self.check_input(x)?;
        self.check_support(support)?;
        let n = self.config.num_nodes;
        let batch = x.size()[0];

        // (B, F, N, T) -> (B, N, T, c_in) -> (B, N, T, c_out)
        let mut out = x
            .narrow(1, 0, self.config.c_in)
            .permute([0, 2, 3, 1])
            .apply(&self.input);

        let refined_adjacency = support + self.learned_adjacency();

        let mut spatial_weights = Tensor::zeros([batch, n, n], (Kind::Float, self.device));
        for block in &self.blocks {
            let (next, weights) = block.forward_t(&out, &refined_adjacency, train);
            out = next;
            spatial_weights = weights;
        }

        let seq = out
            .reshape([batch * n, self.config.recent, self.config.c_out])
            .permute([0, 2, 1]);
        let prediction = seq
            .apply(&self.head)
            .reshape([batch, n, self.config.horizon]);

        Ok(ForecastOutput {
            prediction,
            spatial_weights,
            refined_adjacency,
        })
    }

    /// Row-normalized `ReLU(E1 E2^T)`
    pub fn learned_adjacency(&self) -> Tensor {
        self.source_embedding
            .matmul(&self.target_embedding.transpose(0, 1))
            .relu()
            .softmax(-1, Kind::Float)
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let size = x.size();
        let ok = size.len() == 4
            && size[0] > 0
            && size[1] >= self.config.c_in
            && size[2] == self.config.num_nodes
            && size[3] == self.config.recent;
        if ok {
            Ok(())
        } else {
            Err(DagcnError::shape(
                "network input",
                format!(
                    "(batch, >= {}, {}, {})",
                    self.config.c_in, self.config.num_nodes, self.config.recent
                ),
                size,
            ))
        }
    }

    fn check_support(&self, support: &Tensor) -> Result<()> {
        let n = self.config.num_nodes;
        let size = support.size();
        if size == [n, n] {
            Ok(())
        } else {
            Err(DagcnError::shape("support matrix", format!("({}, {})", n, n), size))
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }
}
