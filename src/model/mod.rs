//! Forecasting network
//!
//! - `layers`: gated temporal convolution, Chebyshev graph convolution,
//!   spatial attention and the block that combines them
//! - `network`: the full model returning predictions, attention weights and
//!   the refined adjacency

mod layers;
mod network;

pub use layers::{ChebGraphConv, SpatialAttention, SpatioTemporalBlock, TemporalConv};
pub use network::{ForecastNetwork, ForecastOutput, NetworkConfig};
