//! Graph supports
//!
//! - Static support: scaled Laplacian of the sensor distance graph
//! - Adaptive support: per-batch affinity matrices aggregated over the
//!   training split

mod adaptive;
mod static_graph;

pub use adaptive::{
    global_adjacency, kernel_for, node_profiles, AdaptiveAdjacency, AdjacencyStack, AffinityKernel,
    CorrelationKernel, KlKernel,
};
pub use static_graph::{load_adjacency_matrix, scaled_laplacian};
