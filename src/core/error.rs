use thiserror::Error;

use crate::graph::NodeId;

/// Structural wiring error. Raised only while a graph is being assembled;
/// stepping never produces one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("node {0:?} does not exist in this graph")]
    UnknownNode(NodeId),

    #[error("node {0:?} is not a dynamic field")]
    NotAField(NodeId),

    #[error("{side} dimensionality or dimension sizes are unknown")]
    UnknownShape { side: &'static str },

    #[error("dimensionality mismatch: {from} -> {to} without a projection")]
    DimensionalityMismatch { from: usize, to: usize },

    #[error("dimensionality mismatch between chain elements {index} and {next}: {from} -> {to}")]
    ChainDimensionalityMismatch {
        index: usize,
        next: usize,
        from: usize,
        to: usize,
    },

    #[error("shape mismatch: {from:?} -> {to:?} without a scaler or projection")]
    ShapeMismatch { from: Vec<usize>, to: Vec<usize> },

    #[error("a connection may contain at most one scaler, found {0}")]
    MultipleScalers(usize),

    #[error("projection at step {0} violates compress-first / expand-last ordering")]
    ProjectionOrder(usize),

    #[error("a projection may not both compress and expand")]
    CompressAndExpand,

    #[error("projection maps {inputs} input dimensions onto {outputs} output dimensions")]
    IndexCountMismatch { inputs: usize, outputs: usize },

    #[error("dimension index {index} out of range for dimensionality {dimensionality}")]
    DimensionOutOfRange { index: usize, dimensionality: usize },

    #[error("dimension index {0} appears more than once in a projection mapping")]
    DuplicateDimension(usize),

    #[error("unsupported projection from {from} to {to} dimensions")]
    UnsupportedProjection { from: usize, to: usize },

    #[error("kernel mode has {got} entries, kernel dimensionality is {expected}")]
    KernelDimensionMismatch { expected: usize, got: usize },

    #[error("a gauss kernel needs at least one dimension; use a box kernel on 0-D nodes")]
    ScalarGaussKernel,

    #[error("under-determined chain: dimension sizes could not be resolved")]
    UnderDetermined,
}
