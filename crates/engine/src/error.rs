//! The top-level error taxonomy (§7): every subsystem error composes
//! into one [PipelineError] at the boundary the application actually
//! calls through (configure, connect, submit a frame).

use thiserror::Error;

use crate::graph::GraphError;
use crate::node::NodeError;
use crate::pool::{PoolError, TexturePoolError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    GraphInvalid(#[from] GraphError),

    #[error("operation attempted before the pipeline was initialized")]
    NotInitialized,

    #[error("frame packet pool saturated: {0}")]
    Backpressure(#[from] PoolError),

    #[error(transparent)]
    TexturePool(#[from] TexturePoolError),

    #[error(transparent)]
    NodeFailure(#[from] NodeError),

    #[error("operation timed out")]
    Timeout,

    #[error("executor was cancelled")]
    Cancelled,

    #[error("external I/O failure: {0}")]
    ExternalIo(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_convert_via_from() {
        let graph_err = GraphError::NodeNotFound(7);
        let err: PipelineError = graph_err.into();
        assert!(matches!(err, PipelineError::GraphInvalid(GraphError::NodeNotFound(7))));
    }
}
