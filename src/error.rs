//! Library error type.
//!
//! Only construction and explicit restore paths fail. Every runtime
//! operation on a live unit absorbs invalid input as a no-op.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoraError {
    #[error("invalid dimensions: in_dim={in_dim}, out_dim={out_dim}, rank={rank} (all must be > 0)")]
    InvalidDimensions {
        in_dim: usize,
        out_dim: usize,
        rank: usize,
    },

    #[error("failed to allocate {elements} f32 elements for {buffer}")]
    Allocation {
        buffer: &'static str,
        elements: usize,
    },

    #[error("shape mismatch for {buffer}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown session {0}")]
    UnknownSession(u64),
}
