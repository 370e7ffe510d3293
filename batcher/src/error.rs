use polars::prelude::PolarsError;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("batch {batch} out of range (generator has {len} batches)")]
    BatchOutOfRange { batch: usize, len: usize },

    #[error("required column '{0}' not found")]
    MissingColumn(String),

    #[error("no feature matrix stored for prefix '{0}'")]
    MissingPrefix(String),

    #[error("card '{0}' not in vocabulary")]
    UnknownCard(String),

    #[error("card '{0}' appears more than once in the vocabulary")]
    DuplicateCard(String),

    #[error("card index {0} not in vocabulary")]
    UnknownCardIdx(u32),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("draft '{draft_id}' has {found} positions, expected {expected}")]
    IncompleteDraft {
        draft_id: String,
        expected: usize,
        found: usize,
    },

    #[error("all-zero sampling distribution in batch row {row}")]
    DegenerateDistribution { row: usize },

    #[error("batch weights sum to {0}, cannot renormalize")]
    InvalidWeights(f32),

    #[error("weighting returned {found} weights for {expected} rows")]
    WeightLength { expected: usize, found: usize },

    #[error("training fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("{0} partition is empty")]
    EmptyPartition(&'static str),

    #[error("unsupported input file: {0}")]
    UnsupportedInput(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
