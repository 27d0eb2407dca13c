use thiserror::Error;

/// Failures of a single aggregate computation. None of these abort sibling
/// records; callers substitute a placeholder ("N/A", gray) instead.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("series has no samples")]
    EmptySeries,
    #[error("no data for year {0}")]
    EmptyYear(i32),
    #[error("zero-width color range over {samples} samples (value {value})")]
    DegenerateRange { value: f64, samples: usize },
}

pub type AggregateResult<T> = std::result::Result<T, AggregateError>;
