use thiserror::Error;

/// Which embedding batch of a ranking loss call a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "x"),
            Side::Right => write!(f, "y"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LossError {
    #[error("ranking loss needs at least one embedding pair")]
    EmptyBatch,

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("target {target} at example {example}, position {position} is outside 0..{num_classes}")]
    TargetOutOfRange {
        example: usize,
        position: usize,
        target: i64,
        num_classes: usize,
    },

    #[error("row {row} of {side} has zero norm")]
    ZeroNorm { side: Side, row: usize },

    #[error("example {example} has no position before the stop token")]
    EmptySequence { example: usize },

    #[error("unknown policy name: {0}")]
    UnknownPolicy(String),
}

pub type Result<T> = std::result::Result<T, LossError>;

/// Fails with [`LossError::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn ensure_shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(LossError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
