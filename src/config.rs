//! Construction-time settings for the two losses.
//!
//! Both structs are fixed when a loss is built, the same way the stop token is.

use std::str::FromStr;

use crate::error::LossError;

/// What to do with inputs whose normalization would divide by zero:
/// zero-norm embedding rows and target sequences made only of stop tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Divide anyway and let NaN/Inf flow into the result.
    #[default]
    Propagate,
    /// Clamp the denominator (`EPS` for norms, 1 for normalizing factors).
    Clamp,
    /// Reject the call with a [`LossError`].
    Error,
}

impl FromStr for DegeneratePolicy {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(DegeneratePolicy::Propagate),
            "clamp" => Ok(DegeneratePolicy::Clamp),
            "error" => Ok(DegeneratePolicy::Error),
            other => Err(LossError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Order of cross-entropy reduction and masking in the autoregressive loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReductionOrder {
    /// Unreduced (N, T) cross-entropy, masked, then averaged per example.
    #[default]
    PerPosition,
    /// Mean over all N*T positions first, then mask and normalize.
    /// Every example gets the batch-wide mean; kept for reproducing old numbers.
    Legacy,
}

impl FromStr for ReductionOrder {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_position" => Ok(ReductionOrder::PerPosition),
            "legacy" => Ok(ReductionOrder::Legacy),
            other => Err(LossError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RankingLossConfig {
    pub degenerate: DegeneratePolicy,
}

impl RankingLossConfig {
    pub fn new(degenerate: DegeneratePolicy) -> Self {
        Self { degenerate }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoRegressiveLossConfig {
    pub reduction: ReductionOrder,
    pub degenerate: DegeneratePolicy,
}

impl AutoRegressiveLossConfig {
    pub fn new(reduction: ReductionOrder, degenerate: DegeneratePolicy) -> Self {
        Self {
            reduction,
            degenerate,
        }
    }
}
