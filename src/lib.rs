//! Pairseq Loss - contrastive ranking and masked autoregressive losses on ndarray
//!
//! Both losses are plain functions of their inputs. [`RankingLoss`] scores
//! paired embedding batches, [`AutoRegressiveLoss`] scores per-step class
//! logits against stop-token padded targets and returns one value per example.

pub mod config;
pub mod error;
pub mod loss;
pub mod ops;

#[cfg(feature = "python")]
mod bindings;

pub use config::{AutoRegressiveLossConfig, DegeneratePolicy, RankingLossConfig, ReductionOrder};
pub use error::{LossError, Result, Side};
pub use loss::{ranking_loss, ranking_loss_backward, AutoRegressiveLoss, RankingLoss};
pub use ops::{Backend, CpuBackend, ParallelBackend};
