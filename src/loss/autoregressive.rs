//! Masked, length-normalized cross-entropy for autoregressive outputs.
//!
//! Scores are laid out (N, C, T): batch, classes, steps. Targets are (N, T)
//! class indices, padded with the stop token. Positions holding the stop token
//! are masked out, and each example is averaged over its remaining positions.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use tracing::{debug, trace, warn};

use crate::config::{AutoRegressiveLossConfig, DegeneratePolicy, ReductionOrder};
use crate::error::{ensure_shape, LossError, Result};
use crate::ops::backend::class_index;
use crate::ops::{Backend, CpuBackend};

/// Targets equal to this never count towards the batch mean in
/// [`ReductionOrder::Legacy`].
pub const LEGACY_IGNORE_INDEX: i64 = -100;

#[derive(Debug, Clone)]
pub struct AutoRegressiveLoss<B: Backend = CpuBackend> {
    stop_token: i64,
    config: AutoRegressiveLossConfig,
    backend: B,
}

impl AutoRegressiveLoss<CpuBackend> {
    pub fn new(stop_token: i64) -> Self {
        Self::with_config(stop_token, AutoRegressiveLossConfig::default())
    }

    pub fn with_config(stop_token: i64, config: AutoRegressiveLossConfig) -> Self {
        Self::with_backend(stop_token, config, CpuBackend)
    }
}

impl<B: Backend> AutoRegressiveLoss<B> {
    pub fn with_backend(stop_token: i64, config: AutoRegressiveLossConfig, backend: B) -> Self {
        Self {
            stop_token,
            config,
            backend,
        }
    }

    pub fn stop_token(&self) -> i64 {
        self.stop_token
    }

    pub fn config(&self) -> AutoRegressiveLossConfig {
        self.config
    }

    /// 1.0 where the target differs from the stop token, 0.0 elsewhere.
    pub fn mask(&self, targets: &ArrayView2<i64>) -> Array2<f32> {
        let stop = self.stop_token;
        targets.mapv(|t| if t != stop { 1.0 } else { 0.0 })
    }

    /// Number of unmasked positions per example.
    pub fn normalizing_factors(&self, mask: &ArrayView2<f32>) -> Array1<f32> {
        mask.sum_axis(Axis(1))
    }

    /// Per-example loss, shape (N,).
    ///
    /// `scores` is (N, C, T) and `targets` is (N, T). Every unmasked target
    /// must lie in `0..C`.
    pub fn forward(&self, scores: &ArrayView3<f32>, targets: &ArrayView2<i64>) -> Result<Array1<f32>> {
        check_shapes(scores, targets)?;
        let (batch, classes, steps) = scores.dim();
        debug!(batch, classes, steps, reduction = ?self.config.reduction, "autoregressive loss forward");

        let mask = self.mask(targets);
        let denominators = self.denominators(self.normalizing_factors(&mask.view()))?;

        let losses = match self.config.reduction {
            ReductionOrder::PerPosition => {
                let ce = self.backend.cross_entropy(scores, targets, &mask.view())?;
                (ce * &mask).sum_axis(Axis(1)) / &denominators
            }
            ReductionOrder::Legacy => {
                let counted = legacy_counted(targets);
                let ce = self.backend.cross_entropy(scores, targets, &counted.view())?;
                let mean = ce.sum() / counted.sum();
                (&mask * mean / &denominators.view().insert_axis(Axis(1))).sum_axis(Axis(1))
            }
        };

        trace!(?losses, "autoregressive loss per example");
        Ok(losses)
    }

    /// Gradient of `sum(grad_output * forward(scores, targets))` with respect
    /// to `scores`, shape (N, C, T).
    pub fn backward(
        &self,
        scores: &ArrayView3<f32>,
        targets: &ArrayView2<i64>,
        grad_output: &ArrayView1<f32>,
    ) -> Result<Array3<f32>> {
        check_shapes(scores, targets)?;
        let (batch, classes, steps) = scores.dim();
        ensure_shape("grad_output", &[batch], grad_output.shape())?;
        debug!(batch, classes, steps, reduction = ?self.config.reduction, "autoregressive loss backward");

        let mask = self.mask(targets);
        let factors = self.normalizing_factors(&mask.view());
        let denominators = self.denominators(factors.clone())?;

        // d loss / d ce[n, t], plus which positions hold a real cross-entropy term
        let (weights, counted) = match self.config.reduction {
            ReductionOrder::PerPosition => {
                let per_example = (grad_output / &denominators).insert_axis(Axis(1));
                (&mask * &per_example, mask)
            }
            ReductionOrder::Legacy => {
                let counted = legacy_counted(targets);
                let through_mean = (grad_output * &(&factors / &denominators)).sum() / counted.sum();
                (&counted * through_mean, counted)
            }
        };

        let mut grad = self.backend.softmax_classes(scores);
        for ((n, t), &weight) in weights.indexed_iter() {
            let mut column = grad.slice_mut(s![n, .., t]);
            if counted[[n, t]] == 0.0 {
                // zero unless the example's denominator was zero
                column.fill(weight);
                continue;
            }
            let class = class_index(n, t, targets[[n, t]], classes)?;
            column[class] -= 1.0;
            column *= weight;
        }

        Ok(grad)
    }

    fn denominators(&self, factors: Array1<f32>) -> Result<Array1<f32>> {
        let Some(example) = factors.iter().position(|&f| f == 0.0) else {
            return Ok(factors);
        };

        match self.config.degenerate {
            DegeneratePolicy::Propagate => {
                warn!(example, stop_token = self.stop_token, "sequence is all stop tokens, loss will be NaN");
                Ok(factors)
            }
            DegeneratePolicy::Clamp => Ok(factors.mapv_into(|f| f.max(1.0))),
            DegeneratePolicy::Error => Err(LossError::EmptySequence { example }),
        }
    }
}

fn check_shapes(scores: &ArrayView3<f32>, targets: &ArrayView2<i64>) -> Result<()> {
    let (batch, _, steps) = scores.dim();
    ensure_shape("targets", &[batch, steps], targets.shape())
}

fn legacy_counted(targets: &ArrayView2<i64>) -> Array2<f32> {
    targets.mapv(|t| if t != LEGACY_IGNORE_INDEX { 1.0 } else { 0.0 })
}
