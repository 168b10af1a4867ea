//! In-batch contrastive ranking loss.
//!
//! Row `i` of `x` is paired with row `i` of `y`. Every other row of `y` acts as
//! a negative, and the loss is the mean negative log-likelihood of picking the
//! paired row under a softmax over cosine similarities.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use tracing::{debug, warn};

use crate::config::{DegeneratePolicy, RankingLossConfig};
use crate::error::{ensure_shape, LossError, Result, Side};
use crate::ops::{divide_rows, dot_batched, Backend, CpuBackend, EPS};

#[derive(Debug, Clone, Default)]
pub struct RankingLoss<B: Backend = CpuBackend> {
    backend: B,
    config: RankingLossConfig,
}

impl RankingLoss<CpuBackend> {
    pub fn new() -> Self {
        Self::with_config(RankingLossConfig::default())
    }

    pub fn with_config(config: RankingLossConfig) -> Self {
        Self::with_backend(CpuBackend, config)
    }
}

impl<B: Backend> RankingLoss<B> {
    pub fn with_backend(backend: B, config: RankingLossConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> RankingLossConfig {
        self.config
    }

    /// Mean over the batch of `-log softmax(cos(x_i, y_·))[i]`.
    ///
    /// `x` and `y` must both be (N, D) with N >= 1. A batch of one pair always
    /// gives 0.
    pub fn forward(&self, x: &ArrayView2<f32>, y: &ArrayView2<f32>) -> Result<f32> {
        check_shapes(x, y)?;
        debug!(batch = x.nrows(), dim = x.ncols(), "ranking loss forward");

        let x_rows = self.normalize(Side::Left, x)?;
        let y_rows = self.normalize(Side::Right, y)?;
        let similarities = self.backend.matmul_t(&x_rows.unit.view(), &y_rows.unit.view());
        let log_probs = self.backend.log_softmax_rows(&similarities.view());

        // subtracting from +0 keeps a singleton batch at +0 rather than -0
        Ok(0.0 - log_probs.diag().sum() / x.nrows() as f32)
    }

    /// Gradients of [`forward`](Self::forward) with respect to `x` and `y`.
    pub fn backward(
        &self,
        x: &ArrayView2<f32>,
        y: &ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        check_shapes(x, y)?;
        debug!(batch = x.nrows(), dim = x.ncols(), "ranking loss backward");

        let batch_size = x.nrows() as f32;
        let x_rows = self.normalize(Side::Left, x)?;
        let y_rows = self.normalize(Side::Right, y)?;
        let similarities = self.backend.matmul_t(&x_rows.unit.view(), &y_rows.unit.view());

        // dL/dS = (softmax(S) - I) / N
        let mut grad_sim = self.backend.softmax_rows(&similarities.view());
        grad_sim.diag_mut().mapv_inplace(|p| p - 1.0);
        grad_sim.mapv_inplace(|g| g / batch_size);

        let grad_x_unit = self.backend.matmul_t(&grad_sim.view(), &y_rows.unit.t());
        let grad_y_unit = self.backend.matmul_t(&grad_sim.t(), &x_rows.unit.t());

        Ok((x_rows.backward(&grad_x_unit), y_rows.backward(&grad_y_unit)))
    }

    fn normalize(&self, side: Side, x: &ArrayView2<f32>) -> Result<NormalizedRows> {
        let mut norms = self.backend.row_norms(x);
        let mut clamped = Array1::from_elem(norms.len(), false);

        match self.config.degenerate {
            DegeneratePolicy::Clamp => {
                Zip::from(&mut norms).and(&mut clamped).for_each(|n, c| {
                    if *n < EPS {
                        *n = EPS;
                        *c = true;
                    }
                });
            }
            policy => {
                if let Some(row) = norms.iter().position(|&n| n == 0.0) {
                    if policy == DegeneratePolicy::Error {
                        return Err(LossError::ZeroNorm { side, row });
                    }
                    warn!(%side, row, "zero-norm embedding row, loss will not be finite");
                }
            }
        }

        Ok(NormalizedRows {
            unit: divide_rows(x, &norms.view()),
            norms,
            clamped,
        })
    }
}

/// Rows divided by their norms. Rows whose norm was clamped up to `EPS` are
/// only scaled by `1 / EPS` and do not lie on the unit sphere.
struct NormalizedRows {
    unit: Array2<f32>,
    norms: Array1<f32>,
    clamped: Array1<bool>,
}

impl NormalizedRows {
    /// Pulls a gradient on the normalized rows back to the raw rows:
    /// `(g - unit (unit·g)) / |x|`, or `g / EPS` for clamped rows.
    fn backward(&self, grad: &Array2<f32>) -> Array2<f32> {
        let mut along = dot_batched(&grad.view(), &self.unit.view());
        Zip::from(&mut along).and(&self.clamped).for_each(|a, &c| {
            if c {
                *a = 0.0;
            }
        });
        let along = along.insert_axis(Axis(1));
        (grad - &(&self.unit * &along)) / &self.norms.view().insert_axis(Axis(1))
    }
}

fn check_shapes(x: &ArrayView2<f32>, y: &ArrayView2<f32>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(LossError::EmptyBatch);
    }
    ensure_shape("y", x.shape(), y.shape())
}

/// [`RankingLoss::forward`] with default settings.
pub fn ranking_loss(x: &ArrayView2<f32>, y: &ArrayView2<f32>) -> Result<f32> {
    RankingLoss::new().forward(x, y)
}

/// [`RankingLoss::backward`] with default settings.
pub fn ranking_loss_backward(
    x: &ArrayView2<f32>,
    y: &ArrayView2<f32>,
) -> Result<(Array2<f32>, Array2<f32>)> {
    RankingLoss::new().backward(x, y)
}
