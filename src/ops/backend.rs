//! Numeric engine the losses are written against.
//!
//! `CpuBackend` works on whole arrays with ndarray broadcasting, `ParallelBackend`
//! splits rows and examples across the rayon pool. Both produce the same values
//! up to float rounding.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;

use super::batch::{lane_norm, norm_batched};
use super::softmax;
use crate::error::{ensure_shape, LossError, Result};

pub trait Backend: Send + Sync + std::fmt::Debug {
    /// L2 norm of every row.
    fn row_norms(&self, x: &ArrayView2<f32>) -> Array1<f32>;

    /// `a · bᵀ`, shape (a.nrows(), b.nrows()).
    fn matmul_t(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Array2<f32>;

    fn log_softmax_rows(&self, x: &ArrayView2<f32>) -> Array2<f32>;

    fn softmax_rows(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        self.log_softmax_rows(x).mapv_into(f32::exp)
    }

    /// Softmax over the class axis of a (N, C, T) score batch.
    fn softmax_classes(&self, scores: &ArrayView3<f32>) -> Array3<f32>;

    /// Unreduced cross-entropy of shape (N, T).
    ///
    /// Positions where `mask` is zero are left at 0 and their target is never
    /// looked up, so they may hold any value.
    fn cross_entropy(
        &self,
        scores: &ArrayView3<f32>,
        targets: &ArrayView2<i64>,
        mask: &ArrayView2<f32>,
    ) -> Result<Array2<f32>>;
}

/// Fails unless `targets` is (N, T) for (N, C, T) `scores` and `mask` matches `targets`.
pub(crate) fn check_sequence_shapes(
    scores: &ArrayView3<f32>,
    targets: &ArrayView2<i64>,
    mask: &ArrayView2<f32>,
) -> Result<()> {
    let (batch, _, steps) = scores.dim();
    ensure_shape("targets", &[batch, steps], targets.shape())?;
    ensure_shape("mask", targets.shape(), mask.shape())
}

/// Maps a target to a class index, rejecting anything outside `0..num_classes`.
pub(crate) fn class_index(
    example: usize,
    position: usize,
    target: i64,
    num_classes: usize,
) -> Result<usize> {
    match usize::try_from(target) {
        Ok(idx) if idx < num_classes => Ok(idx),
        _ => Err(LossError::TargetOutOfRange {
            example,
            position,
            target,
            num_classes,
        }),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn row_norms(&self, x: &ArrayView2<f32>) -> Array1<f32> {
        norm_batched(x)
    }

    fn matmul_t(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Array2<f32> {
        a.dot(&b.t())
    }

    fn log_softmax_rows(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        softmax::log_softmax_rows(x)
    }

    fn softmax_classes(&self, scores: &ArrayView3<f32>) -> Array3<f32> {
        softmax::softmax_classes(scores)
    }

    fn cross_entropy(
        &self,
        scores: &ArrayView3<f32>,
        targets: &ArrayView2<i64>,
        mask: &ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        check_sequence_shapes(scores, targets, mask)?;
        let num_classes = scores.len_of(Axis(1));
        let log_probs = softmax::log_softmax_classes(scores);
        let mut losses = Array2::zeros(targets.raw_dim());

        for ((n, t), &target) in targets.indexed_iter() {
            if mask[[n, t]] == 0.0 {
                continue;
            }
            let class = class_index(n, t, target, num_classes)?;
            losses[[n, t]] = -log_probs[[n, class, t]];
        }

        Ok(losses)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelBackend;

impl Backend for ParallelBackend {
    fn row_norms(&self, x: &ArrayView2<f32>) -> Array1<f32> {
        let mut result = Array1::zeros(x.nrows());

        Zip::from(&mut result)
            .and(x.rows())
            .par_for_each(|norm, row| *norm = lane_norm(&row));

        result
    }

    fn matmul_t(&self, a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Array2<f32> {
        let mut result = Array2::zeros((a.nrows(), b.nrows()));

        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                let a_row = a.row(i);
                for (j, b_row) in b.rows().into_iter().enumerate() {
                    row[j] = a_row.dot(&b_row);
                }
            });

        result
    }

    fn log_softmax_rows(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        let mut result = x.to_owned();

        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(softmax::log_softmax_inplace);

        result
    }

    fn softmax_classes(&self, scores: &ArrayView3<f32>) -> Array3<f32> {
        let mut result = scores.to_owned();

        // (C, T) per example, softmax down each column
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut example| {
                for column in example.axis_iter_mut(Axis(1)) {
                    softmax::softmax_inplace(column);
                }
            });

        result
    }

    fn cross_entropy(
        &self,
        scores: &ArrayView3<f32>,
        targets: &ArrayView2<i64>,
        mask: &ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        check_sequence_shapes(scores, targets, mask)?;
        let num_classes = scores.len_of(Axis(1));
        let mut losses = Array2::zeros(targets.raw_dim());

        // every row runs to completion so the reported error is the first in row-major order
        let rows: Vec<Result<()>> = losses
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(n, mut row)| -> Result<()> {
                let example = scores.index_axis(Axis(0), n);
                for t in 0..row.len() {
                    if mask[[n, t]] == 0.0 {
                        continue;
                    }
                    let class = class_index(n, t, targets[[n, t]], num_classes)?;
                    let column = example.column(t);
                    row[t] = softmax::log_sum_exp(&column) - column[class];
                }
                Ok(())
            })
            .collect();
        rows.into_iter().collect::<Result<()>>()?;

        Ok(losses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2, Array3};

    fn scores() -> Array3<f32> {
        Array3::from_shape_fn((2, 4, 3), |(n, c, t)| ((n * 7 + c * 3 + t) % 5) as f32 * 0.4 - 0.8)
    }

    #[test]
    fn test_backends_agree_on_rows() {
        let a = arr2(&[[1.0, 2.0, 2.0], [0.5, -1.0, 0.0]]);
        let b = arr2(&[[0.0, 1.0, 0.0], [1.0, 1.0, 1.0], [3.0, 0.0, -4.0]]);
        let cpu = CpuBackend;
        let par = ParallelBackend;

        assert_relative_eq!(cpu.row_norms(&a.view()), arr1(&[3.0, 1.25f32.sqrt()]), epsilon = 1e-6);
        assert_relative_eq!(cpu.row_norms(&a.view()), par.row_norms(&a.view()), epsilon = 1e-6);
        assert_relative_eq!(
            cpu.matmul_t(&a.view(), &b.view()),
            par.matmul_t(&a.view(), &b.view()),
            epsilon = 1e-6
        );
        assert_eq!(cpu.matmul_t(&a.view(), &b.view()).dim(), (2, 3));
        assert_relative_eq!(
            cpu.log_softmax_rows(&b.view()),
            par.log_softmax_rows(&b.view()),
            epsilon = 1e-6
        );
        let probs = cpu.softmax_rows(&b.view());
        assert_relative_eq!(probs.row(1), arr1(&[1.0f32 / 3.0; 3]), epsilon = 1e-6);
    }

    #[test]
    fn test_backends_agree_on_sequences() {
        let scores = scores();
        let targets = arr2(&[[1i64, 3, 0], [2, 2, 1]]);
        let mask = arr2(&[[1.0f32, 1.0, 0.0], [1.0, 1.0, 1.0]]);

        let cpu = CpuBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()).unwrap();
        let par = ParallelBackend
            .cross_entropy(&scores.view(), &targets.view(), &mask.view())
            .unwrap();
        assert_relative_eq!(cpu, par, epsilon = 1e-5);
        assert_eq!(cpu[[0, 2]], 0.0);
        assert!(cpu.iter().zip(mask.iter()).all(|(&l, &m)| m == 0.0 || l > 0.0));

        assert_relative_eq!(
            CpuBackend.softmax_classes(&scores.view()),
            ParallelBackend.softmax_classes(&scores.view()),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_masked_positions_skip_target_lookup() {
        let scores = scores();
        // 99 is not a class, but it sits under a zero mask
        let targets = arr2(&[[1i64, 99, 99], [2, 99, 99]]);
        let mask = arr2(&[[1.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(CpuBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()).is_ok());
        assert!(ParallelBackend
            .cross_entropy(&scores.view(), &targets.view(), &mask.view())
            .is_ok());
    }

    #[test]
    fn test_out_of_range_target_is_rejected() {
        let scores = scores();
        let targets = arr2(&[[1i64, 1, 1], [1, -1, 1]]);
        let mask = Array2::ones((2, 3));
        let expected = LossError::TargetOutOfRange {
            example: 1,
            position: 1,
            target: -1,
            num_classes: 4,
        };
        assert_eq!(
            CpuBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()),
            Err(expected.clone())
        );
        assert_eq!(
            ParallelBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()),
            Err(expected)
        );
    }

    #[test]
    fn test_backends_report_the_same_first_bad_target() {
        let scores = Array3::from_shape_fn((6, 4, 3), |(n, c, t)| (n + c + t) as f32 * 0.1);
        let mut targets = Array2::from_elem((6, 3), 1i64);
        targets[[1, 2]] = 7;
        targets[[4, 0]] = -3;
        targets[[5, 1]] = 4;
        let mask = Array2::ones((6, 3));
        let expected = Err(LossError::TargetOutOfRange {
            example: 1,
            position: 2,
            target: 7,
            num_classes: 4,
        });
        for _ in 0..8 {
            assert_eq!(
                ParallelBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()),
                expected
            );
        }
        assert_eq!(
            CpuBackend.cross_entropy(&scores.view(), &targets.view(), &mask.view()),
            expected
        );
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let scores = scores();

        let short_mask = Array2::<f32>::ones((1, 3));
        let targets = Array2::<i64>::ones((2, 3));
        let mask_error = Err(LossError::ShapeMismatch {
            what: "mask",
            expected: vec![2, 3],
            actual: vec![1, 3],
        });
        assert_eq!(
            CpuBackend.cross_entropy(&scores.view(), &targets.view(), &short_mask.view()),
            mask_error
        );
        assert_eq!(
            ParallelBackend.cross_entropy(&scores.view(), &targets.view(), &short_mask.view()),
            mask_error
        );

        let long_targets = Array2::<i64>::ones((2, 4));
        let long_mask = Array2::<f32>::ones((2, 4));
        let targets_error = Err(LossError::ShapeMismatch {
            what: "targets",
            expected: vec![2, 3],
            actual: vec![2, 4],
        });
        assert_eq!(
            CpuBackend.cross_entropy(&scores.view(), &long_targets.view(), &long_mask.view()),
            targets_error
        );
        assert_eq!(
            ParallelBackend.cross_entropy(&scores.view(), &long_targets.view(), &long_mask.view()),
            targets_error
        );
    }

    #[test]
    fn test_row_norms_at_extreme_scales() {
        let x = arr2(&[[3e20f32, 0.0, 4e20], [0.0, 3e-25, -4e-25], [0.0, 0.0, 0.0]]);
        for norms in [CpuBackend.row_norms(&x.view()), ParallelBackend.row_norms(&x.view())] {
            assert_relative_eq!(norms[0], 5e20, max_relative = 1e-6);
            assert_relative_eq!(norms[1], 5e-25, max_relative = 1e-6);
            assert_eq!(norms[2], 0.0);
        }
    }
}
