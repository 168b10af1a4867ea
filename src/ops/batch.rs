use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

pub const EPS: f32 = 1e-7;

/// L2 norm of one lane. Squares are summed in f64 so rows near the ends of
/// the f32 range neither overflow nor flush to zero.
pub fn lane_norm(v: &ArrayView1<f32>) -> f32 {
    v.fold(0.0f64, |acc, &a| acc + f64::from(a) * f64::from(a))
        .sqrt() as f32
}

/// L2 norm of every row: (batch_size, dim) -> (batch_size,).
pub fn norm_batched(x: &ArrayView2<f32>) -> Array1<f32> {
    x.map_axis(Axis(1), |row| lane_norm(&row))
}

/// Row-wise dot product of two equally shaped batches.
pub fn dot_batched(x: &ArrayView2<f32>, y: &ArrayView2<f32>) -> Array1<f32> {
    (x * y).sum_axis(Axis(1))
}

/// Divides every row of `x` by the matching entry of `norms`.
pub fn divide_rows(x: &ArrayView2<f32>, norms: &ArrayView1<f32>) -> Array2<f32> {
    x / &norms.view().insert_axis(Axis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_norm_and_dot() {
        let x = arr2(&[[3.0, 4.0], [1.0, 0.0]]);
        let y = arr2(&[[1.0, 1.0], [0.0, 2.0]]);
        assert_relative_eq!(norm_batched(&x.view()), arr1(&[5.0, 1.0]));
        assert_relative_eq!(dot_batched(&x.view(), &y.view()), arr1(&[7.0, 0.0]));
    }

    #[test]
    fn test_norm_survives_extreme_scales() {
        // f32 에서 제곱하면 1e40 은 inf, 1e-50 은 0 이 된다
        let x = arr2(&[[3e20f32, 4e20], [3e-25, 4e-25]]);
        let norms = norm_batched(&x.view());
        assert_relative_eq!(norms[0], 5e20, max_relative = 1e-6);
        assert_relative_eq!(norms[1], 5e-25, max_relative = 1e-6);
        assert!(norms[1] > 0.0);
    }

    #[test]
    fn test_divide_rows() {
        let x = arr2(&[[3.0, 4.0], [0.0, 2.0]]);
        let norms = arr1(&[5.0, 2.0]);
        let result = divide_rows(&x.view(), &norms.view());
        assert_relative_eq!(result, arr2(&[[0.6, 0.8], [0.0, 1.0]]));
    }
}
