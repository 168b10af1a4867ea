use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, Axis};

/// log(sum(exp(v))) with the max subtracted first.
pub fn log_sum_exp(v: &ArrayView1<f32>) -> f32 {
    let max = v.fold(f32::NEG_INFINITY, |m, &a| m.max(a));
    let sum: f32 = v.iter().map(|&a| (a - max).exp()).sum();
    max + sum.ln()
}

/// In-place log-softmax of one lane. A single-element lane becomes exactly 0.
pub fn log_softmax_inplace(mut v: ArrayViewMut1<f32>) {
    let max = v.fold(f32::NEG_INFINITY, |m, &a| m.max(a));
    v.mapv_inplace(|a| a - max);
    let log_sum = v.iter().map(|&a| a.exp()).sum::<f32>().ln();
    v.mapv_inplace(|a| a - log_sum);
}

/// In-place softmax of one lane.
pub fn softmax_inplace(mut v: ArrayViewMut1<f32>) {
    let max = v.fold(f32::NEG_INFINITY, |m, &a| m.max(a));
    v.mapv_inplace(|a| (a - max).exp());
    let sum = v.sum();
    v.mapv_inplace(|a| a / sum);
}

/// Vectorized log-softmax over the columns of each row.
pub fn log_softmax_rows(x: &ArrayView2<f32>) -> Array2<f32> {
    let max = x.fold_axis(Axis(1), f32::NEG_INFINITY, |m, &a| m.max(a));
    let shifted = x - &max.insert_axis(Axis(1));
    let log_sum = shifted
        .mapv(f32::exp)
        .sum_axis(Axis(1))
        .mapv_into(f32::ln)
        .insert_axis(Axis(1));
    shifted - &log_sum
}

/// Vectorized log-softmax over the class axis of a (N, C, T) score batch.
pub fn log_softmax_classes(scores: &ArrayView3<f32>) -> Array3<f32> {
    let max = scores.fold_axis(Axis(1), f32::NEG_INFINITY, |m, &a| m.max(a));
    let shifted = scores - &max.insert_axis(Axis(1));
    let log_sum = shifted
        .mapv(f32::exp)
        .sum_axis(Axis(1))
        .mapv_into(f32::ln)
        .insert_axis(Axis(1));
    shifted - &log_sum
}

/// Vectorized softmax over the class axis of a (N, C, T) score batch.
pub fn softmax_classes(scores: &ArrayView3<f32>) -> Array3<f32> {
    let max = scores.fold_axis(Axis(1), f32::NEG_INFINITY, |m, &a| m.max(a));
    let exp = (scores - &max.insert_axis(Axis(1))).mapv_into(f32::exp);
    let sum = exp.sum_axis(Axis(1)).insert_axis(Axis(1));
    exp / &sum
}
