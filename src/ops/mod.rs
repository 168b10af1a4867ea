pub mod backend;
pub mod batch;
pub mod softmax;

pub use self::backend::{Backend, CpuBackend, ParallelBackend};
pub use self::batch::{divide_rows, dot_batched, lane_norm, norm_batched, EPS};
pub use self::softmax::{log_softmax_classes, log_softmax_rows, log_sum_exp, softmax_classes};
