pub mod autoregressive;
pub mod ranking;

pub use self::autoregressive::{AutoRegressiveLoss, LEGACY_IGNORE_INDEX};
pub use self::ranking::{ranking_loss, ranking_loss_backward, RankingLoss};
