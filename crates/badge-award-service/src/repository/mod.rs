//! 数据访问层

mod award_repo;
mod badge_repo;
mod traits;

pub use award_repo::AwardRepository;
pub use badge_repo::BadgeRepository;
pub use traits::{AwardRepositoryTrait, BadgeRepositoryTrait};

#[cfg(test)]
pub use traits::{MockAwardRepositoryTrait, MockBadgeRepositoryTrait};
