//! 领域模型

mod award;
mod badge;
mod enums;

pub use award::{AwardIdentity, AwardRecord, NewAwardRecord};
pub use badge::{BadgeDefinition, NewBadgeDefinition};
pub use enums::{AwardStatus, BadgeType, LifecycleTrigger, badge_types};
