//! 业务服务层

mod award_service;
pub mod dto;
mod mint_service;

pub use award_service::AwardService;
pub use dto::{AwardOutcome, AwardSettings, MintRequest, ReconcileReport};
pub use mint_service::MintService;
