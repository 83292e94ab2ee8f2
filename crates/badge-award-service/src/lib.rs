//! 徽章发放服务
//!
//! 响应用户生命周期事件（注册、导入钱包、首笔交易、邀请等），
//! 为每个钱包每种徽章至多发放一次，可选地记录为链上代币转移，
//! 并把发放确认同时投递到持久化队列和发布订阅通道。
//!
//! ## 模块
//!
//! - `service`: 发放引擎（award-once）、对账与铸造
//! - `chain`: 合约客户端与交易网关
//! - `notification`: 通知事件与投递中继
//! - `scheduler`: 心跳与对账后台任务
//! - `consumer` / `processor`: 生命周期事件消费

pub mod chain;
pub mod consumer;
pub mod error;
pub mod models;
pub mod notification;
pub mod processor;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod test_utils;

pub use error::{AwardError, GatewayError, Result};
pub use service::{AwardOutcome, AwardService};
