//! 链上交互

mod client;
mod gateway;

pub use client::{BadgeContract, JsonRpcBadgeContract, TxHandle, TxReceipt};
pub use gateway::{ChainOperation, MintReceipt, TransactionGateway};

#[cfg(test)]
pub use client::MockBadgeContract;
