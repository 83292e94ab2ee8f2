//! 后台任务

mod heartbeat;
mod reconcile_worker;

pub use heartbeat::HeartbeatScheduler;
pub use reconcile_worker::ReconcileWorker;
