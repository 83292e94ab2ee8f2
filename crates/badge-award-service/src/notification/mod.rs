//! 发放确认通知

mod event;
mod relay;
mod sinks;

pub use event::{
    AwardPayload, BADGE_AWARD_CONFIRMATION, EventMeta, NotificationEvent, PING, ping_message,
};
pub use relay::{DeliveryReport, DeliveryStatus, NotificationRelay};
pub use sinks::{KafkaQueueSink, NotificationSink, TopicSink};

#[cfg(test)]
pub use sinks::MockNotificationSink;
