//! 发布订阅连接管理
//!
//! `ConnectionManager` 持有一条发布订阅连接，并由独立的监督任务驱动状态机：
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected ... -> Closed
//! ```
//!
//! 发送方在连接恢复期间等待（有超时），发送失败会通知监督任务重连。
//! 重连间隔固定，直到 `close()` 才停止；进程其余部分不会等待监督任务。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::error::{BadgeError, Result};
use crate::observability::metrics;

// ---------------------------------------------------------------------------
// 状态与事件
// ---------------------------------------------------------------------------

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 监督任务广播的连接事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { attempt: u32 },
    Connected,
    ConnectFailed { reason: String },
    Lost { reason: String },
    ReconnectScheduled { delay: Duration },
    Closed,
}

// ---------------------------------------------------------------------------
// 连接抽象
// ---------------------------------------------------------------------------

/// 一条已建立的发布连接
#[async_trait]
pub trait TopicConnection: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// 建立发布连接的工厂
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TopicConnection>>;
}

/// 基于 Redis PUBLISH 的连接工厂
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn TopicConnection>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(Arc::new(RedisTopicConnection { conn }))
    }
}

struct RedisTopicConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl TopicConnection for RedisTopicConnection {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(channel, receivers, "消息已发布");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// 连接管理参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 用于日志和指标的连接名
    pub name: String,
    /// 固定重连间隔
    pub reconnect_delay: Duration,
    /// 发送方等待连接可用的最长时间
    pub publish_timeout: Duration,
}

struct Link {
    state: ConnectionState,
    generation: u64,
    conn: Option<Arc<dyn TopicConnection>>,
}

impl Link {
    fn without_conn(state: ConnectionState, generation: u64) -> Self {
        Self {
            state,
            generation,
            conn: None,
        }
    }
}

/// 发布订阅连接管理器
pub struct ConnectionManager {
    settings: ConnectionSettings,
    link_rx: watch::Receiver<Link>,
    events: broadcast::Sender<ConnectionEvent>,
    lost_tx: mpsc::UnboundedSender<(u64, String)>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// 打开连接管理器并启动监督任务
    ///
    /// 立即返回，首次连接在后台进行。
    pub fn open(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Arc<Self> {
        let (link_tx, link_rx) = watch::channel(Link::without_conn(ConnectionState::Disconnected, 0));
        let (events, _) = broadcast::channel(64);
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            connector,
            settings: settings.clone(),
            link_tx,
            events: events.clone(),
            lost_rx,
            shutdown_rx,
        };
        let handle = tokio::spawn(supervisor.run());

        Arc::new(Self {
            settings,
            link_rx,
            events,
            lost_tx,
            shutdown_tx,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn state(&self) -> ConnectionState {
        self.link_rx.borrow().state
    }

    /// 订阅连接事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// 发布一条消息
    ///
    /// 连接不可用时最多等待 `publish_timeout`；发送失败会标记当前连接丢失。
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let (generation, conn) = self.wait_connected().await?;

        match conn.publish(channel, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.lost_tx.send((generation, e.to_string()));
                Err(e)
            }
        }
    }

    async fn wait_connected(&self) -> Result<(u64, Arc<dyn TopicConnection>)> {
        let mut rx = self.link_rx.clone();
        let waited = tokio::time::timeout(
            self.settings.publish_timeout,
            rx.wait_for(|link| {
                matches!(
                    link.state,
                    ConnectionState::Connected | ConnectionState::Closed
                )
            }),
        )
        .await;

        match waited {
            Err(_) => Err(BadgeError::ConnectionUnavailable {
                name: self.settings.name.clone(),
                reason: format!("等待连接超时，当前状态 {}", self.state()),
            }),
            Ok(Err(_)) => Err(BadgeError::ConnectionClosed {
                name: self.settings.name.clone(),
            }),
            Ok(Ok(link)) => match (link.state, link.conn.as_ref()) {
                (ConnectionState::Connected, Some(conn)) => Ok((link.generation, conn.clone())),
                _ => Err(BadgeError::ConnectionClosed {
                    name: self.settings.name.clone(),
                }),
            },
        }
    }

    /// 关闭连接并等待监督任务退出
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(connection = %self.settings.name, error = %e, "监督任务异常退出");
        }
    }
}

// ---------------------------------------------------------------------------
// 监督任务
// ---------------------------------------------------------------------------

struct Supervisor {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    link_tx: watch::Sender<Link>,
    events: broadcast::Sender<ConnectionEvent>,
    lost_rx: mpsc::UnboundedReceiver<(u64, String)>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let name = self.settings.name.clone();
        let mut attempt: u32 = 0;
        let mut generation: u64 = 0;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            attempt += 1;
            let state = if generation == 0 && attempt == 1 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
            self.set_state(Link::without_conn(state, generation));
            self.emit(ConnectionEvent::Connecting { attempt });

            let connected = tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(conn) => {
                    generation += 1;
                    attempt = 0;
                    self.set_state(Link {
                        state: ConnectionState::Connected,
                        generation,
                        conn: Some(conn),
                    });
                    info!(connection = %name, generation, "发布订阅连接已建立");
                    self.emit(ConnectionEvent::Connected);

                    let lost = loop {
                        tokio::select! {
                            biased;

                            _ = self.shutdown_rx.changed() => break None,
                            signal = self.lost_rx.recv() => match signal {
                                Some((lost_generation, reason)) if lost_generation == generation => {
                                    break Some(reason);
                                }
                                // 旧连接上的迟到信号
                                Some(_) => continue,
                                None => break None,
                            },
                        }
                    };

                    let Some(reason) = lost else { break };
                    warn!(connection = %name, reason = %reason, "发布订阅连接丢失");
                    self.set_state(Link::without_conn(ConnectionState::Reconnecting, generation));
                    self.emit(ConnectionEvent::Lost { reason });
                }
                Err(e) => {
                    error!(connection = %name, attempt, error = %e, "发布订阅连接失败");
                    self.emit(ConnectionEvent::ConnectFailed {
                        reason: e.to_string(),
                    });
                }
            }

            let delay = self.settings.reconnect_delay;
            self.emit(ConnectionEvent::ReconnectScheduled { delay });
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(Link::without_conn(ConnectionState::Closed, generation));
        self.emit(ConnectionEvent::Closed);
        info!(connection = %name, "发布订阅连接已关闭");
    }

    fn set_state(&self, link: Link) {
        metrics::record_connection_state(&self.settings.name, link.state.as_str());
        self.link_tx.send_replace(link);
    }

    fn emit(&self, event: ConnectionEvent) {
        // 没有订阅者时发送失败是正常的
        let _ = self.events.send(event);
    }
}
