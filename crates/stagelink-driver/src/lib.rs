//! 连接驱动层
//!
//! 本 crate 管理与仪器服务器之间唯一的一条连接，包括：
//! - 命令通道：串行化的请求/回复交换，支持进度消息和读超时
//! - 连接状态机：`Disconnected -> Connecting -> Connected`，以及 `Reconnecting` /
//!   `Blocked` / `Failed`，转换按顺序发布给订阅者
//! - 后台健康检查与有界自动重连
//! - 独立的连接诊断（探测）
//!
//! 服务器一次只接受一个客户端。其他客户端连着时，新连接要么收到 `occupied`
//! 消息，要么根本得不到回复；前者进入 `Blocked`，后者由探测诊断出来。
//!
//! # 使用场景
//!
//! 大多数用户应该使用 `stagelink-client` 提供的 `Stage` 门面，
//! 需要直接控制连接生命周期时才使用本 crate。

pub mod channel;
pub mod config;
mod error;
mod manager;
pub mod metrics;
pub mod probe;
pub mod state;
mod supervisor;

pub use channel::{CommandChannel, MAX_PROGRESS_MESSAGES, ProgressSink};
pub use config::{ConnectionConfig, DEFAULT_PORT, TargetFlag, TargetGuard, format_address};
pub use error::DriverError;
pub use manager::ConnectionManager;
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use probe::{ProbeOutcome, ProbeResult, probe, probe_with};
pub use state::{ConnectionState, HealthStatus, StateChange};
