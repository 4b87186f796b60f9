//! 驱动层错误类型定义

use crate::state::ConnectionState;
use stagelink_protocol::ProtocolError;
use stagelink_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// 驱动层错误类型
///
/// 显式调用（`connect()` / `send()`）的错误原样返回给调用方；
/// 后台健康检查和重连中的同类错误只驱动状态机，不向外抛出。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 未加载目标配置（连接前的安全闸门，不会触发任何网络操作）
    #[error("No target configuration loaded")]
    ConfigNotSet,

    /// 连接配置非法
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 建立 socket 超时
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// 等待回复超时（期间没有收到任何字节）
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// 对端拒绝连接（没有服务器监听）
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// 服务器的唯一连接槽已被其他客户端占用
    #[error("Server slot occupied: {0}")]
    Blocked(String),

    /// 回复格式错误（只影响当前命令）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 服务器对命令返回了错误
    #[error("Server error: {message}")]
    Server { message: String },

    /// 当前没有可用连接
    #[error("Not connected")]
    NotConnected,

    /// 当前状态不允许该操作
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(ConnectionState),

    /// 其他传输层错误（连接已断开）
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// 操作被并发的 `disconnect()` 打断
    #[error("Operation interrupted")]
    Interrupted,

    /// 操作被取消（等待的对象已经不存在）
    #[error("Operation cancelled")]
    Cancelled,
}

impl DriverError {
    /// 是否意味着主连接已经断开（应触发重连）
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DriverError::Transport(e) if e.is_disconnect())
    }

    /// 自动重连时是否值得再次尝试
    ///
    /// `Blocked` 永远不自动重试，必须由用户决定。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::ConnectTimeout(_)
                | DriverError::ReadTimeout(_)
                | DriverError::ConnectionRefused(_)
                | DriverError::Protocol(_)
                | DriverError::Transport(_)
                | DriverError::NotConnected
        )
    }
}

impl From<TransportError> for DriverError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnectTimeout(d) => DriverError::ConnectTimeout(d),
            TransportError::ReadTimeout(d) => DriverError::ReadTimeout(d),
            TransportError::ConnectionRefused(addr) => DriverError::ConnectionRefused(addr),
            TransportError::NotConnected => DriverError::NotConnected,
            other => DriverError::Transport(other),
        }
    }
}
