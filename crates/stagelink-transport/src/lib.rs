//! # Stagelink Transport
//!
//! 传输层抽象：一条双向字节流上的按行收发。
//!
//! - [`Transport`]: 已建立连接的统一接口（发送一行 / 接收一行 / 关闭）
//! - [`Dialer`]: 建立连接的工厂，主连接和探测连接各自拨号，从不共享 socket
//! - [`TcpTransport`] / [`TcpDialer`]: 生产环境使用的 TCP 实现
//!
//! 启用 `mock` feature 后提供 [`mock`] 模块（脚本化的内存传输和拨号器）。

use std::time::Duration;
use thiserror::Error;

pub mod tcp;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use tcp::{TcpDialer, TcpTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Transport not connected")]
    NotConnected,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl TransportError {
    /// 是否意味着连接本身已经不可用（而不是某一次读超时）
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Closed | TransportError::NotConnected
        )
    }
}

/// 从其他线程中断阻塞中的读写（关闭底层 socket）
pub type Interrupter = Box<dyn Fn() + Send + Sync>;

/// 已建立连接的传输
///
/// 协议是严格的半双工：调用方负责保证同一时间只有一个请求在途。
pub trait Transport: Send {
    /// 发送一行（实现负责补齐结尾的 `\n`）
    fn send_line(&mut self, line: &[u8]) -> Result<(), TransportError>;

    /// 接收一行（不含行尾）
    ///
    /// `timeout` 是空闲超时：在这段时间内没有收到任何字节才返回 `ReadTimeout`。
    fn receive_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// 丢弃已缓冲和已到达但尚未读取的字节，返回丢弃的字节数
    ///
    /// 用于在读超时之后清理迟到的回复，避免把它归到下一个请求上。
    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    /// 关闭连接（幂等）
    fn close(&mut self);

    /// 连接是否仍然打开
    fn is_open(&self) -> bool;

    /// 获取中断句柄
    ///
    /// 调用返回的闭包后，阻塞在 `receive_line` 上的线程会立即返回错误。
    /// 不支持中断的实现返回 `None`。
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }

    /// 对端描述（用于日志）
    fn peer(&self) -> String {
        String::from("unknown")
    }
}

/// 连接工厂
pub trait Dialer: Send + Sync {
    /// 建立到 `addr`（`host:port`）的新连接
    fn dial(&self, addr: &str, connect_timeout: Duration)
    -> Result<Box<dyn Transport>, TransportError>;
}
