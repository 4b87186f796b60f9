//! # Stagelink Protocol
//!
//! 仪器控制服务器的线协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `message`: 请求 / 服务器消息的编解码
//! - `command`: 强类型命令（`Command` trait）
//! - `types`: 命令返回的数据结构
//!
//! ## 线格式
//!
//! 每条消息是一行 UTF-8 JSON（以 `\n` 结尾）。客户端一次只能有一个未完成请求；
//! 长时间运行的命令会在最终结果之前发送若干条 `progress` 消息。
//!
//! ```text
//! -> {"command":"get_position"}
//! <- {"type":"result","data":{"x_um":10.0,"y_um":-4.5,"z_um":0.0}}
//!
//! -> {"command":"run_sweep","args":{"configurations":3}}
//! <- {"type":"progress","current":1,"total":3}
//! <- {"type":"progress","current":2,"total":3}
//! <- {"type":"progress","current":3,"total":3}
//! <- {"type":"result","data":{"completed":3}}
//! ```
//!
//! 服务器同一时间只服务一个客户端，其他客户端会收到 `{"type":"occupied"}`。

pub mod command;
pub mod message;
pub mod types;

// 重新导出常用类型
pub use command::*;
pub use message::*;
pub use types::*;

use thiserror::Error;

/// 协议层错误
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 无法解析为合法的服务器消息（非 JSON、缺少字段、未知类型等）
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// 消息格式合法，但在当前上下文中不应出现
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    /// 结果负载无法解码为命令的返回类型
    #[error("Invalid payload for {command}: {reason}")]
    InvalidPayload { command: String, reason: String },

    /// 请求编码失败
    #[error("Encode error: {0}")]
    Encode(String),
}
