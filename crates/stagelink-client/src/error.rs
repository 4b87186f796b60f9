//! 客户端层错误类型定义

use stagelink_driver::DriverError;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 驱动层错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 运动节流器已停止
    #[error("Motion throttler has been stopped")]
    ThrottlerStopped,

    /// 无法启动后台线程
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 参数非法
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ClientError {
    /// 底层驱动错误（如果有）
    pub fn as_driver(&self) -> Option<&DriverError> {
        match self {
            ClientError::Driver(e) => Some(e),
            _ => None,
        }
    }
}
