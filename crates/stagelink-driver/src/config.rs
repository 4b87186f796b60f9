//! 连接配置
//!
//! `ConnectionConfig` 在会话开始后不可变，由 `ConnectionManager` 独占持有。
//! 配置可以从 TOML 加载：
//!
//! ```toml
//! host = "192.168.1.40"
//! port = 5005
//! connect_timeout_ms = 2000
//! read_timeout_ms = 5000
//! max_reconnect_attempts = 3
//! reconnect_delay_ms = 1000
//! health_check_interval_ms = 5000
//! ```

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 默认服务器端口
pub const DEFAULT_PORT: u16 = 5005;

/// 连接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 服务器主机名或 IP
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 建立 socket 的超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 等待回复的空闲超时（毫秒）
    pub read_timeout_ms: u64,
    /// 自动重连的最大尝试次数（0 表示不自动重连）
    pub max_reconnect_attempts: u32,
    /// 两次重连尝试之间的间隔（毫秒）
    pub reconnect_delay_ms: u64,
    /// 健康检查周期（毫秒）
    pub health_check_interval_ms: u64,
    /// 单次健康检查的回复超时（毫秒）
    pub health_check_timeout_ms: u64,
    /// 连续多少次健康检查失败后进入重连
    pub health_failure_threshold: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 1000,
            health_check_interval_ms: 5000,
            health_check_timeout_ms: 1500,
            health_failure_threshold: 3,
        }
    }
}

impl ConnectionConfig {
    /// 使用默认参数创建指向 `host:port` 的配置
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_health_check(mut self, interval_ms: u64, timeout_ms: u64, threshold: u32) -> Self {
        self.health_check_interval_ms = interval_ms;
        self.health_check_timeout_ms = timeout_ms;
        self.health_failure_threshold = threshold;
        self
    }

    /// `host:port` 形式的地址（IPv6 字面量会加方括号）
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.host.trim().is_empty() {
            return Err(DriverError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(DriverError::Config("port must not be 0".into()));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("health_check_timeout_ms", self.health_check_timeout_ms),
        ] {
            if value == 0 {
                return Err(DriverError::Config(format!("{} must be positive", name)));
            }
        }
        if self.health_failure_threshold == 0 {
            return Err(DriverError::Config(
                "health_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// 保存为 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), DriverError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// 拼接 `host:port`，IPv6 字面量加方括号
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// "目标配置已加载" 闸门
///
/// `connect()` 在任何 socket 操作之前检查此闸门，未通过时返回 `ConfigNotSet`。
pub trait TargetGuard: Send + Sync {
    fn is_target_loaded(&self) -> bool;
}

impl TargetGuard for AtomicBool {
    fn is_target_loaded(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<F> TargetGuard for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_target_loaded(&self) -> bool {
        self()
    }
}

/// 可共享的闸门标志
#[derive(Debug, Clone, Default)]
pub struct TargetFlag(Arc<AtomicBool>);

impl TargetFlag {
    /// 创建闸门（`loaded` 为初始值）
    pub fn new(loaded: bool) -> Self {
        Self(Arc::new(AtomicBool::new(loaded)))
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.0.store(loaded, Ordering::Release);
    }
}

impl TargetGuard for TargetFlag {
    fn is_target_loaded(&self) -> bool {
        self.0.is_target_loaded()
    }
}
