//! 链路指标模块
//!
//! 提供零开销的原子计数器，用于观察连接生命周期和命令通道的健康状态。
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// socket 拨号次数（包括显式连接和自动重连）
    pub dial_attempts: AtomicU64,
    /// 自动重连尝试次数
    pub reconnect_attempts: AtomicU64,
    /// 自动重连成功次数
    pub reconnects: AtomicU64,
    /// 健康检查次数
    pub health_checks: AtomicU64,
    /// 健康检查失败次数
    pub health_failures: AtomicU64,
    /// 状态转换次数
    pub state_transitions: AtomicU64,
    /// 已发送的请求数
    pub requests_sent: AtomicU64,
    /// 已收到的终止回复数
    pub responses_received: AtomicU64,
    /// 已收到的进度消息数
    pub progress_messages: AtomicU64,
    /// 读超时次数
    pub read_timeouts: AtomicU64,
    /// 协议错误次数（格式错误或意外消息）
    pub protocol_errors: AtomicU64,
    /// 服务器返回 error 的次数
    pub server_errors: AtomicU64,
}

impl LinkMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dial_attempts: self.dial_attempts.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            health_failures: self.health_failures.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            progress_messages: self.progress_messages.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.dial_attempts,
            &self.reconnect_attempts,
            &self.reconnects,
            &self.health_checks,
            &self.health_failures,
            &self.state_transitions,
            &self.requests_sent,
            &self.responses_received,
            &self.progress_messages,
            &self.read_timeouts,
            &self.protocol_errors,
            &self.server_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub dial_attempts: u64,
    pub reconnect_attempts: u64,
    pub reconnects: u64,
    pub health_checks: u64,
    pub health_failures: u64,
    pub state_transitions: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub progress_messages: u64,
    pub read_timeouts: u64,
    pub protocol_errors: u64,
    pub server_errors: u64,
}

impl MetricsSnapshot {
    /// 健康检查失败率（百分比），没有检查时返回 0.0
    pub fn health_failure_rate(&self) -> f64 {
        if self.health_checks == 0 {
            return 0.0;
        }
        (self.health_failures as f64 / self.health_checks as f64) * 100.0
    }
}
