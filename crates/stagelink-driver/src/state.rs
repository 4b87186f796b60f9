//! 连接状态机
//!
//! ```text
//! Disconnected --connect()--> Connecting
//! Connecting   --握手成功-----> Connected
//! Connecting   --socket 失败--> Failed        （显式连接不自动重试）
//! Connected    --健康检查失败 / IO 错误--> Reconnecting
//! Reconnecting --重试成功-----> Connected
//! Reconnecting --次数耗尽-----> Failed
//! Connecting | Connected | Reconnecting --服务器报告槽位占用--> Blocked
//! 任意状态     --disconnect()--> Disconnected
//! ```
//!
//! 状态只在 `StateCell` 的锁内修改；订阅者在转换提交后按顺序收到 [`StateChange`]。

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tracing::info;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// 未连接（初始状态，也是本次会话的终止状态）
    #[default]
    Disconnected = 0,
    /// 正在建立连接并握手
    Connecting = 1,
    /// 已连接且健康
    Connected = 2,
    /// 连接丢失，后台正在重连
    Reconnecting = 3,
    /// 服务器正在服务其他客户端（需要用户决定，不自动重试）
    Blocked = 4,
    /// 连接失败或重连次数耗尽
    Failed = 5,
}

impl ConnectionState {
    /// 是否为 "需要用户介入" 的停驻状态
    pub fn is_parked(self) -> bool {
        matches!(self, ConnectionState::Blocked | ConnectionState::Failed)
    }

    /// 状态机是否允许 `self -> to`
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, to) {
            // disconnect() 总是允许（幂等的自环除外）
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected | Failed | Blocked) => true,
            (Connected, Reconnecting | Blocked) => true,
            (Reconnecting, Connected | Failed | Blocked) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Blocked => "blocked",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 一次已提交的状态转换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// 转换原因（用于状态显示和日志）
    pub reason: String,
    pub at: Instant,
}

/// 状态单元：唯一的跨线程可变共享值
pub(crate) struct StateCell {
    state: Mutex<ConnectionState>,
    last_change: Mutex<Option<StateChange>>,
    subscribers: Mutex<Vec<Sender<StateChange>>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            last_change: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// 最近一次转换（包含原因）
    pub(crate) fn last_change(&self) -> Option<StateChange> {
        self.last_change.lock().clone()
    }

    /// 订阅后续的状态转换
    pub(crate) fn subscribe(&self) -> Receiver<StateChange> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// 仅当当前状态属于 `expected` 时转换到 `to`
    ///
    /// 返回 `Err(current)` 表示当前状态不匹配或转换不合法。
    pub(crate) fn transition_from(
        &self,
        expected: &[ConnectionState],
        to: ConnectionState,
        reason: &str,
    ) -> Result<StateChange, ConnectionState> {
        let mut state = self.state.lock();
        let from = *state;
        if !expected.contains(&from) || !from.can_transition_to(to) {
            return Err(from);
        }
        *state = to;

        let change = StateChange {
            from,
            to,
            reason: reason.to_string(),
            at: Instant::now(),
        };
        info!("Connection state: {} -> {} ({})", from, to, reason);
        *self.last_change.lock() = Some(change.clone());

        // 在状态锁内发布，保证订阅者看到的顺序与提交顺序一致
        self.subscribers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
        Ok(change)
    }
}

/// 最近一次健康检查的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HealthStatus {
    /// 没有连接
    #[default]
    NotConnected = 0,
    /// 有连接但没有按时得到合法回复（最常见的原因是其他客户端占用了服务器）
    Unresponsive = 1,
    /// 服务器正常回复
    Healthy = 2,
}

impl HealthStatus {
    /// 从 u8 转换，无效值视为 NotConnected
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Unresponsive,
            2 => Self::Healthy,
            _ => Self::NotConnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 健康状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub(crate) struct AtomicHealth(AtomicU8);

impl AtomicHealth {
    pub(crate) fn get(&self) -> HealthStatus {
        HealthStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: HealthStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}
