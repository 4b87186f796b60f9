//! 连接管理器
//!
//! 持有唯一的主连接，负责显式连接/断开、状态发布，并在连接建立后启动
//! 健康检查线程（见 [`supervisor`](crate::supervisor)）。
//!
//! 所有状态转换都在 `lifecycle` 锁内完成，并附带会话代号（generation）检查：
//! `disconnect()` 会使代号递增，旧会话的后台线程随后做出的任何转换都会被拒绝。
//! `lifecycle` 锁从不跨越 IO 持有。

use crate::channel::{CommandChannel, ProgressSink};
use crate::config::{ConnectionConfig, TargetGuard};
use crate::error::DriverError;
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::probe::{ProbeResult, probe_with};
use crate::state::{AtomicHealth, ConnectionState, HealthStatus, StateCell, StateChange};
use crate::supervisor::{self, Signal, SupervisorHandle};
use arc_swap::ArcSwapOption;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde_json::Value;
use stagelink_protocol::{Command, GetPosition, GetStatus, Position, ReplyKind, Request, ServerStatus};
use stagelink_transport::{Dialer, TcpDialer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 管理器与健康检查线程共享的状态
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    guard: Arc<dyn TargetGuard>,
    dialer: Arc<dyn Dialer>,
    pub(crate) state: StateCell,
    channel: ArcSwapOption<CommandChannel>,
    pub(crate) metrics: Arc<LinkMetrics>,
    pub(crate) health: AtomicHealth,
    generation: AtomicU64,
    lifecycle: Mutex<()>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl Shared {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub(crate) fn current_channel(&self) -> Option<Arc<CommandChannel>> {
        self.channel.load_full()
    }

    /// 调用方必须持有 `lifecycle` 锁
    fn transition_locked(
        &self,
        expected: &[ConnectionState],
        to: ConnectionState,
        reason: &str,
    ) -> Result<StateChange, ConnectionState> {
        let change = self.state.transition_from(expected, to, reason)?;
        LinkMetrics::incr(&self.metrics.state_transitions);
        Ok(change)
    }

    /// 拨号、建立命令通道并完成握手
    pub(crate) fn establish(&self) -> Result<Arc<CommandChannel>, DriverError> {
        let addr = self.config.address();
        LinkMetrics::incr(&self.metrics.dial_attempts);
        debug!("Dialing {}", addr);

        let transport = self.dialer.dial(&addr, self.config.connect_timeout())?;
        let channel = Arc::new(CommandChannel::new(
            transport,
            self.config.read_timeout(),
            self.metrics.clone(),
        ));

        // 握手与探测、健康检查使用同一条状态查询
        match channel.send(&GetStatus) {
            Ok(status) => {
                debug!("Handshake with {} ok, server state {}", addr, status.state);
                Ok(channel)
            },
            Err(e) => {
                channel.close();
                Err(e)
            },
        }
    }

    /// 把新通道装入槽位并转换到 `Connected`
    ///
    /// 会话已过期或状态不符时返回 false，调用方负责关闭通道。
    pub(crate) fn install(
        &self,
        generation: u64,
        channel: Arc<CommandChannel>,
        from: ConnectionState,
        reason: &str,
    ) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_current(generation) {
            return false;
        }
        if self
            .transition_locked(&[from], ConnectionState::Connected, reason)
            .is_err()
        {
            return false;
        }
        self.channel.store(Some(channel));
        self.health.set(HealthStatus::Healthy);
        true
    }

    /// 转换到 `Reconnecting` 并取出旧通道
    pub(crate) fn begin_reconnect(
        &self,
        generation: u64,
        reason: &str,
    ) -> Option<Option<Arc<CommandChannel>>> {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_current(generation) {
            return None;
        }
        self.transition_locked(
            &[ConnectionState::Connected],
            ConnectionState::Reconnecting,
            reason,
        )
        .ok()?;
        self.health.set(HealthStatus::NotConnected);
        Some(self.channel.swap(None))
    }

    /// 停驻到 `Blocked` / `Failed`，关闭当前通道
    ///
    /// 会话已过期时返回 false。
    pub(crate) fn park(
        &self,
        generation: u64,
        from: ConnectionState,
        to: ConnectionState,
        reason: &str,
    ) -> bool {
        let old = {
            let _lifecycle = self.lifecycle.lock();
            if !self.is_current(generation) || self.transition_locked(&[from], to, reason).is_err()
            {
                return false;
            }
            self.health.set(HealthStatus::NotConnected);
            self.channel.swap(None)
        };
        if let Some(channel) = old {
            channel.close();
        }
        true
    }

    fn notify_link_lost(&self) {
        if let Some(handle) = self.supervisor.lock().as_ref() {
            handle.signal(Signal::LinkLost);
        }
    }
}

/// 连接管理器
///
/// # 示例
///
/// ```no_run
/// use stagelink_driver::{ConnectionConfig, ConnectionManager, TargetFlag};
/// use std::sync::Arc;
///
/// let target = Arc::new(TargetFlag::new(true));
/// let manager = ConnectionManager::new(ConnectionConfig::new("192.168.1.20", 5005), target);
/// manager.connect()?;
/// let position = manager.position()?;
/// println!("stage at ({}, {})", position.x_um, position.y_um);
/// # Ok::<(), stagelink_driver::DriverError>(())
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// 使用 TCP 拨号器创建管理器（不会立即连接）
    pub fn new(config: ConnectionConfig, guard: Arc<dyn TargetGuard>) -> Self {
        Self::with_dialer(config, guard, Arc::new(TcpDialer))
    }

    /// 使用自定义拨号器创建管理器
    pub fn with_dialer(
        config: ConnectionConfig,
        guard: Arc<dyn TargetGuard>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                guard,
                dialer,
                state: StateCell::new(),
                channel: ArcSwapOption::empty(),
                metrics: Arc::new(LinkMetrics::new()),
                health: AtomicHealth::default(),
                generation: AtomicU64::new(0),
                lifecycle: Mutex::new(()),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// 显式连接
    ///
    /// - 未加载目标配置时返回 `ConfigNotSet`，不发生任何网络操作
    /// - 已连接时直接返回 `Ok(())`
    /// - 正在连接或重连时返回 `InvalidState`
    /// - 从 `Blocked` / `Failed` 调用时先复位到 `Disconnected`
    ///
    /// 连接失败不会自动重试；服务器报告槽位占用时进入 `Blocked`。
    pub fn connect(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        if !shared.guard.is_target_loaded() {
            warn!("Connect refused: no target configuration loaded");
            return Err(DriverError::ConfigNotSet);
        }
        shared.config.validate()?;

        let generation = {
            let _lifecycle = shared.lifecycle.lock();
            match shared.state.get() {
                ConnectionState::Connected => return Ok(()),
                state @ (ConnectionState::Connecting | ConnectionState::Reconnecting) => {
                    return Err(DriverError::InvalidState(state));
                },
                state @ (ConnectionState::Blocked | ConnectionState::Failed) => {
                    let _ = shared.transition_locked(
                        &[state],
                        ConnectionState::Disconnected,
                        "reset before connect",
                    );
                },
                ConnectionState::Disconnected => {},
            }
            shared
                .transition_locked(
                    &[ConnectionState::Disconnected],
                    ConnectionState::Connecting,
                    "connect requested",
                )
                .map_err(DriverError::InvalidState)?;
            shared.generation.load(Ordering::Acquire)
        };

        info!("Connecting to {}", shared.config.address());
        match shared.establish() {
            Ok(channel) => {
                if !shared.install(
                    generation,
                    channel.clone(),
                    ConnectionState::Connecting,
                    "handshake complete",
                ) {
                    channel.close();
                    return Err(DriverError::Interrupted);
                }
                self.start_supervisor(generation);
                Ok(())
            },
            Err(DriverError::Blocked(message)) => {
                if !shared.park(
                    generation,
                    ConnectionState::Connecting,
                    ConnectionState::Blocked,
                    &message,
                ) {
                    return Err(DriverError::Interrupted);
                }
                Err(DriverError::Blocked(message))
            },
            Err(e) => {
                if !shared.park(
                    generation,
                    ConnectionState::Connecting,
                    ConnectionState::Failed,
                    &e.to_string(),
                ) {
                    return Err(DriverError::Interrupted);
                }
                Err(e)
            },
        }
    }

    fn start_supervisor(&self, generation: u64) {
        let previous = {
            let _lifecycle = self.shared.lifecycle.lock();
            if !self.shared.is_current(generation) {
                return;
            }
            match supervisor::spawn(self.shared.clone(), generation) {
                Ok(handle) => self.shared.supervisor.lock().replace(handle),
                Err(e) => {
                    error!("Failed to spawn health supervisor: {}", e);
                    return;
                },
            }
        };
        // 上一个会话的线程已经（或即将）退出
        if let Some(old) = previous {
            old.stop();
        }
    }

    /// 断开连接（任意状态下都允许，幂等）
    ///
    /// 打断进行中的命令和重连等待；返回后不会再有任何后台重连尝试。
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let (channel, supervisor) = {
            let _lifecycle = shared.lifecycle.lock();
            shared.generation.fetch_add(1, Ordering::AcqRel);
            let current = shared.state.get();
            if current != ConnectionState::Disconnected {
                let _ = shared.transition_locked(
                    &[current],
                    ConnectionState::Disconnected,
                    "disconnect requested",
                );
            }
            shared.health.set(HealthStatus::NotConnected);
            (shared.channel.swap(None), shared.supervisor.lock().take())
        };

        if let Some(channel) = channel {
            channel.close();
        }
        if let Some(supervisor) = supervisor {
            supervisor.stop();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// 最近一次状态转换（用于状态栏显示原因）
    pub fn last_change(&self) -> Option<StateChange> {
        self.shared.state.last_change()
    }

    /// 订阅状态转换（按提交顺序投递）
    pub fn subscribe(&self) -> Receiver<StateChange> {
        self.shared.state.subscribe()
    }

    /// 阻塞等待满足 `predicate` 的状态，超时返回 None
    pub fn wait_for_state(
        &self,
        predicate: impl Fn(ConnectionState) -> bool,
        timeout: Duration,
    ) -> Option<ConnectionState> {
        let rx = self.subscribe();
        let current = self.state();
        if predicate(current) {
            return Some(current);
        }
        let deadline = Instant::now() + timeout;
        while let Ok(change) = rx.recv_deadline(deadline) {
            if predicate(change.to) {
                return Some(change.to);
            }
        }
        None
    }

    /// 最近一次健康检查结果（未连接时为 `NotConnected`）
    pub fn health(&self) -> HealthStatus {
        if self.is_connected() {
            self.shared.health.get()
        } else {
            HealthStatus::NotConnected
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 对已配置的地址做一次独立探测（不影响主连接）
    pub fn probe(&self) -> ProbeResult {
        probe_with(
            self.shared.dialer.as_ref(),
            &self.shared.config.address(),
            self.shared.config.connect_timeout(),
        )
    }

    /// 在主连接上执行强类型命令
    pub fn send<C: Command>(&self, command: &C) -> Result<C::Output, DriverError> {
        self.with_channel(|channel| channel.send(command))
    }

    /// 执行命令并接收进度
    pub fn send_with_progress<C: Command>(
        &self,
        command: &C,
        sink: ProgressSink<'_>,
    ) -> Result<C::Output, DriverError> {
        self.with_channel(|channel| channel.send_with_progress(command, sink))
    }

    /// 使用自定义读超时执行命令
    pub fn send_timeout<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Output, DriverError> {
        self.with_channel(|channel| channel.send_timeout(command, timeout))
    }

    /// 执行原始请求
    pub fn send_raw(
        &self,
        request: &Request,
        reply: ReplyKind,
        sink: Option<ProgressSink<'_>>,
    ) -> Result<Value, DriverError> {
        let timeout = self.shared.config.read_timeout();
        self.with_channel(|channel| channel.send_raw(request, reply, sink, timeout))
    }

    pub fn position(&self) -> Result<Position, DriverError> {
        self.send(&GetPosition)
    }

    pub fn status(&self) -> Result<ServerStatus, DriverError> {
        self.send(&GetStatus)
    }

    fn with_channel<T>(
        &self,
        exchange: impl FnOnce(&CommandChannel) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let shared = &self.shared;
        let generation = shared.generation.load(Ordering::Acquire);
        let channel = match shared.state.get() {
            ConnectionState::Connected => {
                shared.current_channel().ok_or(DriverError::NotConnected)?
            },
            ConnectionState::Blocked => {
                let reason = shared
                    .state
                    .last_change()
                    .map(|c| c.reason)
                    .unwrap_or_else(|| String::from("server slot occupied"));
                return Err(DriverError::Blocked(reason));
            },
            _ => return Err(DriverError::NotConnected),
        };

        let result = exchange(&channel);
        match &result {
            Err(e) if e.is_disconnect() => shared.notify_link_lost(),
            Err(DriverError::Blocked(message)) => {
                shared.park(
                    generation,
                    ConnectionState::Connected,
                    ConnectionState::Blocked,
                    message,
                );
            },
            _ => {},
        }
        result
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.shared.config.address())
            .field("state", &self.state())
            .finish()
    }
}
