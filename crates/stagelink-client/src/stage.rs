//! 位移台门面
//!
//! [`Stage`] 把连接管理、类型化命令和点动控制组合成面向 UI / 工作流的接口。
//! 所有方法都会阻塞调用线程直到 IO 完成或超时；需要非阻塞界面的调用方
//! 应在后台线程中调用。

use crate::error::ClientError;
use crate::jog::{JogConfig, JogPad};
use crossbeam_channel::Receiver;
use stagelink_driver::{
    ConnectionConfig, ConnectionManager, ConnectionState, DriverError, HealthStatus,
    MetricsSnapshot, ProbeResult, StateChange, TargetGuard,
};
use stagelink_protocol::{
    Command, Home, MoveAbsolute, MoveRelative, Position, Progress, RunSweep, ServerStatus, Stop,
    SweepSummary,
};
use stagelink_transport::Dialer;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 位移台
pub struct Stage {
    manager: Arc<ConnectionManager>,
}

impl Stage {
    pub fn new(config: ConnectionConfig, guard: Arc<dyn TargetGuard>) -> Self {
        Self::from_manager(Arc::new(ConnectionManager::new(config, guard)))
    }

    pub fn with_dialer(
        config: ConnectionConfig,
        guard: Arc<dyn TargetGuard>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self::from_manager(Arc::new(ConnectionManager::with_dialer(config, guard, dialer)))
    }

    pub fn from_manager(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// 底层连接管理器
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        Ok(self.manager.connect()?)
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe(&self) -> Receiver<StateChange> {
        self.manager.subscribe()
    }

    /// 阻塞等待满足条件的状态
    pub fn wait_for_state(
        &self,
        predicate: impl Fn(ConnectionState) -> bool,
        timeout: Duration,
    ) -> Option<ConnectionState> {
        self.manager.wait_for_state(predicate, timeout)
    }

    pub fn health(&self) -> HealthStatus {
        self.manager.health()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.manager.metrics()
    }

    /// 执行任意类型化命令
    pub fn send<C: Command>(&self, command: &C) -> Result<C::Output, ClientError> {
        Ok(self.manager.send(command)?)
    }

    /// 执行命令并接收进度
    pub fn send_with_progress<C: Command>(
        &self,
        command: &C,
        sink: &dyn Fn(&Progress),
    ) -> Result<C::Output, ClientError> {
        Ok(self.manager.send_with_progress(command, sink)?)
    }

    pub fn position(&self) -> Result<Position, ClientError> {
        Ok(self.manager.position()?)
    }

    pub fn status(&self) -> Result<ServerStatus, ClientError> {
        Ok(self.manager.status()?)
    }

    /// 相对移动（服务器不确认）
    pub fn move_relative(&self, dx_um: f64, dy_um: f64) -> Result<(), ClientError> {
        check_finite(&[dx_um, dy_um])?;
        self.send(&MoveRelative { dx_um, dy_um })
    }

    /// 绝对移动（服务器不确认）
    pub fn move_absolute(&self, x_um: f64, y_um: f64) -> Result<(), ClientError> {
        check_finite(&[x_um, y_um])?;
        self.send(&MoveAbsolute { x_um, y_um })
    }

    /// 立即停止运动
    pub fn halt(&self) -> Result<(), ClientError> {
        self.send(&Stop)
    }

    /// 回零，服务器完成后返回
    pub fn home(&self) -> Result<(), ClientError> {
        self.send(&Home)
    }

    /// 多配置扫描，进度按服务器发送顺序交给 `sink`
    pub fn run_sweep(
        &self,
        configurations: u32,
        sink: &dyn Fn(&Progress),
    ) -> Result<SweepSummary, ClientError> {
        if configurations == 0 {
            return Err(ClientError::InvalidParameter(
                "a sweep needs at least one configuration".into(),
            ));
        }
        info!("Starting sweep over {} configurations", configurations);
        self.send_with_progress(&RunSweep { configurations }, sink)
    }

    /// 探测已配置的服务器（不影响主连接）
    pub fn probe(&self) -> ProbeResult {
        self.manager.probe()
    }

    /// 创建与本位移台相连的点动手柄
    ///
    /// 手柄只持有管理器的弱引用，不会阻止连接在 `Stage` 销毁时关闭。
    pub fn jog(&self, config: JogConfig) -> Result<JogPad, ClientError> {
        let manager = Arc::downgrade(&self.manager);
        JogPad::new(config, move |dx_um, dy_um| {
            let manager = manager.upgrade().ok_or(DriverError::Cancelled)?;
            manager.send(&MoveRelative { dx_um, dy_um })?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("manager", &self.manager).finish()
    }
}

fn check_finite(values: &[f64]) -> Result<(), ClientError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ClientError::InvalidParameter(
            "coordinates must be finite".into(),
        ))
    }
}
