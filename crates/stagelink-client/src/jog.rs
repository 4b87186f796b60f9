//! 点动控制
//!
//! [`JogPad`] 把拖拽手势转换为固定节拍的 [`MotionSample`]，交给
//! [`MotionThrottler`] 发送。偏移量先按 `pad_radius` 归一化并限制在 1 以内：
//! 落在死区内的偏移不产生样本，其余按平方缩放，小偏移对应小步长，
//! 满偏移对应 `max_step_um`。

use crate::error::ClientError;
use crate::throttle::{MotionSample, MotionThrottler, ThrottleStats};
use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// 点动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogConfig {
    /// 手势保持期间的采样节拍（毫秒）
    pub tick_interval_ms: u64,
    /// 两次运动命令之间的最小间隔（毫秒）
    pub min_move_interval_ms: u64,
    /// 死区（满偏移的比例）
    pub dead_zone: f64,
    /// 满偏移对应的步长（微米）
    pub max_step_um: f64,
    /// 满偏移对应的拖拽距离（输入坐标单位）
    pub pad_radius: f64,
}

impl Default for JogConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 150,
            min_move_interval_ms: 400,
            dead_zone: 0.10,
            max_step_um: 50.0,
            pad_radius: 1.0,
        }
    }
}

impl JogConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn min_move_interval(&self) -> Duration {
        Duration::from_millis(self.min_move_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.tick_interval_ms == 0 {
            return Err(ClientError::InvalidParameter(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dead_zone) {
            return Err(ClientError::InvalidParameter(format!(
                "dead_zone must be in [0, 1), got {}",
                self.dead_zone
            )));
        }
        for (name, value) in [
            ("max_step_um", self.max_step_um),
            ("pad_radius", self.pad_radius),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ClientError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// 把拖拽偏移转换为运动样本
///
/// 归一化偏移小于 `dead_zone` 时返回 None。
pub fn deflection_to_sample(
    dx: f64,
    dy: f64,
    pad_radius: f64,
    dead_zone: f64,
    max_step_um: f64,
) -> Option<MotionSample> {
    let distance = dx.hypot(dy);
    if !distance.is_finite() || distance == 0.0 || pad_radius <= 0.0 {
        return None;
    }
    let n = (distance / pad_radius).min(1.0);
    if n < dead_zone {
        return None;
    }
    let step = max_step_um * n * n;
    Some(MotionSample::new(dx / distance * step, dy / distance * step))
}

#[derive(Debug, Default)]
struct Gesture {
    origin: Option<(f64, f64)>,
    current: (f64, f64),
}

impl Gesture {
    fn deflection(&self) -> Option<(f64, f64)> {
        let (ox, oy) = self.origin?;
        Some((self.current.0 - ox, self.current.1 - oy))
    }
}

struct PadShared {
    config: JogConfig,
    gesture: Mutex<Gesture>,
    throttler: MotionThrottler,
}

impl PadShared {
    fn raw_deflection(&self) -> Option<(f64, f64)> {
        self.gesture.lock().deflection()
    }

    /// 提交当前偏移对应的样本
    ///
    /// 读取和提交都在手势锁内完成，`end_drag()` 不会夹在两者之间。
    fn submit_current(&self) -> Result<(), ClientError> {
        let gesture = self.gesture.lock();
        let Some((dx, dy)) = gesture.deflection() else {
            return Ok(());
        };
        match self.sample_for(dx, dy) {
            Some(sample) => self.throttler.submit(sample),
            None => Ok(()),
        }
    }

    fn sample_for(&self, dx: f64, dy: f64) -> Option<MotionSample> {
        deflection_to_sample(
            dx,
            dy,
            self.config.pad_radius,
            self.config.dead_zone,
            self.throttler.max_step(),
        )
    }
}

/// 点动手柄
///
/// 后台节拍线程在手势进行时每 `tick_interval` 提交一次样本。
pub struct JogPad {
    shared: Arc<PadShared>,
    shutdown: Mutex<Option<Sender<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl JogPad {
    /// 创建点动手柄，`callback` 负责真正发送相对移动
    pub fn new(
        config: JogConfig,
        callback: impl Fn(f64, f64) -> Result<(), ClientError> + Send + Sync + 'static,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let throttler = MotionThrottler::new(config.min_move_interval(), config.max_step_um)?;
        throttler.set_movement_callback(callback);

        let shared = Arc::new(PadShared {
            config,
            gesture: Mutex::new(Gesture::default()),
            throttler,
        });

        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let tick = shared.config.tick_interval();
        let ticker_shared = shared.clone();
        let ticker = std::thread::Builder::new()
            .name("stagelink-jog-tick".into())
            .spawn(move || {
                loop {
                    let stop = select! {
                        recv(shutdown_rx) -> _ => true,
                        default(tick) => false,
                    };
                    if stop {
                        break;
                    }
                    if ticker_shared.submit_current().is_err() {
                        break;
                    }
                }
                debug!("Jog ticker exiting");
            })?;

        Ok(Self {
            shared,
            shutdown: Mutex::new(Some(shutdown)),
            ticker: Mutex::new(Some(ticker)),
        })
    }

    pub fn config(&self) -> &JogConfig {
        &self.shared.config
    }

    /// 开始拖拽，`(x, y)` 为参考点
    pub fn begin_drag(&self, x: f64, y: f64) {
        let mut gesture = self.shared.gesture.lock();
        gesture.origin = Some((x, y));
        gesture.current = (x, y);
    }

    /// 更新拖拽位置（未开始拖拽时忽略）
    pub fn update_drag(&self, x: f64, y: f64) {
        let mut gesture = self.shared.gesture.lock();
        if gesture.origin.is_some() {
            gesture.current = (x, y);
        }
    }

    /// 结束拖拽：丢弃未发送的样本，指示器归零
    ///
    /// 正在进行的发送会正常完成。
    pub fn end_drag(&self) {
        let mut gesture = self.shared.gesture.lock();
        *gesture = Gesture::default();
        self.shared.throttler.discard_pending();
    }

    pub fn is_dragging(&self) -> bool {
        self.shared.gesture.lock().origin.is_some()
    }

    /// 指示器位置：归一化偏移，限制在单位圆内
    pub fn indicator(&self) -> (f64, f64) {
        let Some((dx, dy)) = self.shared.raw_deflection() else {
            return (0.0, 0.0);
        };
        let radius = self.shared.config.pad_radius;
        let (nx, ny) = (dx / radius, dy / radius);
        let n = nx.hypot(ny);
        if n > 1.0 { (nx / n, ny / n) } else { (nx, ny) }
    }

    /// 设置满偏移步长（微米）
    pub fn set_max_step(&self, max_step_um: f64) -> Result<(), ClientError> {
        self.shared.throttler.set_max_step(max_step_um)
    }

    pub fn stats(&self) -> ThrottleStats {
        self.shared.throttler.stats()
    }

    /// 停止节拍线程和节流器（幂等）
    pub fn stop(&self) {
        self.end_drag();
        drop(self.shutdown.lock().take());
        if let Some(ticker) = self.ticker.lock().take() {
            if ticker.join().is_err() {
                warn!("Jog ticker thread panicked");
            }
        }
        self.shared.throttler.stop();
    }
}

impl Drop for JogPad {
    fn drop(&mut self) {
        self.stop();
    }
}
