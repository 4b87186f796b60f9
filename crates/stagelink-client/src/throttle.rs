//! 运动节流器（latest-target-wins）
//!
//! 持续点动时输入端以固定节拍产生目标位移，而服务器不确认运动命令，
//! 客户端无法据此自我调速。节流器只保存**一个**待发送样本（原子替换的槽位，
//! 不是队列），由唯一的工作线程取出并按最小间隔发送：
//!
//! 1. 发送频率永远不超过 `min_move_interval`
//! 2. 被新样本覆盖的旧目标直接丢弃，不会乱序执行
//! 3. 最终发送的总是用户最新的意图
//!
//! 发送失败只记录日志，工作线程继续处理下一个样本。
//!
//! 每个样本都带着提交时的批次号。`discard_pending()` 推进批次号，
//! 工作线程在最小间隔等待之后、调用回调之前各检查一次，旧批次的样本
//! 即使已被取出也不会发送。

use crate::error::ClientError;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 一次相对位移目标（微米）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub dx_um: f64,
    pub dy_um: f64,
}

impl MotionSample {
    pub fn new(dx_um: f64, dy_um: f64) -> Self {
        Self { dx_um, dy_um }
    }

    /// 位移长度
    pub fn magnitude(&self) -> f64 {
        self.dx_um.hypot(self.dy_um)
    }

    /// 按方向不变的方式把长度限制在 `max_um` 以内
    pub fn clamped(self, max_um: f64) -> Self {
        let magnitude = self.magnitude();
        if magnitude <= max_um || magnitude == 0.0 {
            return self;
        }
        let k = max_um / magnitude;
        Self::new(self.dx_um * k, self.dy_um * k)
    }
}

/// 运动回调：把 `(dx_um, dy_um)` 发送给服务器
pub type MovementCallback = Box<dyn Fn(f64, f64) -> Result<(), ClientError> + Send + Sync>;

/// 节流统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    /// 提交的样本数
    pub submitted: u64,
    /// 被更新样本覆盖（从未发送）的样本数
    pub superseded: u64,
    /// 成功发送的命令数
    pub sent: u64,
    /// 发送失败的命令数
    pub failed: u64,
    /// 因 `discard_pending()` 作废而未发送的样本数
    pub discarded: u64,
}

struct CallbackSlot(MovementCallback);

/// 槽位中的样本及其提交批次
struct Pending {
    sample: MotionSample,
    epoch: u64,
}

struct ThrottleShared {
    slot: ArcSwapOption<Pending>,
    /// 每次 `discard_pending()` 加一
    epoch: AtomicU64,
    callback: ArcSwapOption<CallbackSlot>,
    /// f64 位模式
    max_step_um: AtomicU64,
    min_interval: Duration,
    running: AtomicBool,
    submitted: AtomicU64,
    superseded: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl ThrottleShared {
    fn max_step(&self) -> f64 {
        f64::from_bits(self.max_step_um.load(Ordering::Relaxed))
    }

    fn is_stale(&self, pending: &Pending) -> bool {
        pending.epoch != self.epoch.load(Ordering::Acquire)
    }
}

/// 运动节流器
pub struct MotionThrottler {
    shared: Arc<ThrottleShared>,
    doorbell: Sender<()>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MotionThrottler {
    /// 创建节流器并启动工作线程
    pub fn new(min_move_interval: Duration, max_step_um: f64) -> Result<Self, ClientError> {
        validate_step(max_step_um)?;

        let shared = Arc::new(ThrottleShared {
            slot: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
            callback: ArcSwapOption::empty(),
            max_step_um: AtomicU64::new(max_step_um.to_bits()),
            min_interval: min_move_interval,
            running: AtomicBool::new(true),
            submitted: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        });

        let (doorbell, doorbell_rx) = crossbeam_channel::bounded(1);
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(0);
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("stagelink-jog".into())
            .spawn(move || drain_loop(&worker_shared, &doorbell_rx, &shutdown_rx))
            .map_err(ClientError::Spawn)?;

        Ok(Self {
            shared,
            doorbell,
            shutdown: Mutex::new(Some(shutdown)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 设置运动回调（替换之前的回调）
    pub fn set_movement_callback(
        &self,
        callback: impl Fn(f64, f64) -> Result<(), ClientError> + Send + Sync + 'static,
    ) {
        self.shared
            .callback
            .store(Some(Arc::new(CallbackSlot(Box::new(callback)))));
    }

    /// 设置单次发送的最大步长（微米）
    pub fn set_max_step(&self, max_step_um: f64) -> Result<(), ClientError> {
        validate_step(max_step_um)?;
        self.shared
            .max_step_um
            .store(max_step_um.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn max_step(&self) -> f64 {
        self.shared.max_step()
    }

    pub fn min_move_interval(&self) -> Duration {
        self.shared.min_interval
    }

    /// 提交新样本，覆盖尚未发送的旧样本
    pub fn submit(&self, sample: MotionSample) -> Result<(), ClientError> {
        if !self.is_running() {
            return Err(ClientError::ThrottlerStopped);
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        let pending = Pending {
            sample,
            epoch: self.shared.epoch.load(Ordering::Acquire),
        };
        if self.shared.slot.swap(Some(Arc::new(pending))).is_some() {
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
        }
        // 门铃已经响着就不用再按
        let _ = self.doorbell.try_send(());
        Ok(())
    }

    /// 丢弃尚未发送的样本
    ///
    /// 包括工作线程已取出、仍在等待最小间隔的样本。已经进入回调的发送
    /// 会正常完成。
    pub fn discard_pending(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        if self.shared.slot.swap(None).is_some() {
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            trace!("Pending jog sample discarded");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            superseded: self.shared.superseded.load(Ordering::Relaxed),
            sent: self.shared.sent.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    /// 停止工作线程并清空待发送样本
    ///
    /// 幂等，可在任何时候调用（包括从运动回调内部）。
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.discard_pending();
        // 丢弃发送端即可唤醒工作线程
        drop(self.shutdown.lock().take());

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("Jog worker thread panicked");
            }
        }
    }
}

impl Drop for MotionThrottler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_step(max_step_um: f64) -> Result<(), ClientError> {
    if max_step_um.is_finite() && max_step_um > 0.0 {
        Ok(())
    } else {
        Err(ClientError::InvalidParameter(format!(
            "max step must be a positive number of micrometres, got {}",
            max_step_um
        )))
    }
}

fn drain_loop(shared: &ThrottleShared, doorbell: &Receiver<()>, shutdown: &Receiver<()>) {
    let mut last_dispatch: Option<Instant> = None;

    loop {
        let woke = select! {
            recv(doorbell) -> msg => msg.is_ok(),
            recv(shutdown) -> _ => false,
        };
        if !woke {
            break;
        }

        let Some(mut pending) = shared.slot.swap(None) else {
            continue;
        };

        // 最小间隔（可被 stop() 打断）
        if let Some(last) = last_dispatch {
            let ready_at = last + shared.min_interval;
            let now = Instant::now();
            if ready_at > now {
                match shutdown.recv_timeout(ready_at - now) {
                    Err(RecvTimeoutError::Timeout) => {},
                    _ => break,
                }
            }
        }

        // 等待期间到达的新样本优先
        if let Some(newer) = shared.slot.swap(None) {
            shared.superseded.fetch_add(1, Ordering::Relaxed);
            pending = newer;
        }
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if shared.is_stale(&pending) {
            shared.discarded.fetch_add(1, Ordering::Relaxed);
            trace!("Jog sample from an ended gesture dropped");
            continue;
        }

        let target = pending.sample.clamped(shared.max_step());
        let Some(callback) = shared.callback.load_full() else {
            debug!("No movement callback set, dropping jog sample");
            continue;
        };
        if shared.is_stale(&pending) {
            shared.discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        last_dispatch = Some(Instant::now());
        match (callback.0)(target.dx_um, target.dy_um) {
            Ok(()) => {
                shared.sent.fetch_add(1, Ordering::Relaxed);
                trace!("Jog move ({:.2}, {:.2}) um sent", target.dx_um, target.dy_um);
            },
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Jog move dropped: {}", e);
            },
        }
    }
    debug!("Jog worker exiting");
}
