//! 健康检查与自动重连
//!
//! 每个已建立的会话对应一个后台线程：
//! - 按 `health_check_interval` 在主连接上发送状态查询
//! - 连续失败达到阈值，或检测到连接断开时进入 `Reconnecting`
//! - 最多重试 `max_reconnect_attempts` 次，首次立即进行，之后间隔 `reconnect_delay`
//! - 服务器报告槽位占用时立即停驻到 `Blocked`，不再重试
//!
//! 线程只在自己的会话代号仍然有效时修改状态；`disconnect()` 之后它最多
//! 完成当前这一次拨号，然后退出。

use crate::error::DriverError;
use crate::manager::Shared;
use crate::metrics::LinkMetrics;
use crate::probe::{StatusCheck, classify_status_reply};
use crate::state::{ConnectionState, HealthStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use stagelink_protocol::GetStatus;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 发往健康检查线程的控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// 会话结束，线程退出
    Shutdown,
    /// 前台命令发现连接已断开
    LinkLost,
}

pub(crate) struct SupervisorHandle {
    control: Sender<Signal>,
    thread: JoinHandle<()>,
}

impl SupervisorHandle {
    pub(crate) fn signal(&self, signal: Signal) {
        let _ = self.control.send(signal);
    }

    /// 通知退出并等待线程结束
    pub(crate) fn stop(self) {
        let _ = self.control.send(Signal::Shutdown);
        if self.thread.join().is_err() {
            warn!("Health supervisor thread panicked");
        }
    }
}

pub(crate) fn spawn(shared: Arc<Shared>, generation: u64) -> std::io::Result<SupervisorHandle> {
    let (control, rx) = crossbeam_channel::unbounded();
    let thread = std::thread::Builder::new()
        .name("stagelink-supervisor".into())
        .spawn(move || run(&shared, generation, &rx))?;
    Ok(SupervisorHandle { control, thread })
}

fn run(shared: &Shared, generation: u64, control: &Receiver<Signal>) {
    let config = &shared.config;
    let interval = config.health_check_interval();
    let threshold = config.health_failure_threshold.max(1);
    let mut failures = 0u32;

    debug!("Health supervisor started (interval {:?})", interval);
    loop {
        let reason = match control.recv_timeout(interval) {
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::LinkLost) => String::from("connection lost"),
            Err(RecvTimeoutError::Timeout) => {
                if !shared.is_current(generation)
                    || shared.state.get() != ConnectionState::Connected
                {
                    break;
                }
                match check_health(shared) {
                    HealthTick::Healthy => {
                        failures = 0;
                        continue;
                    },
                    HealthTick::Occupied(message) => {
                        shared.park(
                            generation,
                            ConnectionState::Connected,
                            ConnectionState::Blocked,
                            &message,
                        );
                        break;
                    },
                    HealthTick::Lost(e) => format!("connection lost: {}", e),
                    HealthTick::Failed(e) => {
                        failures += 1;
                        warn!("Health check failed ({}/{}): {}", failures, threshold, e);
                        if failures < threshold {
                            continue;
                        }
                        format!("{} consecutive health checks failed", failures)
                    },
                }
            },
        };

        if !shared.is_current(generation) {
            break;
        }
        match reconnect(shared, generation, control, &reason) {
            Outcome::Reconnected => failures = 0,
            Outcome::Stopped => break,
        }
    }
    debug!("Health supervisor exiting");
}

enum HealthTick {
    Healthy,
    Occupied(String),
    Lost(DriverError),
    Failed(DriverError),
}

fn check_health(shared: &Shared) -> HealthTick {
    let Some(channel) = shared.current_channel() else {
        return HealthTick::Lost(DriverError::NotConnected);
    };
    LinkMetrics::incr(&shared.metrics.health_checks);

    let reply = channel.send_timeout(&GetStatus, shared.config.health_check_timeout());
    match classify_status_reply(reply) {
        StatusCheck::Healthy(_) => {
            shared.health.set(HealthStatus::Healthy);
            HealthTick::Healthy
        },
        StatusCheck::Occupied(message) => {
            LinkMetrics::incr(&shared.metrics.health_failures);
            HealthTick::Occupied(message)
        },
        StatusCheck::Lost(e) => {
            LinkMetrics::incr(&shared.metrics.health_failures);
            HealthTick::Lost(e)
        },
        StatusCheck::Unresponsive(e) => {
            LinkMetrics::incr(&shared.metrics.health_failures);
            shared.health.set(HealthStatus::Unresponsive);
            if !channel.is_alive() {
                return HealthTick::Lost(e);
            }
            HealthTick::Failed(e)
        },
    }
}

enum Outcome {
    Reconnected,
    Stopped,
}

fn reconnect(shared: &Shared, generation: u64, control: &Receiver<Signal>, reason: &str) -> Outcome {
    let Some(old) = shared.begin_reconnect(generation, reason) else {
        return Outcome::Stopped;
    };
    if let Some(channel) = old {
        channel.close();
    }

    let max_attempts = shared.config.max_reconnect_attempts;
    let delay = shared.config.reconnect_delay();

    for attempt in 1..=max_attempts {
        if attempt > 1 && !wait_delay(control, Instant::now() + delay) {
            return Outcome::Stopped;
        }
        if !shared.is_current(generation) {
            return Outcome::Stopped;
        }

        LinkMetrics::incr(&shared.metrics.reconnect_attempts);
        info!("Reconnect attempt {}/{}", attempt, max_attempts);

        match shared.establish() {
            Ok(channel) => {
                let reason = format!("reconnected after {} attempt(s)", attempt);
                if !shared.install(generation, channel.clone(), ConnectionState::Reconnecting, &reason)
                {
                    channel.close();
                    return Outcome::Stopped;
                }
                LinkMetrics::incr(&shared.metrics.reconnects);
                // 丢弃旧连接遗留的断线通知
                for signal in control.try_iter() {
                    if signal == Signal::Shutdown {
                        return Outcome::Stopped;
                    }
                }
                return Outcome::Reconnected;
            },
            Err(DriverError::Blocked(message)) => {
                shared.park(
                    generation,
                    ConnectionState::Reconnecting,
                    ConnectionState::Blocked,
                    &message,
                );
                return Outcome::Stopped;
            },
            Err(e) if !e.is_retryable() => {
                warn!("Reconnect attempt {} failed permanently: {}", attempt, e);
                shared.park(
                    generation,
                    ConnectionState::Reconnecting,
                    ConnectionState::Failed,
                    &e.to_string(),
                );
                return Outcome::Stopped;
            },
            Err(e) => warn!("Reconnect attempt {}/{} failed: {}", attempt, max_attempts, e),
        }
    }

    let reason = format!("gave up after {} reconnect attempt(s)", max_attempts);
    shared.park(
        generation,
        ConnectionState::Reconnecting,
        ConnectionState::Failed,
        &reason,
    );
    Outcome::Stopped
}

/// 等待到 `deadline`；收到 `Shutdown` 时返回 false
fn wait_delay(control: &Receiver<Signal>, deadline: Instant) -> bool {
    loop {
        match control.recv_deadline(deadline) {
            Ok(Signal::LinkLost) => continue,
            Ok(Signal::Shutdown) => return false,
            Err(RecvTimeoutError::Timeout) => return true,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}
