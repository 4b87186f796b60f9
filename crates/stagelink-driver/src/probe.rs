//! 连接诊断
//!
//! 独立于 [`ConnectionManager`](crate::ConnectionManager) 的一次性探测：
//! 打开一条临时连接，发送状态查询，并把结果分为三类。服务器只接受一个客户端，
//! 所以 "端口能连上但没有回复" 几乎总是意味着另一个客户端占用着服务器。
//!
//! 探测永远不返回错误，所有失败都折算进 [`ProbeResult`]。

use crate::channel::CommandChannel;
use crate::config::format_address;
use crate::error::DriverError;
use crate::metrics::LinkMetrics;
use crate::state::HealthStatus;
use stagelink_protocol::{GetStatus, ServerStatus};
use stagelink_transport::{Dialer, TcpDialer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// 探测结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 服务器按时回复
    Responding,
    /// 端口可连接，但服务器没有回复（或报告槽位被占用）
    CanConnectButUnresponsive,
    /// 无法建立连接
    Unreachable,
}

impl ProbeOutcome {
    /// 面向用户的处理建议
    pub fn guidance(&self) -> &'static str {
        match self {
            ProbeOutcome::Responding => "Server is responding. You can connect.",
            ProbeOutcome::CanConnectButUnresponsive => {
                "The port accepts connections but the server does not answer. \
                 Another client is most likely connected; close it and try again."
            },
            ProbeOutcome::Unreachable => {
                "Nothing is listening at this address. Check that the server is \
                 running and that host and port are correct."
            },
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProbeOutcome::Responding => "responding",
            ProbeOutcome::CanConnectButUnresponsive => "can connect but unresponsive",
            ProbeOutcome::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

impl From<ProbeOutcome> for HealthStatus {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Responding => HealthStatus::Healthy,
            ProbeOutcome::CanConnectButUnresponsive => HealthStatus::Unresponsive,
            ProbeOutcome::Unreachable => HealthStatus::NotConnected,
        }
    }
}

/// 探测结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    /// 人类可读的细节（底层错误或服务器状态）
    pub detail: String,
    pub elapsed: Duration,
    /// 服务器回复的状态（仅 `Responding` 且回复合法时存在）
    pub status: Option<ServerStatus>,
}

impl ProbeResult {
    pub fn is_responding(&self) -> bool {
        self.outcome == ProbeOutcome::Responding
    }
}

/// 一次状态查询的分类（探测和健康检查共用）
#[derive(Debug)]
pub(crate) enum StatusCheck {
    /// 合法回复（包括服务器返回 error：服务器仍在响应）
    Healthy(Option<ServerStatus>),
    /// 服务器报告槽位被占用
    Occupied(String),
    /// 连接仍在但回复缺失或不合法
    Unresponsive(DriverError),
    /// 连接已断开
    Lost(DriverError),
}

pub(crate) fn classify_status_reply(reply: Result<ServerStatus, DriverError>) -> StatusCheck {
    match reply {
        Ok(status) => StatusCheck::Healthy(Some(status)),
        Err(DriverError::Server { .. }) => StatusCheck::Healthy(None),
        Err(DriverError::Blocked(message)) => StatusCheck::Occupied(message),
        Err(e) if e.is_disconnect() => StatusCheck::Lost(e),
        Err(e) => StatusCheck::Unresponsive(e),
    }
}

/// 通过 TCP 探测 `host:port`
///
/// `timeout` 同时限制建立连接和等待回复。
pub fn probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    probe_with(&TcpDialer, &format_address(host, port), timeout)
}

/// 使用指定拨号器探测
pub fn probe_with(dialer: &dyn Dialer, addr: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();

    let transport = match dialer.dial(addr, timeout) {
        Ok(transport) => transport,
        Err(e) => {
            debug!("Probe of {} could not connect: {}", addr, e);
            return ProbeResult {
                outcome: ProbeOutcome::Unreachable,
                detail: e.to_string(),
                elapsed: start.elapsed(),
                status: None,
            };
        },
    };

    let channel = CommandChannel::new(transport, timeout, Arc::new(LinkMetrics::new()));
    let reply = channel.send_timeout(&GetStatus, timeout);
    channel.close();

    let (outcome, detail, status) = match classify_status_reply(reply) {
        StatusCheck::Healthy(Some(status)) => (
            ProbeOutcome::Responding,
            format!("state={} busy={}", status.state, status.busy),
            Some(status),
        ),
        StatusCheck::Healthy(None) => (
            ProbeOutcome::Responding,
            String::from("server answered with an error"),
            None,
        ),
        StatusCheck::Occupied(message) => (
            ProbeOutcome::CanConnectButUnresponsive,
            format!("server slot occupied: {}", message),
            None,
        ),
        StatusCheck::Unresponsive(e) | StatusCheck::Lost(e) => (
            ProbeOutcome::CanConnectButUnresponsive,
            format!("no valid reply ({}); another client is likely connected", e),
            None,
        ),
    };
    debug!("Probe of {}: {} ({})", addr, outcome, detail);

    ProbeResult {
        outcome,
        detail,
        elapsed: start.elapsed(),
        status,
    }
}
