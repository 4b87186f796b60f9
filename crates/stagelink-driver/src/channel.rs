//! 命令通道
//!
//! 在一条已建立的传输上执行 "请求 -> 回复" 交换。同一时刻只允许一个交换在进行，
//! 其他调用者在通道锁上排队，因此回复永远不会被分配给错误的请求。
//!
//! 读超时后可能还有迟到的回复留在 socket 中，通道会被标记为 `stale`，
//! 下一次发送前先丢弃所有待读数据。

use crate::error::DriverError;
use crate::metrics::LinkMetrics;
use parking_lot::Mutex;
use serde_json::Value;
use stagelink_protocol::{
    Command, Progress, ProtocolError, ReplyKind, Request, ServerMessage, decode_message,
    encode_request,
};
use stagelink_transport::{Interrupter, Transport, TransportError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 单个命令允许的最大进度消息数（防止异常服务器无限刷进度）
pub const MAX_PROGRESS_MESSAGES: usize = 100_000;

/// 服务器未给出说明时使用的占用提示
const OCCUPIED_FALLBACK: &str = "slot occupied";

/// 进度回调
pub type ProgressSink<'a> = &'a dyn Fn(&Progress);

struct ChannelInner {
    transport: Box<dyn Transport>,
    /// 上一次交换没有读完回复
    stale: bool,
}

/// 命令通道
pub struct CommandChannel {
    inner: Mutex<ChannelInner>,
    read_timeout: Duration,
    metrics: Arc<LinkMetrics>,
    /// 底层连接仍然可用
    alive: AtomicBool,
    /// 由本端 `close()` 关闭
    closed: AtomicBool,
    interrupter: Option<Interrupter>,
    peer: String,
}

impl CommandChannel {
    pub fn new(
        transport: Box<dyn Transport>,
        read_timeout: Duration,
        metrics: Arc<LinkMetrics>,
    ) -> Self {
        let interrupter = transport.interrupter();
        let peer = transport.peer();
        Self {
            inner: Mutex::new(ChannelInner {
                transport,
                stale: false,
            }),
            read_timeout,
            metrics,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            interrupter,
            peer,
        }
    }

    /// 对端地址
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 默认读超时
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 连接是否仍可用（发生 IO 错误或被关闭后返回 false）
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 执行强类型命令
    pub fn send<C: Command>(&self, command: &C) -> Result<C::Output, DriverError> {
        self.execute(command, None, self.read_timeout)
    }

    /// 执行命令并把进度消息交给 `sink`
    pub fn send_with_progress<C: Command>(
        &self,
        command: &C,
        sink: ProgressSink<'_>,
    ) -> Result<C::Output, DriverError> {
        self.execute(command, Some(sink), self.read_timeout)
    }

    /// 使用自定义读超时执行命令（健康检查、探测）
    pub fn send_timeout<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Output, DriverError> {
        self.execute(command, None, timeout)
    }

    fn execute<C: Command>(
        &self,
        command: &C,
        sink: Option<ProgressSink<'_>>,
        timeout: Duration,
    ) -> Result<C::Output, DriverError> {
        let request = command.request();
        let data = self.send_raw(&request, command.reply(), sink, timeout)?;
        command.decode(data).map_err(|e| {
            LinkMetrics::incr(&self.metrics.protocol_errors);
            warn!("Reply to '{}' has invalid payload: {}", request.command, e);
            DriverError::Protocol(e)
        })
    }

    /// 执行一次原始交换，返回 `result` 负载
    ///
    /// `ReplyKind::None` 的命令写出后立即返回 `Value::Null`。
    pub fn send_raw(
        &self,
        request: &Request,
        reply: ReplyKind,
        sink: Option<ProgressSink<'_>>,
        timeout: Duration,
    ) -> Result<Value, DriverError> {
        let line = encode_request(request)?;

        let mut inner = self.inner.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Interrupted);
        }
        if !self.is_alive() || !inner.transport.is_open() {
            return Err(DriverError::NotConnected);
        }

        if inner.stale {
            match inner.transport.discard_pending() {
                Ok(0) => {},
                Ok(n) => debug!("Discarded {} stale bytes from {}", n, self.peer),
                Err(e) => return Err(self.fail(&mut inner, e)),
            }
            inner.stale = false;
        }

        if let Err(e) = inner.transport.send_line(&line) {
            return Err(self.fail(&mut inner, e));
        }
        LinkMetrics::incr(&self.metrics.requests_sent);
        trace!("-> {} {}", self.peer, request.command);

        if reply == ReplyKind::None {
            return Ok(Value::Null);
        }

        let mut progress_seen = 0usize;
        loop {
            let raw = match inner.transport.receive_line(timeout) {
                Ok(raw) => raw,
                Err(TransportError::ReadTimeout(waited)) => {
                    inner.stale = true;
                    LinkMetrics::incr(&self.metrics.read_timeouts);
                    debug!("'{}' timed out after {:?}", request.command, waited);
                    return Err(DriverError::ReadTimeout(waited));
                },
                Err(e) => return Err(self.fail(&mut inner, e)),
            };

            let message = match decode_message(&raw) {
                Ok(message) => message,
                Err(e) => {
                    inner.stale = true;
                    LinkMetrics::incr(&self.metrics.protocol_errors);
                    warn!("Malformed reply to '{}': {}", request.command, e);
                    return Err(DriverError::Protocol(e));
                },
            };

            match message {
                ServerMessage::Result { data } => {
                    LinkMetrics::incr(&self.metrics.responses_received);
                    return Ok(data);
                },
                ServerMessage::Progress {
                    current,
                    total,
                    message,
                } if reply == ReplyKind::Progressive => {
                    LinkMetrics::incr(&self.metrics.progress_messages);
                    progress_seen += 1;
                    if progress_seen > MAX_PROGRESS_MESSAGES {
                        inner.stale = true;
                        LinkMetrics::incr(&self.metrics.protocol_errors);
                        return Err(DriverError::Protocol(ProtocolError::Malformed(format!(
                            "more than {} progress messages",
                            MAX_PROGRESS_MESSAGES
                        ))));
                    }
                    if let Some(sink) = sink {
                        sink(&Progress {
                            current,
                            total,
                            message,
                        });
                    }
                },
                ServerMessage::Progress { .. } => {
                    inner.stale = true;
                    LinkMetrics::incr(&self.metrics.protocol_errors);
                    return Err(DriverError::Protocol(ProtocolError::UnexpectedMessage {
                        expected: "result",
                        actual: "progress".to_string(),
                    }));
                },
                ServerMessage::Error { message } => {
                    LinkMetrics::incr(&self.metrics.responses_received);
                    LinkMetrics::incr(&self.metrics.server_errors);
                    return Err(DriverError::Server { message });
                },
                ServerMessage::Occupied { message } => {
                    LinkMetrics::incr(&self.metrics.responses_received);
                    return Err(DriverError::Blocked(
                        message.unwrap_or_else(|| OCCUPIED_FALLBACK.to_string()),
                    ));
                },
            }
        }
    }

    /// 关闭通道，打断正在进行的读等待
    ///
    /// 幂等。被打断的交换返回 `DriverError::Interrupted`。
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.alive.store(false, Ordering::Release);
        if let Some(interrupt) = &self.interrupter {
            interrupt();
        }
        self.inner.lock().transport.close();
        debug!("Command channel to {} closed", self.peer);
    }

    /// 连接级错误：标记通道失效并关闭传输
    fn fail(&self, inner: &mut ChannelInner, error: TransportError) -> DriverError {
        self.alive.store(false, Ordering::Release);
        inner.transport.close();
        if self.closed.load(Ordering::Acquire) {
            return DriverError::Interrupted;
        }
        warn!("Connection to {} lost: {}", self.peer, error);
        match error {
            e if e.is_disconnect() => DriverError::Transport(e),
            other => other.into(),
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.inner.get_mut().transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagelink_protocol::{GetPosition, GetStatus, MoveRelative, RawCommand, RunSweep};
    use stagelink_transport::mock::{MockHandle, MockTransport};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    fn channel(transport: MockTransport) -> (CommandChannel, Arc<LinkMetrics>) {
        let metrics = Arc::new(LinkMetrics::new());
        let channel =
            CommandChannel::new(Box::new(transport), Duration::from_millis(200), metrics.clone());
        (channel, metrics)
    }

    fn position_responder(handle: &MockHandle) {
        handle.set_responder(|_| {
            vec![ServerMessage::Result {
                data: json!({"x_um": 1.5, "y_um": -2.0}),
            }]
        });
    }

    #[test]
    fn test_single_reply() {
        let (transport, handle) = MockTransport::new();
        position_responder(&handle);
        let (channel, metrics) = channel(transport);

        let pos = channel.send(&GetPosition).unwrap();
        assert_eq!(pos.x_um, 1.5);
        assert_eq!(pos.y_um, -2.0);
        assert_eq!(handle.sent_requests()[0].command, "get_position");

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_sent, 1);
        assert_eq!(snap.responses_received, 1);
    }

    #[test]
    fn test_fire_and_forget_does_not_wait() {
        let (transport, handle) = MockTransport::new();
        let (channel, _) = channel(transport);

        let start = Instant::now();
        channel.send(&MoveRelative { dx_um: 10.0, dy_um: 0.0 }).unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(handle.sent_count(), 1);
    }

    #[test]
    fn test_progress_reported_in_order() {
        let (transport, handle) = MockTransport::new();
        handle.set_responder(|_| {
            let mut replies: Vec<_> = (1..=3)
                .map(|i| ServerMessage::Progress {
                    current: i,
                    total: 3,
                    message: None,
                })
                .collect();
            replies.push(ServerMessage::Result {
                data: json!({"completed": 3}),
            });
            replies
        });
        let (channel, metrics) = channel(transport);

        let seen = Mutex::new(Vec::new());
        let summary = channel
            .send_with_progress(&RunSweep { configurations: 3 }, &|p: &Progress| {
                seen.lock().push(p.current)
            })
            .unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(metrics.snapshot().progress_messages, 3);
    }

    #[test]
    fn test_progress_for_single_reply_is_protocol_error() {
        let (transport, handle) = MockTransport::new();
        handle.set_responder(|_| {
            vec![ServerMessage::Progress {
                current: 1,
                total: 2,
                message: None,
            }]
        });
        let (channel, _) = channel(transport);
        assert!(matches!(
            channel.send(&GetStatus),
            Err(DriverError::Protocol(ProtocolError::UnexpectedMessage { .. }))
        ));
        assert!(channel.is_alive());
    }

    #[test]
    fn test_server_error_and_occupied() {
        let (transport, handle) = MockTransport::new();
        handle.set_responder(|req| {
            if req.command == "home" {
                vec![ServerMessage::Error {
                    message: "limit switch".into(),
                }]
            } else {
                vec![ServerMessage::Occupied { message: None }]
            }
        });
        let (channel, metrics) = channel(transport);

        match channel.send(&stagelink_protocol::Home) {
            Err(DriverError::Server { message }) => assert_eq!(message, "limit switch"),
            other => panic!("unexpected: {:?}", other),
        }
        match channel.send(&GetStatus) {
            Err(DriverError::Blocked(message)) => assert_eq!(message, "slot occupied"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(metrics.snapshot().server_errors, 1);
    }

    #[test]
    fn test_malformed_reply_fails_only_that_command() {
        let (transport, handle) = MockTransport::new();
        let (channel, metrics) = channel(transport);

        handle.push_line("{not json");
        assert!(matches!(
            channel.send(&GetPosition),
            Err(DriverError::Protocol(_))
        ));
        assert!(channel.is_alive());

        position_responder(&handle);
        assert!(channel.send(&GetPosition).is_ok());
        assert_eq!(metrics.snapshot().protocol_errors, 1);
    }

    #[test]
    fn test_invalid_payload_is_protocol_error() {
        let (transport, handle) = MockTransport::new();
        handle.set_responder(|_| {
            vec![ServerMessage::Result {
                data: json!({"unexpected": true}),
            }]
        });
        let (channel, _) = channel(transport);
        assert!(matches!(
            channel.send(&GetPosition),
            Err(DriverError::Protocol(ProtocolError::InvalidPayload { .. }))
        ));
    }

    #[test]
    fn test_late_reply_not_attributed_to_next_command() {
        let (transport, handle) = MockTransport::new();
        let (channel, metrics) = channel(transport);

        let err = channel
            .send_timeout(&GetPosition, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, DriverError::ReadTimeout(_)));

        // 第一条命令的回复迟到
        handle.push_message(&ServerMessage::Result {
            data: json!({"x_um": 111.0, "y_um": 111.0}),
        });
        handle.set_responder(|_| {
            vec![ServerMessage::Result {
                data: json!({"x_um": 2.0, "y_um": 2.0}),
            }]
        });

        let pos = channel.send(&GetPosition).unwrap();
        assert_eq!(pos.x_um, 2.0);
        assert_eq!(metrics.snapshot().read_timeouts, 1);
    }

    #[test]
    fn test_concurrent_senders_are_serialized() {
        let (transport, handle) = MockTransport::new();
        handle.set_responder(|req| {
            vec![ServerMessage::Result {
                data: req.args.get("id").cloned().unwrap_or(Value::Null),
            }]
        });
        let (channel, _) = channel(transport);
        let channel = Arc::new(channel);
        let mismatches = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let channel = channel.clone();
                let mismatches = mismatches.clone();
                thread::spawn(move || {
                    for i in 0..50u64 {
                        let id = t * 1000 + i;
                        let cmd = RawCommand::new("echo", ReplyKind::Single).arg("id", id);
                        let reply = channel.send(&cmd).unwrap();
                        if reply != json!(id) {
                            mismatches.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
        assert_eq!(handle.sent_count(), 200);
    }

    #[test]
    fn test_peer_close_marks_channel_dead() {
        let (transport, handle) = MockTransport::new();
        let (channel, _) = channel(transport);
        handle.close_remote();

        let err = channel.send(&GetPosition).unwrap_err();
        assert!(err.is_disconnect(), "{:?}", err);
        assert!(!channel.is_alive());
        assert!(matches!(
            channel.send(&GetPosition),
            Err(DriverError::NotConnected)
        ));
    }

    #[test]
    fn test_close_interrupts_pending_read() {
        let (transport, _handle) = MockTransport::new();
        let metrics = Arc::new(LinkMetrics::new());
        let channel = Arc::new(CommandChannel::new(
            Box::new(transport),
            Duration::from_secs(10),
            metrics,
        ));

        let reader = {
            let channel = channel.clone();
            thread::spawn(move || channel.send(&GetPosition))
        };
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        channel.close();
        let result = reader.join().unwrap();
        assert!(matches!(result, Err(DriverError::Interrupted)));
        assert!(start.elapsed() < Duration::from_secs(1));

        channel.close();
        assert!(matches!(
            channel.send(&GetPosition),
            Err(DriverError::Interrupted)
        ));
    }
}
