//! 脚本化的内存传输（测试用）
//!
//! - [`MockTransport`]: 可预置回复、可设置自动应答器、可模拟对端断开
//! - [`MockHandle`]: 测试侧句柄，在传输被移动到其他线程后仍可检查/注入
//! - [`ScriptedDialer`]: 按脚本返回连接成功或失败，并记录拨号次数

use crate::{Dialer, Interrupter, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use stagelink_protocol::{Request, ServerMessage, decode_request, encode_message};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 自动应答器：根据请求生成零或多条服务器消息
pub type Responder = Box<dyn Fn(&Request) -> Vec<ServerMessage> + Send>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
    remote_closed: bool,
    local_closed: bool,
    fail_sends: bool,
}

struct Shared {
    state: Mutex<MockState>,
    readable: Condvar,
}

/// 内存传输
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// 创建传输和对应的测试句柄
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            readable: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MockHandle { shared },
        )
    }

    /// 创建带自动应答器的传输
    pub fn with_responder(
        responder: impl Fn(&Request) -> Vec<ServerMessage> + Send + 'static,
    ) -> (Self, MockHandle) {
        let (transport, handle) = Self::new();
        handle.set_responder(responder);
        (transport, handle)
    }
}

impl MockHandle {
    /// 注入一行原始数据（不含 `\n`）
    pub fn push_line(&self, line: impl Into<Vec<u8>>) {
        self.shared.state.lock().inbound.push_back(line.into());
        self.shared.readable.notify_all();
    }

    /// 注入一条服务器消息
    pub fn push_message(&self, message: &ServerMessage) {
        let mut bytes = encode_message(message).unwrap_or_default();
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        self.push_line(bytes);
    }

    /// 设置自动应答器（替换已有应答器）
    pub fn set_responder(&self, responder: impl Fn(&Request) -> Vec<ServerMessage> + Send + 'static) {
        self.shared.state.lock().responder = Some(Box::new(responder));
    }

    /// 移除自动应答器（服务器保持沉默）
    pub fn clear_responder(&self) {
        self.shared.state.lock().responder = None;
    }

    /// 模拟对端关闭连接
    pub fn close_remote(&self) {
        self.shared.state.lock().remote_closed = true;
        self.shared.readable.notify_all();
    }

    /// 后续发送全部失败（模拟断线）
    pub fn fail_sends(&self, fail: bool) {
        self.shared.state.lock().fail_sends = fail;
    }

    /// 已发送的请求（按顺序）
    pub fn sent_requests(&self) -> Vec<Request> {
        self.shared
            .state
            .lock()
            .sent
            .iter()
            .filter_map(|line| decode_request(line).ok())
            .collect()
    }

    /// 已发送的请求数量
    pub fn sent_count(&self) -> usize {
        self.shared.state.lock().sent.len()
    }

    /// 本端是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().local_closed
    }
}

impl Transport for MockTransport {
    fn send_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.local_closed {
            return Err(TransportError::NotConnected);
        }
        if state.remote_closed || state.fail_sends {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock peer gone",
            )));
        }
        state.sent.push(line.to_vec());

        let replies = match (&state.responder, decode_request(line)) {
            (Some(responder), Ok(request)) => responder(&request),
            _ => Vec::new(),
        };
        for reply in replies {
            if let Ok(mut bytes) = encode_message(&reply) {
                bytes.pop();
                state.inbound.push_back(bytes);
            }
        }
        drop(state);
        self.shared.readable.notify_all();
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.local_closed {
                return Err(TransportError::NotConnected);
            }
            if let Some(line) = state.inbound.pop_front() {
                return Ok(line);
            }
            if state.remote_closed {
                return Err(TransportError::Closed);
            }
            if self
                .shared
                .readable
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.inbound.is_empty()
                && !state.remote_closed
            {
                return Err(TransportError::ReadTimeout(timeout));
            }
        }
    }

    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        let mut state = self.shared.state.lock();
        let discarded = state.inbound.drain(..).map(|l| l.len() + 1).sum();
        Ok(discarded)
    }

    fn close(&mut self) {
        self.shared.state.lock().local_closed = true;
        self.shared.readable.notify_all();
    }

    fn is_open(&self) -> bool {
        !self.shared.state.lock().local_closed
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let shared = self.shared.clone();
        Some(Box::new(move || {
            shared.state.lock().local_closed = true;
            shared.readable.notify_all();
        }))
    }

    fn peer(&self) -> String {
        String::from("mock")
    }
}

/// 单次拨号的脚本结果
pub enum DialScript {
    /// 连接成功，返回该传输
    Connect(MockTransport),
    /// 连接被拒绝
    Refuse,
    /// 连接超时（立即返回，不真正等待）
    Timeout,
}

/// 脚本化拨号器
///
/// 脚本耗尽后所有拨号都返回 `ConnectionRefused`。
#[derive(Default)]
pub struct ScriptedDialer {
    script: Mutex<VecDeque<DialScript>>,
    attempts: AtomicUsize,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条脚本
    pub fn push(&self, step: DialScript) {
        self.script.lock().push_back(step);
    }

    /// 已发生的拨号次数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Dialer for ScriptedDialer {
    fn dial(
        &self,
        addr: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(DialScript::Connect(transport)) => Ok(Box::new(transport)),
            Some(DialScript::Timeout) => Err(TransportError::ConnectTimeout(connect_timeout)),
            Some(DialScript::Refuse) | None => {
                Err(TransportError::ConnectionRefused(addr.to_string()))
            },
        }
    }
}
