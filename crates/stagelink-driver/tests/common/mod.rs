//! 测试辅助：模拟仪器（内存传输）和真实 TCP 模拟服务器

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use stagelink_driver::{ConnectionConfig, ConnectionState, StateChange};
use stagelink_protocol::{Request, ServerMessage, decode_request, encode_message};
use stagelink_transport::mock::{MockHandle, MockTransport};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// 模拟仪器的标准回复
pub fn instrument_reply(request: &Request) -> Vec<ServerMessage> {
    let data = match request.command.as_str() {
        "get_position" => json!({"x_um": 10.0, "y_um": 20.0}),
        "get_status" => json!({"state": "idle", "busy": false, "firmware": "v2.1.0"}),
        "move_relative" | "move_absolute" | "stop" => return Vec::new(),
        _ => serde_json::Value::Null,
    };
    vec![ServerMessage::Result { data }]
}

/// 按标准回复应答的内存传输
pub fn instrument() -> (MockTransport, MockHandle) {
    MockTransport::with_responder(instrument_reply)
}

/// 回复 `occupied` 的内存传输
pub fn occupied_instrument() -> MockTransport {
    MockTransport::with_responder(|_| {
        vec![ServerMessage::Occupied {
            message: Some("another client".into()),
        }]
    })
    .0
}

/// 适合测试的快速配置
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", 5005)
        .with_connect_timeout_ms(200)
        .with_read_timeout_ms(200)
        .with_reconnect(3, 10)
        .with_health_check(20, 50, 1)
}

/// 收集状态转换，直到 `done` 返回 true 或超时
pub fn collect_until(
    rx: &crossbeam_channel::Receiver<StateChange>,
    timeout: Duration,
    done: impl Fn(&StateChange) -> bool,
) -> Vec<(ConnectionState, ConnectionState)> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Ok(change) = rx.recv_deadline(deadline) {
        seen.push((change.from, change.to));
        if done(&change) {
            break;
        }
    }
    seen
}

/// 轮询直到条件成立，超时返回 false
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// 模拟服务器的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// 正常回复
    Respond,
    /// 接受连接但从不回复（模拟被其他客户端占用）
    Silent,
    /// 回复 `occupied`
    Occupied,
}

/// 真实 TCP 上的模拟仪器服务器
pub struct MockServer {
    port: u16,
    behavior: Arc<Mutex<Behavior>>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    accepted: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl MockServer {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let server = Self {
            port,
            behavior: Arc::new(Mutex::new(behavior)),
            streams: Arc::new(Mutex::new(Vec::new())),
            accepted: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(true)),
        };

        let behavior = server.behavior.clone();
        let streams = server.streams.clone();
        let accepted = server.accepted.clone();
        let running = server.running.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        accepted.fetch_add(1, Ordering::SeqCst);
                        streams.lock().push(stream.try_clone().unwrap());
                        let behavior = behavior.clone();
                        thread::spawn(move || serve(stream, behavior));
                    },
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });
        server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> ConnectionConfig {
        let mut config = fast_config().with_health_check(50, 500, 1);
        config.port = self.port;
        config
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// 已接受的连接数
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// 断开所有已接受的连接
    pub fn drop_connections(&self) {
        for stream in self.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.drop_connections();
    }
}

fn serve(stream: TcpStream, behavior: Arc<Mutex<Behavior>>) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { return };
        let Ok(request) = decode_request(line.as_bytes()) else {
            continue;
        };
        let replies = match *behavior.lock() {
            Behavior::Respond => instrument_reply(&request),
            Behavior::Silent => Vec::new(),
            Behavior::Occupied => vec![ServerMessage::Occupied { message: None }],
        };
        for reply in replies {
            let bytes = encode_message(&reply).unwrap();
            if writer.write_all(&bytes).is_err() {
                return;
            }
        }
    }
}

/// 一个当前没有服务监听的本地端口
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
