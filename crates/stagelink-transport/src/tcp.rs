//! TCP 传输实现
//!
//! 每个 `TcpTransport` 独占一个 `TcpStream`。读取的数据先进入 `BytesMut` 行缓冲，
//! 跨越读超时的半行数据不会丢失。

use crate::{Dialer, Interrupter, Transport, TransportError};
use bytes::{Buf, BytesMut};
use stagelink_protocol::MAX_LINE_LEN;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// 单次 `read` 的块大小
const READ_CHUNK: usize = 4096;

/// 最小超时（`set_read_timeout` / `connect_timeout` 不接受零）
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// TCP 传输（独占一个 socket）
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    rx_buffer: BytesMut,
}

impl TcpTransport {
    /// 在已有 `TcpStream` 上创建传输
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Some(stream),
            peer,
            rx_buffer: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// 连接到 `addr`（`host:port`），依次尝试解析出的每个地址
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", addr, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::InvalidAddress(format!(
                "{}: no addresses resolved",
                addr
            )));
        }

        let timeout = timeout.max(MIN_TIMEOUT);
        let mut last_error = None;
        for socket_addr in addrs {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    debug!("TCP connected to {}", socket_addr);
                    return Self::from_stream(stream);
                },
                Err(e) => {
                    trace!("TCP connect to {} failed: {}", socket_addr, e);
                    last_error = Some(map_connect_error(e, addr, timeout));
                },
            }
        }
        Err(last_error.unwrap_or(TransportError::NotConnected))
    }

    /// 在缓冲区中查找完整的一行
    fn take_buffered_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.rx_buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.rx_buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        Some(line.to_vec())
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

fn map_connect_error(e: std::io::Error, addr: &str, timeout: Duration) -> TransportError {
    match e.kind() {
        ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(addr.to_string()),
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::ConnectTimeout(timeout),
        _ => TransportError::Io(e),
    }
}

impl Transport for TcpTransport {
    fn send_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream.write_all(line)?;
        if line.last() != Some(&b'\n') {
            stream.write_all(b"\n")?;
        }
        stream.flush()?;
        trace!("TX {} bytes", line.len());
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let timeout = timeout.max(MIN_TIMEOUT);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_buffered_line() {
                trace!("RX line ({} bytes)", line.len());
                return Ok(line);
            }
            if self.rx_buffer.len() > MAX_LINE_LEN {
                self.rx_buffer.clear();
                return Err(TransportError::Io(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "line exceeds maximum length",
                )));
            }

            let stream = self.stream()?;
            stream.set_read_timeout(Some(timeout))?;
            match stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.rx_buffer.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::ReadTimeout(timeout));
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        let mut discarded = self.rx_buffer.len();
        self.rx_buffer.clear();

        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let mut chunk = [0u8; READ_CHUNK];
        let result = loop {
            match stream.read(&mut chunk) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(TransportError::Io(e)),
            }
        };
        stream.set_nonblocking(false)?;
        result?;

        if discarded > 0 {
            debug!("Discarded {} stale bytes from {}", discarded, self.peer);
        }
        Ok(discarded)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("TCP connection to {} closed", self.peer);
        }
        self.rx_buffer.advance(self.rx_buffer.len());
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let clone = self.stream.as_ref()?.try_clone().ok()?;
        Some(Box::new(move || {
            let _ = clone.shutdown(Shutdown::Both);
        }))
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// 生产环境拨号器（每次拨号都新建 socket）
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(
        &self,
        addr: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TcpTransport::connect(addr, connect_timeout)?))
    }
}
