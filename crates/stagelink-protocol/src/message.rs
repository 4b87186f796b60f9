//! 请求与服务器消息的编解码
//!
//! 每条消息占一行；编码结果自带结尾的 `\n`，解码时会忽略行尾的 `\r\n`。

use crate::ProtocolError;
use crate::types::Progress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 单行消息的最大长度（字节），超过此长度视为协议错误
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// 客户端请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// 命令名称（服务器词汇表中的名字）
    pub command: String,
    /// 命令参数
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl Request {
    /// 创建无参数请求
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Map::new(),
        }
    }

    /// 追加一个参数（链式调用）
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// 服务器发往客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 终止消息：命令成功
    Result {
        #[serde(default)]
        data: Value,
    },
    /// 中间消息：长任务进度
    Progress {
        current: u32,
        total: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 终止消息：命令失败
    Error { message: String },
    /// 服务器的唯一连接槽已被其他客户端占用
    Occupied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerMessage {
    /// 消息类型名（用于日志和错误信息）
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Result { .. } => "result",
            ServerMessage::Progress { .. } => "progress",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Occupied { .. } => "occupied",
        }
    }

    /// 是否为终止消息（结束一次请求）
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerMessage::Progress { .. })
    }

    /// 转换为进度事件（仅 `Progress` 消息）
    pub fn as_progress(&self) -> Option<Progress> {
        match self {
            ServerMessage::Progress {
                current,
                total,
                message,
            } => Some(Progress {
                current: *current,
                total: *total,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// 编码请求（JSON + `\n`）
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    if request.command.is_empty() {
        return Err(ProtocolError::Encode("empty command name".to_string()));
    }
    let mut buf = serde_json::to_vec(request).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// 编码服务器消息（JSON + `\n`），供模拟服务器和测试使用
pub fn encode_message(message: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// 解码一行服务器消息
pub fn decode_message(line: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let line = trim_line_ending(line);
    if line.is_empty() {
        return Err(ProtocolError::Malformed("empty line".to_string()));
    }
    if line.len() > MAX_LINE_LEN {
        return Err(ProtocolError::Malformed(format!(
            "line too long ({} bytes)",
            line.len()
        )));
    }
    serde_json::from_slice(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// 解码一行客户端请求（模拟服务器使用）
pub fn decode_request(line: &[u8]) -> Result<Request, ProtocolError> {
    let line = trim_line_ending(line);
    if line.is_empty() {
        return Err(ProtocolError::Malformed("empty line".to_string()));
    }
    serde_json::from_slice(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn trim_line_ending(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_without_args() {
        let bytes = encode_request(&Request::new("get_position")).unwrap();
        assert_eq!(bytes, b"{\"command\":\"get_position\"}\n");
    }

    #[test]
    fn test_encode_request_with_args() {
        let req = Request::new("move_relative").arg("dx_um", 1.5).arg("dy_um", -2.0);
        let bytes = encode_request(&req).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["args"]["dx_um"], json!(1.5));
        assert_eq!(value["args"]["dy_um"], json!(-2.0));
        assert_eq!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn test_encode_empty_command_rejected() {
        let err = encode_request(&Request::new("")).unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(_)));
    }

    #[test]
    fn test_decode_each_message_type() {
        let msg = decode_message(br#"{"type":"result","data":{"x":1}}"#).unwrap();
        assert_eq!(msg.kind(), "result");
        assert!(msg.is_terminal());

        let msg = decode_message(b"{\"type\":\"progress\",\"current\":2,\"total\":5}\r\n").unwrap();
        assert!(!msg.is_terminal());
        let p = msg.as_progress().unwrap();
        assert_eq!((p.current, p.total), (2, 5));

        let msg = decode_message(br#"{"type":"error","message":"limit switch"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: "limit switch".into()
            }
        );

        let msg = decode_message(br#"{"type":"occupied"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Occupied { message: None });
    }

    #[test]
    fn test_decode_result_without_data() {
        let msg = decode_message(br#"{"type":"result"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Result { data: Value::Null });
    }

    #[test]
    fn test_decode_malformed() {
        for line in [
            &b""[..],
            b"\n",
            b"not json",
            b"[1,2,3]",
            br#"{"type":"teleport"}"#,
            br#"{"type":"progress","current":1}"#,
        ] {
            let err = decode_message(line).unwrap_err();
            assert!(matches!(err, ProtocolError::Malformed(_)), "line {:?}", line);
        }
    }

    #[test]
    fn test_encode_message_decodes_back() {
        let msg = ServerMessage::Progress {
            current: 1,
            total: 3,
            message: Some("config A".into()),
        };
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_request() {
        let req = decode_request(b"{\"command\":\"get_status\"}\n").unwrap();
        assert_eq!(req, Request::new("get_status"));
        assert!(decode_request(b"   ").is_err());
    }
}
