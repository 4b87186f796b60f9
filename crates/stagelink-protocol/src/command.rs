//! 强类型命令
//!
//! 每个命令决定三件事：请求内容、服务器会如何回复（[`ReplyKind`]），
//! 以及如何把 `result` 负载解码为返回类型。

use crate::ProtocolError;
use crate::message::Request;
use crate::types::{Position, ServerStatus, SweepSummary};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 服务器对某个命令的回复方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyKind {
    /// 无回复（服务器不确认运动命令，写出即完成）
    None,
    /// 一条终止消息
    #[default]
    Single,
    /// 零或多条 `progress` 消息，随后一条终止消息
    Progressive,
}

/// 强类型命令
pub trait Command {
    /// 命令成功时的返回类型
    type Output;

    /// 构造线上请求
    fn request(&self) -> Request;

    /// 回复方式（默认单条回复）
    fn reply(&self) -> ReplyKind {
        ReplyKind::Single
    }

    /// 解码 `result` 负载（`ReplyKind::None` 时传入 `Value::Null`）
    fn decode(&self, data: Value) -> Result<Self::Output, ProtocolError>;
}

/// 把 `result` 负载解码为任意 `DeserializeOwned` 类型
pub fn decode_payload<T: DeserializeOwned>(command: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// 查询当前位置（也是连接握手命令）
#[derive(Debug, Clone, Copy, Default)]
pub struct GetPosition;

impl Command for GetPosition {
    type Output = Position;

    fn request(&self) -> Request {
        Request::new("get_position")
    }

    fn decode(&self, data: Value) -> Result<Position, ProtocolError> {
        decode_payload("get_position", data)
    }
}

/// 查询服务器状态（无副作用，健康检查使用）
#[derive(Debug, Clone, Copy, Default)]
pub struct GetStatus;

impl Command for GetStatus {
    type Output = ServerStatus;

    fn request(&self) -> Request {
        Request::new("get_status")
    }

    fn decode(&self, data: Value) -> Result<ServerStatus, ProtocolError> {
        decode_payload("get_status", data)
    }
}

/// 相对移动（微米）
///
/// 服务器不回复运动命令。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRelative {
    pub dx_um: f64,
    pub dy_um: f64,
}

impl Command for MoveRelative {
    type Output = ();

    fn request(&self) -> Request {
        Request::new("move_relative")
            .arg("dx_um", self.dx_um)
            .arg("dy_um", self.dy_um)
    }

    fn reply(&self) -> ReplyKind {
        ReplyKind::None
    }

    fn decode(&self, _data: Value) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// 绝对移动（微米）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveAbsolute {
    pub x_um: f64,
    pub y_um: f64,
}

impl Command for MoveAbsolute {
    type Output = ();

    fn request(&self) -> Request {
        Request::new("move_absolute")
            .arg("x_um", self.x_um)
            .arg("y_um", self.y_um)
    }

    fn reply(&self) -> ReplyKind {
        ReplyKind::None
    }

    fn decode(&self, _data: Value) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// 立即停止运动
#[derive(Debug, Clone, Copy, Default)]
pub struct Stop;

impl Command for Stop {
    type Output = ();

    fn request(&self) -> Request {
        Request::new("stop")
    }

    fn reply(&self) -> ReplyKind {
        ReplyKind::None
    }

    fn decode(&self, _data: Value) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// 回零（服务器在完成后回复）
#[derive(Debug, Clone, Copy, Default)]
pub struct Home;

impl Command for Home {
    type Output = ();

    fn request(&self) -> Request {
        Request::new("home")
    }

    fn decode(&self, _data: Value) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// 多配置扫描（长任务，带进度）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSweep {
    pub configurations: u32,
}

impl Command for RunSweep {
    type Output = SweepSummary;

    fn request(&self) -> Request {
        Request::new("run_sweep").arg("configurations", self.configurations)
    }

    fn reply(&self) -> ReplyKind {
        ReplyKind::Progressive
    }

    fn decode(&self, data: Value) -> Result<SweepSummary, ProtocolError> {
        decode_payload("run_sweep", data)
    }
}

/// 未强类型化的命令（返回原始 JSON）
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommand {
    pub name: String,
    pub args: Map<String, Value>,
    pub reply: ReplyKind,
}

impl RawCommand {
    pub fn new(name: impl Into<String>, reply: ReplyKind) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
            reply,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

impl Command for RawCommand {
    type Output = Value;

    fn request(&self) -> Request {
        Request {
            command: self.name.clone(),
            args: self.args.clone(),
        }
    }

    fn reply(&self) -> ReplyKind {
        self.reply
    }

    fn decode(&self, data: Value) -> Result<Value, ProtocolError> {
        Ok(data)
    }
}
