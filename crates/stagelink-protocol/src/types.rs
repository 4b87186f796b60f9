//! 命令返回的数据结构

use serde::{Deserialize, Serialize};

/// 载物台当前位置（微米）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x_um: f64,
    pub y_um: f64,
    #[serde(default)]
    pub z_um: f64,
}

/// 服务器状态报告（`get_status` 的结果）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    /// 服务器自报的状态字符串（如 "idle"、"moving"）
    #[serde(default)]
    pub state: String,
    /// 是否正在执行运动或长任务
    #[serde(default)]
    pub busy: bool,
    /// 固件版本（可选，语义化版本字符串）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

impl ServerStatus {
    /// 解析固件版本
    ///
    /// 无版本或版本字符串不合法时返回 `None`。
    pub fn firmware_version(&self) -> Option<semver::Version> {
        self.firmware
            .as_deref()
            .and_then(|v| semver::Version::parse(v.trim_start_matches('v')).ok())
    }
}

/// 多配置扫描的结果摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepSummary {
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// 长任务的进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub message: Option<String>,
}

impl Progress {
    /// 完成比例（0.0 - 1.0），`total` 为 0 时返回 0.0
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}
