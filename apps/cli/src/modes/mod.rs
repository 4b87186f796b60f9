//! 运行模式：One-shot（每个命令独立连接）和 REPL（保持连接）

pub mod oneshot;
pub mod repl;

use crate::commands::CliConfig;
use stagelink_client::{ConnectionState, HealthStatus, ProbeResult, Stage, TargetFlag};
use std::sync::Arc;

/// 由配置构造 Stage
///
/// "目标已加载" 闸门：配置文件存在，或命令行给出了 `--host`。
pub fn build_stage(config: &CliConfig, target_loaded: bool) -> Stage {
    Stage::new(
        config.connection.clone(),
        Arc::new(TargetFlag::new(target_loaded)),
    )
}

pub fn describe_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "⚪ 未连接",
        ConnectionState::Connecting => "⏳ 连接中",
        ConnectionState::Connected => "🟢 已连接",
        ConnectionState::Reconnecting => "🟡 重连中",
        ConnectionState::Blocked => "⛔ 服务器被其他客户端占用",
        ConnectionState::Failed => "🔴 连接失败",
    }
}

pub fn describe_health(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unresponsive => "unresponsive",
        HealthStatus::NotConnected => "not connected",
    }
}

pub fn print_probe(result: &ProbeResult) {
    println!("🔍 {} ({:?})", result.outcome, result.elapsed);
    println!("   {}", result.detail);
    println!("💡 {}", result.outcome.guidance());
}
