//! One-shot 模式
//!
//! 每个命令独立执行：
//! 1. 读取配置
//! 2. 连接服务器
//! 3. 执行操作
//! 4. 断开连接

use anyhow::{Context, Result};
use stagelink_client::{ProbeOutcome, Stage, probe};
use stagelink_protocol::Progress;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{build_stage, describe_health, describe_state, print_probe};
use crate::commands::{CliConfig, MoveCommand, SweepCommand, WatchCommand};

/// One-shot 模式
pub struct OneShotMode {
    config: CliConfig,
    target_loaded: bool,
}

impl OneShotMode {
    pub fn new(config: CliConfig, target_loaded: bool) -> Self {
        Self {
            config,
            target_loaded,
        }
    }

    fn connect(&self) -> Result<Stage> {
        let stage = build_stage(&self.config, self.target_loaded);
        println!("⏳ 连接到 {}...", self.config.connection.address());
        stage
            .connect()
            .with_context(|| format!("无法连接到 {}", self.config.connection.address()))?;
        println!("✅ 已连接");
        Ok(stage)
    }

    /// 探测服务器（不需要已加载的目标配置）
    pub fn probe(&self) -> Result<()> {
        let c = &self.config.connection;
        let result = probe(&c.host, c.port, c.connect_timeout());
        print_probe(&result);
        if result.outcome != ProbeOutcome::Responding {
            anyhow::bail!("server at {} is {}", c.address(), result.outcome);
        }
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        let stage = self.connect()?;
        let status = stage.status()?;
        println!("📊 状态: {}", status.state);
        println!("   运动中: {}", if status.busy { "是" } else { "否" });
        if let Some(firmware) = &status.firmware {
            println!("   固件: {}", firmware);
        }
        Ok(())
    }

    pub fn position(&self) -> Result<()> {
        let stage = self.connect()?;
        let p = stage.position()?;
        println!("📍 位置: x = {:.3} um, y = {:.3} um, z = {:.3} um", p.x_um, p.y_um, p.z_um);
        Ok(())
    }

    pub fn move_relative(&self, args: MoveCommand) -> Result<()> {
        args.validate()?;
        let stage = self.connect()?;
        stage.move_relative(args.dx, args.dy)?;
        println!("✅ 已发送相对移动 ({}, {}) um", args.dx, args.dy);
        Ok(())
    }

    pub fn home(&self) -> Result<()> {
        let stage = self.connect()?;
        println!("⏳ 回零中...");
        stage.home()?;
        println!("✅ 回零完成");
        Ok(())
    }

    pub fn sweep(&self, args: SweepCommand) -> Result<()> {
        let stage = self.connect()?;
        let summary = stage.run_sweep(args.count, &print_progress)?;
        println!(
            "✅ 扫描完成: {} 成功, {} 失败",
            summary.completed, summary.failed
        );
        Ok(())
    }

    /// 连接后持续打印状态转换和健康状态，直到超时或 Ctrl+C
    pub fn watch(&self, args: WatchCommand) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
            .context("无法安装 Ctrl+C 处理器")?;

        let stage = build_stage(&self.config, self.target_loaded);
        let changes = stage.subscribe();
        if let Err(e) = stage.connect() {
            eprintln!("❌ {}", e);
        }

        let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
        let mut last_report = Instant::now();
        println!("👀 {} (Ctrl+C 退出)", describe_state(stage.state()));

        while running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            if let Ok(change) = changes.recv_timeout(Duration::from_millis(200)) {
                println!(
                    "🔄 {} -> {} ({})",
                    change.from, change.to, change.reason
                );
            }
            if last_report.elapsed() >= Duration::from_secs(1) {
                last_report = Instant::now();
                let metrics = stage.metrics();
                debug!("metrics: {:?}", metrics);
                println!(
                    "   {} | health: {} | reconnects: {}",
                    describe_state(stage.state()),
                    describe_health(stage.health()),
                    metrics.reconnects
                );
            }
        }

        stage.disconnect();
        println!("👋 已断开");
        Ok(())
    }
}

pub fn print_progress(progress: &Progress) {
    match &progress.message {
        Some(message) => println!(
            "   [{}/{}] {:>5.1}% {}",
            progress.current,
            progress.total,
            progress.fraction() * 100.0,
            message
        ),
        None => println!(
            "   [{}/{}] {:>5.1}%",
            progress.current,
            progress.total,
            progress.fraction() * 100.0
        ),
    }
}
