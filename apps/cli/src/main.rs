//! # stagelink CLI
//!
//! Command-line interface for stagelink instrument servers.
//!
//! ## 双模式架构
//!
//! ### One-shot 模式（推荐用于 CI/脚本）
//!
//! ```bash
//! # 保存目标服务器
//! stagelink-cli config set --server-host 192.168.1.20 --server-port 5005
//!
//! # 执行操作（内部：连接 -> 执行 -> 断开）
//! stagelink-cli move --dx 10 --dy -5
//! stagelink-cli probe
//! ```
//!
//! ### REPL 模式（推荐用于调试）
//!
//! ```bash
//! $ stagelink-cli shell
//! stage> connect
//! stage> move 10 0
//! stage> state
//! stage> exit
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod modes;

use commands::{CliConfig, ConfigCommand, MoveCommand, SweepCommand, WatchCommand};
use modes::oneshot::OneShotMode;
use modes::repl::run_repl;

/// stagelink CLI - 位移台命令行工具
#[derive(Parser, Debug)]
#[command(name = "stagelink-cli")]
#[command(about = "Command-line interface for stagelink instrument servers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Commands,
}

/// 目标服务器参数（覆盖配置文件）
#[derive(Args, Debug)]
struct TargetArgs {
    /// 服务器主机名或 IP
    #[arg(long, global = true)]
    host: Option<String>,

    /// 服务器端口
    #[arg(long, global = true)]
    port: Option<u16>,

    /// 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 诊断服务器是否可用
    Probe,

    /// 查询服务器状态
    Status,

    /// 查询当前位置
    Position,

    /// 相对移动
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 回零
    Home,

    /// 多配置扫描
    Sweep {
        #[command(flatten)]
        args: SweepCommand,
    },

    /// 监控连接状态
    Watch {
        #[command(flatten)]
        args: WatchCommand,
    },

    /// 启动交互式 Shell（REPL 模式）
    Shell,
}

fn main() -> Result<()> {
    // 初始化日志（RUST_LOG 优先）
    stagelink_client::init_logging("stagelink_cli=info");

    let cli = Cli::parse();

    let config_path = match cli.target.config {
        Some(path) => path,
        None => commands::default_config_file()?,
    };

    if let Commands::Config(cmd) = cli.command {
        return cmd.execute(&config_path);
    }

    let (mut config, file_exists) = CliConfig::load(&config_path)?;
    let host_given = cli.target.host.is_some();
    if let Some(host) = cli.target.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.target.port {
        config.connection.port = port;
    }
    let target_loaded = file_exists || host_given;

    let mode = OneShotMode::new(config.clone(), target_loaded);
    match cli.command {
        Commands::Config(_) => Ok(()),
        Commands::Probe => mode.probe(),
        Commands::Status => mode.status(),
        Commands::Position => mode.position(),
        Commands::Move { args } => mode.move_relative(args),
        Commands::Home => mode.home(),
        Commands::Sweep { args } => mode.sweep(args),
        Commands::Watch { args } => mode.watch(args),
        Commands::Shell => run_repl(config, target_loaded),
    }
}
