//! REPL 模式（交互式 Shell）
//!
//! 专用输入线程 + crossbeam 通道：rustyline 在输入线程中保留历史记录，
//! 主线程执行命令（命令可能阻塞到 IO 超时）。

use anyhow::Result;
use crossbeam_channel::{Receiver, bounded};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use stagelink_client::Stage;
use std::thread;

use super::oneshot::print_progress;
use super::{build_stage, describe_health, describe_state, print_probe};
use crate::commands::CliConfig;
use crate::commands::motion::parse_move_args;

const HISTORY_FILE: &str = ".stagelink_history";

/// REPL 输入（专用输入线程）
struct ReplInput {
    command_rx: Receiver<String>,
    _input_thread: thread::JoinHandle<Result<()>>,
}

impl ReplInput {
    fn new() -> Self {
        let (command_tx, command_rx) = bounded::<String>(10);

        let input_thread = thread::spawn(move || {
            let mut rl = Editor::<(), DefaultHistory>::new()
                .map_err(|e| anyhow::anyhow!("Failed to initialize readline: {}", e))?;
            rl.load_history(HISTORY_FILE).ok();

            println!("stagelink CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
            println!("输入 'help' 查看帮助，'exit' 退出");
            println!();

            loop {
                match rl.readline("stage> ") {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = rl.add_history_entry(line.clone());
                        let quit = line == "exit" || line == "quit";
                        if command_tx.send(line).is_err() || quit {
                            break;
                        }
                    },
                    Err(ReadlineError::Interrupted) => {
                        println!("^C");
                        let _ = command_tx.send("stop".to_string());
                    },
                    Err(ReadlineError::Eof) => {
                        let _ = command_tx.send("exit".to_string());
                        break;
                    },
                    Err(err) => {
                        eprintln!("Error: {:?}", err);
                        break;
                    },
                }
            }
            rl.save_history(HISTORY_FILE).ok();
            Ok(())
        });

        Self {
            command_rx,
            _input_thread: input_thread,
        }
    }

    fn recv_command(&self) -> Option<String> {
        self.command_rx.recv().ok()
    }
}

/// 运行 REPL 模式
pub fn run_repl(config: CliConfig, target_loaded: bool) -> Result<()> {
    let stage = build_stage(&config, target_loaded);
    let input = ReplInput::new();

    println!("💡 提示: 使用 'connect' 连接到 {}", config.connection.address());
    println!();

    while let Some(line) = input.recv_command() {
        match line.as_str() {
            "exit" | "quit" => {
                println!("👋 再见！");
                break;
            },
            "help" => print_help(),
            _ => {
                if let Err(err) = handle_command(&line, &stage) {
                    eprintln!("❌ Error: {}", err);
                }
            },
        }
    }

    stage.disconnect();
    Ok(())
}

fn handle_command(line: &str, stage: &Stage) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((command, args)) = parts.split_first() else {
        return Ok(());
    };

    match *command {
        "connect" => {
            println!("⏳ 连接中...");
            stage.connect()?;
            println!("✅ 已连接");
        },
        "disconnect" => {
            stage.disconnect();
            println!("✅ 已断开");
        },
        "state" => {
            println!("{}", describe_state(stage.state()));
            if let Some(change) = stage.manager().last_change() {
                println!("   原因: {}", change.reason);
            }
            println!("   health: {}", describe_health(stage.health()));
        },
        "status" => {
            let status = stage.status()?;
            println!("📊 {} (busy: {})", status.state, status.busy);
        },
        "position" => {
            let p = stage.position()?;
            println!("📍 x = {:.3} um, y = {:.3} um", p.x_um, p.y_um);
        },
        "move" => {
            let args = parse_move_args(args)?;
            stage.move_relative(args.dx, args.dy)?;
        },
        "stop" => {
            if stage.is_connected() {
                stage.halt()?;
                println!("🛑 已停止运动");
            }
        },
        "home" => {
            stage.home()?;
            println!("✅ 回零完成");
        },
        "sweep" => {
            let count = match args.first() {
                Some(n) => n.parse()?,
                None => 1,
            };
            let summary = stage.run_sweep(count, &print_progress)?;
            println!("✅ {} 成功, {} 失败", summary.completed, summary.failed);
        },
        "probe" => print_probe(&stage.probe()),
        "metrics" => println!("{:#?}", stage.metrics()),
        other => {
            anyhow::bail!("未知命令: {}（输入 'help' 查看帮助）", other);
        },
    }
    Ok(())
}

fn print_help() {
    println!("可用命令:");
    println!("  connect              连接服务器");
    println!("  disconnect           断开连接");
    println!("  state                显示连接状态");
    println!("  status               查询服务器状态");
    println!("  position             查询当前位置");
    println!("  move <dx> <dy>       相对移动（微米）");
    println!("  stop                 停止运动（Ctrl+C 同）");
    println!("  home                 回零");
    println!("  sweep [n]            多配置扫描");
    println!("  probe                诊断连接");
    println!("  metrics              链路统计");
    println!("  help                 显示帮助");
    println!("  exit                 退出");
}
