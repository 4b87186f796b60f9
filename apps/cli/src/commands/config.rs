//! 配置管理命令
//!
//! 配置文件位于 `<config_dir>/stagelink/config.toml`，也可以用 `--config` 指定。

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use stagelink_client::JogConfig;
use stagelink_driver::ConnectionConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件路径
pub fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("stagelink");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 连接参数
    pub connection: ConnectionConfig,
    /// 点动参数
    pub jog: JogConfig,
}

impl CliConfig {
    /// 加载配置；第二个返回值表示配置文件是否存在
    pub fn load(path: &Path) -> Result<(Self, bool)> {
        if !path.exists() {
            return Ok((Self::default(), false));
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok((config, true))
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content).context("写入配置文件失败")?;
        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 服务器主机名或 IP
        #[arg(long = "server-host")]
        server_host: Option<String>,

        /// 服务器端口
        #[arg(long = "server-port")]
        server_port: Option<u16>,

        /// 连接超时（毫秒）
        #[arg(long)]
        connect_timeout_ms: Option<u64>,

        /// 读超时（毫秒）
        #[arg(long)]
        read_timeout_ms: Option<u64>,

        /// 自动重连次数
        #[arg(long)]
        max_reconnect_attempts: Option<u32>,

        /// 重连间隔（毫秒）
        #[arg(long)]
        reconnect_delay_ms: Option<u64>,

        /// 健康检查周期（毫秒）
        #[arg(long)]
        health_check_interval_ms: Option<u64>,

        /// 点动满偏移步长（微米）
        #[arg(long)]
        max_step_um: Option<f64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（host、port、…，或 all）
        #[arg(default_value = "all")]
        key: String,
    },

    /// 打印配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                server_host,
                server_port,
                connect_timeout_ms,
                read_timeout_ms,
                max_reconnect_attempts,
                reconnect_delay_ms,
                health_check_interval_ms,
                max_step_um,
            } => {
                let (mut config, _) = CliConfig::load(path)?;
                let connection = &mut config.connection;
                if let Some(host) = server_host {
                    connection.host = host;
                }
                if let Some(port) = server_port {
                    connection.port = port;
                }
                if let Some(ms) = connect_timeout_ms {
                    connection.connect_timeout_ms = ms;
                }
                if let Some(ms) = read_timeout_ms {
                    connection.read_timeout_ms = ms;
                }
                if let Some(n) = max_reconnect_attempts {
                    connection.max_reconnect_attempts = n;
                }
                if let Some(ms) = reconnect_delay_ms {
                    connection.reconnect_delay_ms = ms;
                }
                if let Some(ms) = health_check_interval_ms {
                    connection.health_check_interval_ms = ms;
                }
                if let Some(um) = max_step_um {
                    config.jog.max_step_um = um;
                }

                config.connection.validate()?;
                config.jog.validate()?;
                config.save(path)?;
                println!("✅ 配置已保存: {}", path.display());
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let (config, exists) = CliConfig::load(path)?;
                let c = &config.connection;
                match key.as_str() {
                    "host" => println!("{}", c.host),
                    "port" => println!("{}", c.port),
                    "connect_timeout_ms" => println!("{}", c.connect_timeout_ms),
                    "read_timeout_ms" => println!("{}", c.read_timeout_ms),
                    "max_reconnect_attempts" => println!("{}", c.max_reconnect_attempts),
                    "reconnect_delay_ms" => println!("{}", c.reconnect_delay_ms),
                    "health_check_interval_ms" => println!("{}", c.health_check_interval_ms),
                    "max_step_um" => println!("{}", config.jog.max_step_um),
                    "all" => {
                        if !exists {
                            println!("# (未保存，显示默认值)");
                        }
                        print!("{}", toml::to_string_pretty(&config)?);
                    },
                    other => anyhow::bail!("未知配置项: {}", other),
                }
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", path.display());
                Ok(())
            },
        }
    }
}
