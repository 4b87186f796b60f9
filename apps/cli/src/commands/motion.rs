//! 运动与监控命令参数

use anyhow::Result;
use clap::Args;

/// 相对移动
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// X 方向位移（微米）
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub dx: f64,

    /// Y 方向位移（微米）
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub dy: f64,
}

impl MoveCommand {
    pub fn validate(&self) -> Result<()> {
        if !self.dx.is_finite() || !self.dy.is_finite() {
            anyhow::bail!("位移必须是有限数值");
        }
        if self.dx == 0.0 && self.dy == 0.0 {
            anyhow::bail!("至少指定 --dx 或 --dy 之一");
        }
        Ok(())
    }
}

/// 多配置扫描
#[derive(Args, Debug)]
pub struct SweepCommand {
    /// 配置数量
    #[arg(long, default_value_t = 1)]
    pub count: u32,
}

/// 连接并持续打印状态
#[derive(Args, Debug)]
pub struct WatchCommand {
    /// 监控时长（秒），0 表示直到 Ctrl+C
    #[arg(long, default_value_t = 0)]
    pub seconds: u64,
}

/// 解析 REPL 中的 `move <dx> <dy>`
pub fn parse_move_args(args: &[&str]) -> Result<MoveCommand> {
    let [dx, dy] = args else {
        anyhow::bail!("用法: move <dx_um> <dy_um>");
    };
    let command = MoveCommand {
        dx: dx.parse()?,
        dy: dy.parse()?,
    };
    command.validate()?;
    Ok(command)
}
