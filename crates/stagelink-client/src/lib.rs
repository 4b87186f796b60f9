//! 客户端接口
//!
//! 本 crate 提供面向 UI / 工作流的高层接口：
//! - [`Stage`]：连接、查询、移动、扫描和诊断
//! - [`JogPad`] / [`MotionThrottler`]：latest-target-wins 的连续点动控制
//! - [`init_logging`]：基于 `tracing-subscriber` 的日志初始化
//!
//! # 示例
//!
//! ```no_run
//! use stagelink_client::{JogConfig, Stage};
//! use stagelink_driver::{ConnectionConfig, TargetFlag};
//! use std::sync::Arc;
//!
//! let stage = Stage::new(
//!     ConnectionConfig::new("192.168.1.20", 5005),
//!     Arc::new(TargetFlag::new(true)),
//! );
//! stage.connect()?;
//!
//! let pad = stage.jog(JogConfig::default())?;
//! pad.begin_drag(0.0, 0.0);
//! pad.update_drag(0.4, 0.0);
//! // ... 手势结束
//! pad.end_drag();
//! # Ok::<(), stagelink_client::ClientError>(())
//! ```

mod error;
pub mod jog;
mod logging;
pub mod stage;
pub mod throttle;

pub use error::ClientError;
pub use jog::{JogConfig, JogPad, deflection_to_sample};
pub use logging::init_logging;
pub use stage::Stage;
pub use throttle::{MotionSample, MotionThrottler, MovementCallback, ThrottleStats};

pub use stagelink_driver::{
    ConnectionConfig, ConnectionState, DriverError, HealthStatus, ProbeOutcome, ProbeResult,
    StateChange, TargetFlag, TargetGuard, probe,
};
