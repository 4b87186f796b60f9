//! 日志初始化

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 安装全局 `tracing` 订阅者，并把 `log` 记录桥接到 `tracing`
///
/// `RUST_LOG` 优先于 `default_directive`。已经安装过订阅者时返回 false，不会 panic。
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    let _ = tracing_log::LogTracer::init();
    true
}
