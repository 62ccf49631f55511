//! 日志初始化

use crate::config::{LogFormat, LoggingConfig};
use anyhow::Result;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 读取配置期间使用的临时订阅器，输出到 stderr，INFO 级别
pub fn bootstrap() -> impl Subscriber + Send + Sync {
    fmt()
        .compact()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish()
}

/// 安装全局订阅器；设置了 `RUST_LOG` 时以环境变量为准
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Full => registry.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_subscriber_records_info() {
        tracing::subscriber::with_default(bootstrap(), || {
            assert!(tracing::enabled!(Level::INFO));
            assert!(tracing::enabled!(Level::ERROR));
            assert!(!tracing::enabled!(Level::DEBUG));
        });
    }
}
