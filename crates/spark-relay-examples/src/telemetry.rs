use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 安装全局日志订阅者：`fmt` 输出到标准错误，过滤规则取自 `RUST_LOG`，缺省为 `info`。
///
/// 重复安装返回错误，调用方通常只在 `main` 开头调用一次。
pub fn install() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
