#![doc = r#"
# spark-relay-examples

## 意图（Why）
- 演示如何把一个回合制引擎挂到 TCP 中继上，以及对端如何以控制台方式与之交互；
- 两个二进制共享日志安装与配置加载逻辑，放在本库中以便测试。

## 内容（What）
- [`EchoBot`]：回显引擎，经 [`spark_relay_core::Dispatcher`] 接入会话；
- [`telemetry::install`]：`tracing-subscriber` 全局安装；
- [`load_server_config`] / [`load_client_config`]：从可选的 TOML 文件读取宿主配置。
"#]

pub mod echo;
pub mod telemetry;

use std::path::Path;

use anyhow::Context;
use spark_relay_tcp::{ClientConfig, ServerConfig};

pub use echo::EchoBot;

/// 读取服务端配置；未给出路径时使用默认值。
pub async fn load_server_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => {
            let raw = read(path).await?;
            ServerConfig::from_toml_str(&raw)
                .with_context(|| format!("invalid server config `{}`", path.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

/// 读取客户端配置；未给出路径时使用默认值。
pub async fn load_client_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    match path {
        Some(path) => {
            let raw = read(path).await?;
            ClientConfig::from_toml_str(&raw)
                .with_context(|| format!("invalid client config `{}`", path.display()))
        }
        None => Ok(ClientConfig::default()),
    }
}

async fn read(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read `{}`", path.display()))
}
