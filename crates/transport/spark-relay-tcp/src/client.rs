use spark_relay_core::error::Result;
use spark_relay_core::{ClientOptions, RelayClient};

use crate::channel::TcpRelayChannel;
use crate::config::ClientConfig;

/// 连接到中继服务器并启动客户端读写任务。
pub async fn connect(config: &ClientConfig, options: ClientOptions) -> Result<RelayClient> {
    config.relay.validate()?;
    let channel = TcpRelayChannel::connect(config.connect, &config.socket).await?;
    let (reader, writer) = channel.into_split(config.relay.codec());
    Ok(RelayClient::start(reader, writer, options))
}
