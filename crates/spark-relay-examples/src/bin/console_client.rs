//! 控制台客户端：`console-client [config.toml]`，每行输入作为一条消息发送，空行退出。

use std::path::PathBuf;

use anyhow::Context;
use spark_relay_core::{ClientEvent, ClientOptions};
use spark_relay_examples::{load_client_config, telemetry};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::install()?;
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_client_config(path.as_deref()).await?;

    let mut client = spark_relay_tcp::connect(&config, ClientOptions::default())
        .await
        .with_context(|| format!("failed to connect to {}", config.connect))?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type something (blank to quit)");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("failed to read stdin")?;
                match line.as_deref().map(str::trim) {
                    None | Some("") => break,
                    Some(text) => client.send_text(text)?,
                }
            }
            event = client.next_event() => match event {
                Some(ClientEvent::Activity(activity)) => println!(
                    "{}: {}",
                    activity.activity_type,
                    activity.text.as_deref().unwrap_or_default()
                ),
                Some(ClientEvent::Error(text)) => println!("error: {text}"),
                None => {
                    println!("server closed the connection");
                    return client.close().await.map_err(Into::into);
                }
            },
        }
    }

    client.close().await?;
    Ok(())
}
