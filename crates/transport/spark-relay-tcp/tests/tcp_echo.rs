//! 真实 TCP 连接上的端到端行为：回显与确认、异常断开隔离、优雅停机。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use spark_relay_core::{
    Ack, AckHandler, ClientEvent, ClientOptions, Engine, EngineError, RelayClient, SessionId,
    TurnContext,
};
use spark_relay_tcp::{ClientConfig, RelayServer, ServeReport, ServerConfig, TcpSocketConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Echo;

#[async_trait]
impl Engine for Echo {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        let text = turn.activity().text.clone().unwrap_or_default();
        turn.send_text(format!("Echo: {text}"))?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAcks {
    seen: Mutex<Vec<(SessionId, Ack)>>,
}

impl AckHandler for RecordingAcks {
    fn on_ack(&self, session: &SessionId, ack: &Ack) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((session.clone(), ack.clone()));
        }
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: spark_relay_core::Cancellation,
    serving: JoinHandle<ServeReport>,
}

impl Running {
    async fn start(acks: Arc<RecordingAcks>) -> Result<Self> {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse()?,
            ..ServerConfig::default()
        };
        let server = RelayServer::bind(&config, |_peer: SocketAddr| -> Arc<dyn Engine> {
            Arc::new(Echo)
        })
        .await?
        .with_ack_handler(acks);
        Ok(Self {
            addr: server.local_addr(),
            shutdown: server.shutdown_handle(),
            serving: tokio::spawn(server.serve()),
        })
    }

    async fn client(&self) -> Result<RelayClient> {
        let config = ClientConfig {
            connect: self.addr,
            ..ClientConfig::default()
        };
        Ok(spark_relay_tcp::connect(&config, ClientOptions::default()).await?)
    }

    async fn stop(self) -> Result<ServeReport> {
        self.shutdown.cancel();
        tokio::time::timeout(STEP_TIMEOUT, self.serving)
            .await
            .context("server did not stop")?
            .context("server task failed")
    }
}

async fn next_text(client: &mut RelayClient) -> Result<String> {
    let event = tokio::time::timeout(STEP_TIMEOUT, client.next_event())
        .await
        .context("timed out waiting for a reply")?;
    match event {
        Some(ClientEvent::Activity(activity)) => activity.text.context("reply without text"),
        other => bail!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_over_tcp_is_acknowledged() -> Result<()> {
    let acks = Arc::new(RecordingAcks::default());
    let server = Running::start(Arc::clone(&acks)).await?;

    let mut client = server.client().await?;
    client.send_text("hi")?;
    ensure!(next_text(&mut client).await? == "Echo: hi");
    client.send_text("again")?;
    ensure!(next_text(&mut client).await? == "Echo: again");

    tokio::time::timeout(STEP_TIMEOUT, client.close())
        .await
        .context("client close did not complete")??;

    let seen = acks.seen.lock().map(|seen| seen.clone()).unwrap_or_default();
    ensure!(seen.len() == 2, "acks: {seen:?}");
    let ids: Vec<_> = seen.iter().map(|(_, ack)| ack.id.as_str()).collect();
    ensure!(ids == ["1", "2"], "delivery ids: {ids:?}");
    ensure!(
        seen.iter().all(|(_, ack)| ack.activity_id.is_some()),
        "every ack names the delivered activity"
    );

    let report = server.stop().await?;
    ensure!(report.accepted == 1);
    ensure!(report.clean == 1, "{report:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn server_survives_abrupt_disconnect() -> Result<()> {
    let server = Running::start(Arc::new(RecordingAcks::default())).await?;

    let mut raw = TcpStream::connect(server.addr).await?;
    raw.write_all(
        br#"{"Kind":"Activity","Body":"{\"type\":\"message\",\"text\":\"bye\"}"}"#,
    )
    .await?;
    raw.write_all(b"\n{\"Kind\":\"Activ").await?;
    socket2::SockRef::from(&raw).set_linger(Some(Duration::ZERO))?;
    drop(raw);

    let mut client = server.client().await?;
    client.send_text("still serving")?;
    ensure!(next_text(&mut client).await? == "Echo: still serving");
    tokio::time::timeout(STEP_TIMEOUT, client.close())
        .await
        .context("client close did not complete")??;

    let report = server.stop().await?;
    ensure!(report.accepted == 2, "{report:?}");
    ensure!(report.clean + report.failed == 2, "{report:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_idle_sessions() -> Result<()> {
    let server = Running::start(Arc::new(RecordingAcks::default())).await?;
    let mut client = server.client().await?;
    client.send_text("warm up")?;
    ensure!(next_text(&mut client).await? == "Echo: warm up");

    let report = server.stop().await?;
    ensure!(report.accepted == 1);
    ensure!(report.cancelled == 1, "{report:?}");

    let ended = tokio::time::timeout(STEP_TIMEOUT, client.next_event())
        .await
        .context("client never saw the server close")?;
    ensure!(ended.is_none(), "unexpected event after shutdown: {ended:?}");
    client.abort();
    Ok(())
}

#[test]
fn socket_config_defaults_disable_nagle() {
    let config = TcpSocketConfig::default();
    assert!(config.nodelay);
    assert_eq!(config.linger(), None);
}
