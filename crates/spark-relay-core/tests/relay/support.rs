//! 集成测试共用的引擎与会话夹具。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use spark_relay_core::transport::{MemoryReader, MemoryWriter, duplex};
use spark_relay_core::{
    Activity, Engine, EngineError, Envelope, EnvelopeReader, EnvelopeWriter, Payload,
    RelayConfig, Session, SessionHandle, SessionReport, TurnContext,
};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// 单次读取的等待上限，防止用例在回归时无限挂起。
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// 回显引擎：`fail` 触发引擎错误，`panic` 触发 panic，其余文本回显为 `Echo: <text>`。
pub struct EchoEngine;

#[async_trait]
impl Engine for EchoEngine {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        let text = turn.activity().text.clone().unwrap_or_default();
        match text.as_str() {
            "fail" => Err(EngineError::new("engine rejected `fail`")),
            "panic" => panic!("engine panicked on purpose"),
            _ => {
                turn.send_text(format!("Echo: {text}"))?;
                Ok(())
            }
        }
    }
}

/// 会话夹具：测试方扮演远端对端。
pub struct Harness {
    pub peer_reader: MemoryReader,
    pub peer_writer: MemoryWriter,
    pub handle: SessionHandle,
    session: JoinHandle<SessionReport>,
}

impl Harness {
    pub fn start(engine: Arc<dyn Engine>) -> Self {
        Self::start_with(engine, RelayConfig::default())
    }

    pub fn start_with(engine: Arc<dyn Engine>, config: RelayConfig) -> Self {
        let (relay_side, peer_side) = duplex();
        let (relay_reader, relay_writer) = relay_side.split();
        let (peer_reader, peer_writer) = peer_side.split();
        let session = Session::new(engine, config).with_peer("memory");
        let handle = session.handle();
        let session = tokio::spawn(
            session
                .run(relay_reader, relay_writer)
                .in_current_span(),
        );
        Self {
            peer_reader,
            peer_writer,
            handle,
            session,
        }
    }

    pub async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.peer_writer
            .write(envelope)
            .await
            .context("peer failed to write envelope")
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let envelope = Envelope::activity(&Activity::message(text).with_id(format!("in-{text}")))
            .context("encode inbound activity")?;
        self.send(envelope).await
    }

    /// 读取下一个信封；流结束返回 `None`。
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        tokio::time::timeout(STEP_TIMEOUT, self.peer_reader.next())
            .await
            .context("timed out waiting for the relay")?
            .context("peer failed to read envelope")
    }

    pub async fn recv_payload(&mut self) -> Result<Payload> {
        let envelope = self
            .recv()
            .await?
            .ok_or_else(|| anyhow!("relay closed the stream early"))?;
        envelope.decode().context("relay sent an undecodable envelope")
    }

    pub async fn recv_text(&mut self) -> Result<String> {
        match self.recv_payload().await? {
            Payload::Activity(activity) => activity
                .text
                .ok_or_else(|| anyhow!("reply activity has no text")),
            other => Err(anyhow!("expected activity, got {other:?}")),
        }
    }

    /// 结束写方向，收集剩余的全部信封，并等待会话报告。
    pub async fn finish(mut self) -> Result<(Vec<Envelope>, SessionReport)> {
        self.peer_writer.close().await.context("peer close")?;
        let mut rest = Vec::new();
        while let Some(envelope) = self.recv().await? {
            rest.push(envelope);
        }
        let report = self.join().await?;
        Ok((rest, report))
    }

    pub async fn join(self) -> Result<SessionReport> {
        tokio::time::timeout(STEP_TIMEOUT, self.session)
            .await
            .context("timed out waiting for the session to close")?
            .context("session task panicked")
    }
}
