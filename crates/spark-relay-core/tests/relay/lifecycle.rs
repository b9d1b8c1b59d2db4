//! 会话生命周期：排空、取消、传输失败与晚到回复。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use spark_relay_core::transport::duplex;
use spark_relay_core::{
    Activity, Engine, EngineError, Envelope, EnvelopeReader, EnvelopeWriter, ErrorKind,
    RelayConfig, RelayError, Session, SessionOutcome, SessionState, TurnContext,
};
use tokio::sync::{Notify, mpsc};

use crate::support::{EchoEngine, Harness, STEP_TIMEOUT};

/// 每个回合同步推送 `count` 条回复，推送完成后通知测试方。
struct Burst {
    count: usize,
    pushed: Arc<Notify>,
}

#[async_trait]
impl Engine for Burst {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        for n in 0..self.count {
            turn.send_text(format!("burst-{n}"))?;
        }
        self.pushed.notify_one();
        Ok(())
    }
}

/// 回合立即结束，回复由分离任务稍后发出。
struct Deferred;

#[async_trait]
impl Engine for Deferred {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        let later = turn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Err(err) = later.send_text("late") {
                tracing::debug!(error = %err, "late reply rejected");
            }
        });
        Ok(())
    }
}

/// 写操作永远不完成的写端，模拟不读数据的对端。
struct StalledWriter;

#[async_trait]
impl EnvelopeWriter for StalledWriter {
    async fn write(&mut self, _envelope: Envelope) -> spark_relay_core::Result<()> {
        std::future::pending().await
    }

    async fn close(&mut self) -> spark_relay_core::Result<()> {
        Ok(())
    }
}

/// 每次写出前休眠，模拟读得慢但一直在读的对端。
struct SlowWriter {
    delay: Duration,
    written: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl EnvelopeWriter for SlowWriter {
    async fn write(&mut self, envelope: Envelope) -> spark_relay_core::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.written
            .send(envelope)
            .map_err(|_| RelayError::peer_closed())
    }

    async fn close(&mut self) -> spark_relay_core::Result<()> {
        Ok(())
    }
}

/// 先交付给定信封，随后报告连接重置。
struct ResettingReader {
    queued: Vec<Envelope>,
}

#[async_trait]
impl EnvelopeReader for ResettingReader {
    async fn next(&mut self) -> spark_relay_core::Result<Option<Envelope>> {
        if self.queued.is_empty() {
            return Err(RelayError::transport(
                spark_relay_core::error::codes::TRANSPORT_READ,
                "connection reset by peer",
            ));
        }
        Ok(Some(self.queued.remove(0)))
    }
}

fn burst(count: usize) -> (Arc<Burst>, Arc<Notify>) {
    let pushed = Arc::new(Notify::new());
    (
        Arc::new(Burst {
            count,
            pushed: Arc::clone(&pushed),
        }),
        pushed,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn close_after_n_pushes_writes_exactly_n() -> Result<()> {
    let (engine, pushed) = burst(12);
    let mut harness = Harness::start(engine);
    harness.send_text("go").await?;
    pushed.notified().await;

    let (written, report) = harness.finish().await?;
    ensure!(written.len() == 12, "wrote {} envelopes", written.len());
    for (n, envelope) in written.iter().enumerate() {
        let spark_relay_core::Payload::Activity(reply) = envelope.decode()? else {
            anyhow::bail!("envelope {n} is not an activity");
        };
        ensure!(reply.text == Some(format!("burst-{n}")));
        ensure!(reply.id.is_some(), "every reply carries a correlation id");
    }
    ensure!(report.outbound.activities == 12);
    ensure!(report.discarded() == 0);
    ensure!(report.pending_replies == 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replies_pushed_after_the_turn_are_delivered() -> Result<()> {
    let mut harness = Harness::start(Arc::new(Deferred));
    harness.send_text("later please").await?;
    ensure!(harness.recv_text().await? == "late");
    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty());
    ensure!(report.outcome.is_clean());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_unblocks_both_pumps_and_discards_replies() -> Result<()> {
    let (engine, pushed) = burst(10);
    let (relay_side, peer_side) = duplex();
    let (relay_reader, _unused_writer) = relay_side.split();
    let (_peer_reader, mut peer_writer) = peer_side.split();

    let session = Session::new(engine, RelayConfig::default());
    let mut handle = session.handle();
    let running = tokio::spawn(session.run(relay_reader, StalledWriter));

    peer_writer
        .write(Envelope::activity(&Activity::message("go"))?)
        .await?;
    pushed.notified().await;
    ensure!(handle.cancel(), "first cancel wins");

    let report = tokio::time::timeout(STEP_TIMEOUT, running)
        .await
        .context("cancel did not unblock the session")??;
    handle.closed().await;

    ensure!(matches!(report.outcome, SessionOutcome::Cancelled), "{:?}", report.outcome);
    ensure!(report.outbound.written() == 0);
    ensure!(report.discarded() == 10, "discarded {}", report.discarded());
    ensure!(handle.state() == SessionState::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_timeout_forces_cancellation() -> Result<()> {
    let (engine, pushed) = burst(3);
    let (relay_side, peer_side) = duplex();
    let (relay_reader, _unused_writer) = relay_side.split();
    let (_peer_reader, mut peer_writer) = peer_side.split();
    let config = RelayConfig {
        drain_timeout_ms: Some(50),
        ..RelayConfig::default()
    };

    let running = tokio::spawn(Session::new(engine, config).run(relay_reader, StalledWriter));
    peer_writer
        .write(Envelope::activity(&Activity::message("go"))?)
        .await?;
    pushed.notified().await;
    peer_writer.close().await?;

    let report = tokio::time::timeout(STEP_TIMEOUT, running)
        .await
        .context("drain timeout never fired")??;
    ensure!(matches!(report.outcome, SessionOutcome::Cancelled), "{:?}", report.outcome);
    ensure!(report.discarded() == 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_reader_receives_every_reply_after_half_close() -> Result<()> {
    let (engine, pushed) = burst(5);
    let (relay_side, peer_side) = duplex();
    let (relay_reader, _unused_writer) = relay_side.split();
    let (_peer_reader, mut peer_writer) = peer_side.split();
    let (written_tx, mut written_rx) = mpsc::unbounded_channel();
    let writer = SlowWriter {
        delay: Duration::from_secs(2),
        written: written_tx,
    };

    let session = Session::new(engine, RelayConfig::default());
    let running = tokio::spawn(session.run(relay_reader, writer));
    peer_writer
        .write(Envelope::activity(&Activity::message("go"))?)
        .await?;
    pushed.notified().await;
    peer_writer.close().await?;

    // 虚拟时钟下五次写出共耗时十秒，排空阶段不得提前放弃。
    let report = running.await?;
    ensure!(report.outcome.is_clean(), "{:?}", report.outcome);
    ensure!(report.outbound.activities == 5, "wrote {}", report.outbound.activities);
    ensure!(report.discarded() == 0);

    let mut texts = Vec::new();
    while let Ok(envelope) = written_rx.try_recv() {
        let spark_relay_core::Payload::Activity(reply) = envelope.decode()? else {
            anyhow::bail!("unexpected envelope {envelope:?}");
        };
        texts.push(reply.text.context("reply without text")?);
    }
    let expected: Vec<String> = (0..5).map(|n| format!("burst-{n}")).collect();
    ensure!(texts == expected, "written: {texts:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failure_ends_only_that_session() -> Result<()> {
    let inbound = Envelope::activity(&Activity::message("before reset"))?;
    let (relay_side, peer_side) = duplex();
    let (_relay_reader, relay_writer) = relay_side.split();
    let (mut peer_reader, _peer_writer) = peer_side.split();

    let failing = Session::new(Arc::new(EchoEngine), RelayConfig::default());
    let report = tokio::time::timeout(
        STEP_TIMEOUT,
        failing.run(ResettingReader { queued: vec![inbound] }, relay_writer),
    )
    .await
    .context("session did not end")?;

    let err = report.outcome.error().context("session should fail")?;
    ensure!(err.kind() == ErrorKind::TransportError);
    ensure!(report.inbound.activities == 1);

    // 回合已在失败前完成，其回复要么已写出要么被计为丢弃。
    let delivered = peer_reader.next().await?.is_some();
    ensure!(delivered || report.discarded() == 1);

    let mut healthy = Harness::start(Arc::new(EchoEngine));
    healthy.send_text("unaffected").await?;
    ensure!(healthy.recv_text().await? == "Echo: unaffected");
    healthy.finish().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn observers_see_states_move_forward() -> Result<()> {
    let harness = Harness::start(Arc::new(EchoEngine));
    let mut states = harness.handle.watch();
    let mut seen = vec![*states.borrow_and_update()];

    let finishing = tokio::spawn(harness.finish());
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        seen.push(state);
        if state == SessionState::Closed {
            break;
        }
    }
    let (_, report) = finishing.await??;
    ensure!(report.outcome.is_clean());
    ensure!(seen.last() == Some(&SessionState::Closed), "states: {seen:?}");
    // watch 只保留最新值，中间状态可能被合并；观察到的序列必须单调前进。
    let rank = |state: SessionState| match state {
        SessionState::Starting => 0,
        SessionState::Running => 1,
        SessionState::Draining => 2,
        SessionState::Closed => 3,
    };
    ensure!(
        seen.windows(2).all(|pair| rank(pair[0]) < rank(pair[1])),
        "states went backwards: {seen:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_before_start_closes_immediately() -> Result<()> {
    let (relay_side, _peer_side) = duplex();
    let (reader, writer) = relay_side.split();
    let session = Session::new(Arc::new(EchoEngine), RelayConfig::default());
    let handle = session.handle();
    handle.cancel();

    let report = session.run(reader, writer).await;
    ensure!(matches!(report.outcome, SessionOutcome::Cancelled));
    ensure!(handle.state() == SessionState::Closed);
    Ok(())
}
