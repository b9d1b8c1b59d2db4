//! 信封分派与错误隔离。

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use spark_relay_core::envelope::wire;
use spark_relay_core::error::codes;
use spark_relay_core::transport::{LineReader, LineWriter};
use spark_relay_core::{
    Ack, Activity, Engine, EngineError, Envelope, EnvelopeReader, EnvelopeWriter, FrameCodec,
    Kind, Payload, RelayConfig, Session, SessionOutcome, TurnContext,
};
use tracing_test::traced_test;

use crate::support::{EchoEngine, Harness, STEP_TIMEOUT};

/// 先回复一条超出帧预算的长文本，再回复一条短文本。
struct Oversized;

#[async_trait]
impl Engine for Oversized {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        turn.send_text("x".repeat(600))?;
        turn.send_text("small")?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip_then_clean_close() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    harness.send_text("hi").await?;

    let envelope = harness.recv().await?.context("expected a reply")?;
    ensure!(envelope.kind() == Kind::Activity, "reply kind was {}", envelope.kind);
    let Payload::Activity(reply) = envelope.decode()? else {
        anyhow::bail!("reply is not an activity");
    };
    ensure!(reply.text.as_deref() == Some("Echo: hi"));
    ensure!(reply.reply_to_id.as_deref() == Some("in-hi"));

    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty(), "unexpected trailing envelopes: {rest:?}");
    ensure!(report.outcome.is_clean(), "outcome: {:?}", report.outcome);
    ensure!(report.pending_replies == 0);
    ensure!(report.outbound.activities == 1);
    ensure!(report.inbound.activities == 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_failure_does_not_stop_later_turns() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    harness.send_text("fail").await?;
    harness.send_text("panic").await?;
    harness.send_text("still here").await?;

    let Payload::Error(first) = harness.recv_payload().await? else {
        anyhow::bail!("expected an error envelope for the failing turn");
    };
    ensure!(first.contains("engine rejected `fail`"), "error text: {first}");
    ensure!(first.contains(codes::ENGINE_FAILED));

    let Payload::Error(second) = harness.recv_payload().await? else {
        anyhow::bail!("expected an error envelope for the panicking turn");
    };
    ensure!(second.contains(codes::ENGINE_PANICKED), "error text: {second}");

    ensure!(harness.recv_text().await? == "Echo: still here");

    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty());
    ensure!(report.outcome.is_clean());
    ensure!(report.inbound.engine_errors == 2);
    ensure!(report.outbound.errors == 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_kind_is_skipped() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    harness
        .send(Envelope {
            kind: "Bogus".into(),
            body: "{}".into(),
        })
        .await?;
    harness.send_text("after bogus").await?;

    ensure!(harness.recv_text().await? == "Echo: after bogus");
    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty());
    ensure!(report.inbound.unrecognized == 1);
    ensure!(report.inbound.envelopes == 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn malformed_body_is_logged_and_dropped() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    harness
        .send(Envelope {
            kind: wire::ACTIVITY.into(),
            body: "{not json".into(),
        })
        .await?;
    harness.send_text("next").await?;

    ensure!(harness.recv_text().await? == "Echo: next");
    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty());
    ensure!(report.inbound.decode_errors == 1);
    ensure!(report.outbound.written() == 1, "only the echo is written");
    ensure!(report.outcome.is_clean());
    assert!(logs_contain("dropping malformed envelope"));
    assert!(logs_contain(codes::DECODE_BODY));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn acks_and_peer_errors_are_consumed_silently() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    harness
        .send(Envelope::ack(&Ack::new("5").for_activity("s1-1"))?)
        .await?;
    harness.send(Envelope::error("peer hiccup")).await?;

    let (rest, report) = harness.finish().await?;
    ensure!(rest.is_empty(), "acks and errors never produce replies");
    ensure!(report.inbound.acks == 1);
    ensure!(report.inbound.peer_errors == 1);
    ensure!(matches!(report.outcome, SessionOutcome::Clean));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replies_are_written_in_arrival_order() -> Result<()> {
    let mut harness = Harness::start(Arc::new(EchoEngine));
    let inputs: Vec<String> = (0..25).map(|n| format!("msg-{n}")).collect();
    for input in &inputs {
        harness.send_text(input).await?;
    }
    for input in &inputs {
        let text = harness.recv_text().await?;
        ensure!(text == format!("Echo: {input}"), "out of order: {text}");
    }
    let (rest, _) = harness.finish().await?;
    ensure!(rest.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_reply_is_replaced_by_an_error() -> Result<()> {
    let config = RelayConfig {
        max_frame_bytes: 256,
        ..RelayConfig::default()
    };
    let codec = config.codec();
    let (relay_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (relay_read, relay_write) = tokio::io::split(relay_io);
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    let session = Session::new(Arc::new(Oversized), config);
    let running = tokio::spawn(session.run(
        LineReader::new(relay_read, codec),
        LineWriter::new(relay_write, codec),
    ));

    let mut peer_reader = LineReader::new(peer_read, FrameCodec::default());
    let mut peer_writer = LineWriter::new(peer_write, FrameCodec::default());
    peer_writer
        .write(Envelope::activity(&Activity::message("go"))?)
        .await?;
    peer_writer.close().await?;

    let mut received = Vec::new();
    while let Some(envelope) = tokio::time::timeout(STEP_TIMEOUT, peer_reader.next())
        .await
        .context("timed out waiting for the relay")??
    {
        received.push(envelope.decode()?);
    }
    ensure!(received.len() == 2, "one write per push: {received:?}");
    let Payload::Error(text) = &received[0] else {
        anyhow::bail!("oversized reply should become an error: {:?}", received[0]);
    };
    ensure!(text.contains(codes::ENCODE_BODY), "error text: {text}");
    ensure!(text.contains("exceeds budget 256"), "error text: {text}");
    let Payload::Activity(reply) = &received[1] else {
        anyhow::bail!("expected the short reply: {:?}", received[1]);
    };
    ensure!(reply.text.as_deref() == Some("small"));

    let report = tokio::time::timeout(STEP_TIMEOUT, running)
        .await
        .context("session did not close")??;
    ensure!(report.outcome.is_clean(), "{:?}", report.outcome);
    ensure!(report.outbound.encode_errors == 1);
    ensure!(report.outbound.errors == 1);
    ensure!(report.outbound.activities == 1);
    Ok(())
}
