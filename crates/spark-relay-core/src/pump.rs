//! # 入站泵与出站泵
//!
//! ## 角色定位（Why）
//! - 两个泵把一条双工流拆成互不阻塞的两个方向：入站泵读信封、驱动回合；出站泵独占写端、
//!   按序写出回复队列中的条目；
//! - 双方只通过回复队列与会话取消令牌耦合，任一方阻塞都不会卡住另一方。
//!
//! ## 错误传播（What）
//! | 情形 | 入站泵 | 出站泵 |
//! | --- | --- | --- |
//! | 解码/编码失败 | WARN，丢弃该信封，继续 | WARN，改写一条 `Error` 信封，继续 |
//! | 引擎失败 | 推送 `Error` 条目，继续 | - |
//! | 传输失败 | 返回错误（会话致命） | 返回错误（会话致命） |
//! | 取消 | 退出 | 丢弃剩余条目并计数后退出 |
//!
//! 入站泵无论以何种方式退出都会关闭回复队列；出站泵在队列关闭且取空后关闭写端。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::ack::AckHandler;
use crate::adapter::{Engine, TurnAdapter};
use crate::cancel::Cancellation;
use crate::envelope::{Envelope, Payload};
use crate::error::{ErrorKind, RelayError, Result, codes};
use crate::reply_sink::{OutboundItem, ReplyReceiver, ReplySink};
use crate::transport::{EnvelopeReader, EnvelopeWriter};

/// 入站方向计数。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InboundStats {
    pub envelopes: u64,
    pub activities: u64,
    pub acks: u64,
    pub peer_errors: u64,
    pub unrecognized: u64,
    pub decode_errors: u64,
    pub engine_errors: u64,
}

/// 出站方向计数。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OutboundStats {
    /// 成功写出的 `Activity` 信封数。
    pub activities: u64,
    /// 成功写出的 `Error` 信封数。
    pub errors: u64,
    /// 无法成帧的条目数；这些条目以 `Error` 信封替代写出。
    pub encode_errors: u64,
    /// 因取消或写失败未能写出的条目数。
    pub discarded: u64,
}

impl OutboundStats {
    pub fn written(&self) -> u64 {
        self.activities + self.errors
    }
}

/// 泵的退出结果：计数总是可用，`result` 记录退出原因。
#[derive(Debug)]
pub struct PumpExit<S> {
    pub stats: S,
    pub result: Result<()>,
}

/// 入站泵。
pub struct InboundPump<R> {
    reader: R,
    engine: Arc<dyn Engine>,
    adapter: TurnAdapter,
    ack_handler: Arc<dyn AckHandler>,
    sink: ReplySink,
    cancellation: Cancellation,
    stats: InboundStats,
}

impl<R: EnvelopeReader> InboundPump<R> {
    pub fn new(
        reader: R,
        engine: Arc<dyn Engine>,
        adapter: TurnAdapter,
        ack_handler: Arc<dyn AckHandler>,
        sink: ReplySink,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            reader,
            engine,
            adapter,
            ack_handler,
            sink,
            cancellation,
            stats: InboundStats::default(),
        }
    }

    /// 运行至对端结束、取消或传输失败。
    pub async fn run(mut self) -> PumpExit<InboundStats> {
        let result = self.read_loop().await;
        if self.sink.close() {
            debug!("reply sink closed by inbound pump");
        }
        PumpExit {
            stats: self.stats,
            result,
        }
    }

    async fn read_loop(&mut self) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    debug!("inbound pump cancelled");
                    return Ok(());
                }
                next = self.reader.next() => next,
            };

            match next {
                Ok(Some(envelope)) => {
                    self.stats.envelopes += 1;
                    self.dispatch(envelope).await;
                }
                Ok(None) => {
                    info!("peer finished sending");
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::DecodeError => self.record_decode_error(&err),
                Err(err) => {
                    error!(code = err.code(), error = %err, "inbound transport failed");
                    return Err(err);
                }
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let payload = match envelope.decode() {
            Ok(payload) => payload,
            Err(err) => {
                self.record_decode_error(&err);
                return;
            }
        };

        match payload {
            Payload::Activity(activity) => {
                self.stats.activities += 1;
                let outcome = self
                    .adapter
                    .process_activity(self.engine.as_ref(), activity)
                    .await;
                if let Err(err) = outcome {
                    self.report_engine_error(err);
                }
            }
            Payload::Ack(ack) => {
                self.stats.acks += 1;
                self.ack_handler.on_ack(self.adapter.session_id(), &ack);
            }
            Payload::Error(text) => {
                self.stats.peer_errors += 1;
                warn!(peer_error = %text, "peer reported an error");
            }
            Payload::Unrecognized { kind, .. } => {
                self.stats.unrecognized += 1;
                info!(kind = %kind, "unrecognized envelope kind; ignoring");
            }
        }
    }

    fn record_decode_error(&mut self, err: &RelayError) {
        self.stats.decode_errors += 1;
        warn!(code = err.code(), error = %err, "dropping malformed envelope");
    }

    fn report_engine_error(&mut self, err: RelayError) {
        if err.code() == codes::ENGINE_CANCELLED {
            debug!("turn abandoned by cancellation");
            return;
        }
        self.stats.engine_errors += 1;
        warn!(code = err.code(), error = %err, "engine turn failed; reporting to peer");
        if let Err(closed) = self.sink.push_error(err.to_string()) {
            debug!(error = %closed, "engine error could not be reported");
        }
    }
}

/// 出站泵，写端的唯一持有者。
pub struct OutboundPump<W> {
    writer: W,
    receiver: ReplyReceiver,
    cancellation: Cancellation,
    stats: OutboundStats,
}

impl<W: EnvelopeWriter> OutboundPump<W> {
    pub fn new(writer: W, receiver: ReplyReceiver, cancellation: Cancellation) -> Self {
        Self {
            writer,
            receiver,
            cancellation,
            stats: OutboundStats::default(),
        }
    }

    /// 运行至队列关闭并取空、取消或写失败。
    pub async fn run(mut self) -> PumpExit<OutboundStats> {
        let result = self.write_loop().await;
        PumpExit {
            stats: self.stats,
            result,
        }
    }

    async fn write_loop(&mut self) -> Result<()> {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    self.discard("cancelled");
                    return Ok(());
                }
                item = self.receiver.recv() => item,
            };

            let Some(item) = item else {
                debug!("reply sink drained; closing writer");
                return self.writer.close().await;
            };

            let is_activity = matches!(item, OutboundItem::Activity(_));
            let kind = item.kind_name();
            let mut next = match item.into_envelope() {
                Ok(envelope) => Some((envelope, is_activity, true)),
                Err(err) => {
                    self.record_encode_error(kind, &err);
                    Some((undeliverable(&err), false, false))
                }
            };

            // 无法成帧的条目以一条 `Error` 信封替代，替代信封本身失败时不再替代。
            while let Some((envelope, is_activity, replaceable)) = next.take() {
                let written = tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => {
                        self.stats.discarded += 1;
                        self.discard("cancelled during write");
                        return Ok(());
                    }
                    written = self.writer.write(envelope) => written,
                };

                match written {
                    Ok(()) if is_activity => self.stats.activities += 1,
                    Ok(()) => self.stats.errors += 1,
                    Err(err) if replaceable && !err.is_session_fatal() => {
                        self.record_encode_error(kind, &err);
                        next = Some((undeliverable(&err), false, false));
                    }
                    Err(err) if !err.is_session_fatal() => warn!(
                        code = err.code(),
                        error = %err,
                        "replacement error envelope cannot be framed"
                    ),
                    Err(err) => {
                        self.stats.discarded += 1;
                        error!(code = err.code(), error = %err, "outbound transport failed");
                        self.discard("write failed");
                        return Err(err);
                    }
                }
            }
        }
    }

    fn record_encode_error(&mut self, kind: &str, err: &RelayError) {
        self.stats.encode_errors += 1;
        warn!(kind, code = err.code(), error = %err, "reply cannot be framed; writing an error in its place");
    }

    fn discard(&mut self, reason: &str) {
        let discarded = self.receiver.discard_remaining() as u64;
        self.stats.discarded += discarded;
        if self.stats.discarded > 0 {
            warn!(discarded = self.stats.discarded, reason, "queued replies discarded");
        }
    }
}

/// 替代无法成帧条目的 `Error` 信封，让对端知道有一条回复丢失。
fn undeliverable(err: &RelayError) -> Envelope {
    Envelope::error(format!("{}: reply could not be delivered: {err}", err.code()))
}
