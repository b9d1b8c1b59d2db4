//! # 会话（Session）
//!
//! ## 角色定位（Why）
//! - 会话是一条连接上全部中继资源的聚合根：一个回复队列、一个适配器、一个入站泵、一个出站泵；
//! - 它负责两泵的生命周期编排与关闭协调，并在结束时给出一份汇总报告。
//!
//! ## 生命周期（How）
//! ```text
//! Starting ──► Running ──► Draining ──► Closed
//!     └──────────────────────────────────▲
//! ```
//! - 两泵启动后进入 `Running`；任一泵退出即进入 `Draining`；
//! - 先退出的一方若携带错误，立即触发会话取消以唤醒另一方；
//!   否则等待另一方排空后自行退出；配置了 `drain_timeout` 时超时同样触发取消；
//! - 两泵均已回收后进入 `Closed`，并返回 [`SessionReport`]。
//!
//! ## 契约（What）
//! - 会话之间不共享任何可变状态，一个会话的失败不会影响其他会话；
//! - 状态变化通过 `tokio::sync::watch` 发布，外部经 [`SessionHandle`] 观察或取消。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::ack::{AckHandler, LoggingAckHandler};
use crate::adapter::{Engine, TurnAdapter};
use crate::cancel::Cancellation;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::pump::{InboundPump, InboundStats, OutboundPump, OutboundStats, PumpExit};
use crate::reply_sink::reply_sink;
use crate::transport::{EnvelopeReader, EnvelopeWriter};

/// 会话标识。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// 生成进程内唯一的标识（`s1`、`s2`……）。
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self::new(format!("s{}", NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 会话状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Starting,
    Running,
    Draining,
    Closed,
}

impl SessionState {
    /// 判断状态是否允许跃迁至 `target`。
    pub fn can_transition_to(self, target: SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Starting, SessionState::Running)
                | (SessionState::Starting, SessionState::Closed)
                | (SessionState::Running, SessionState::Draining)
                | (SessionState::Draining, SessionState::Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// 会话的最终结果。
#[derive(Debug)]
pub enum SessionOutcome {
    /// 对端正常结束且全部回复已写出。
    Clean,
    /// 会话被取消（外部请求或排空超时），未发生错误。
    Cancelled,
    /// 首个导致会话结束的错误。
    Failed(RelayError),
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, SessionOutcome::Clean)
    }

    pub fn error(&self) -> Option<&RelayError> {
        match self {
            SessionOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// 会话结束时的汇总报告。
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub outcome: SessionOutcome,
    pub inbound: InboundStats,
    pub outbound: OutboundStats,
    /// 会话结束时仍滞留在回复队列中的条目数。
    pub pending_replies: usize,
}

impl SessionReport {
    /// 未能写出的回复数。
    pub fn discarded(&self) -> u64 {
        self.outbound.discarded
    }
}

/// 会话的外部句柄：观察状态、请求取消。
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    cancellation: Cancellation,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 请求取消；已取消时返回 `false`。
    pub fn cancel(&self) -> bool {
        self.cancellation.cancel()
    }

    /// 等待会话进入 `Closed`。
    pub async fn closed(&mut self) {
        // 发送端随会话一起释放，此时状态必然已是 `Closed`。
        let _ = self.state.wait_for(|state| state.is_terminal()).await;
    }

    /// 订阅状态变化。
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// 单条连接上的中继会话。
pub struct Session {
    id: SessionId,
    peer: Option<String>,
    config: RelayConfig,
    engine: Arc<dyn Engine>,
    ack_handler: Arc<dyn AckHandler>,
    cancellation: Cancellation,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(engine: Arc<dyn Engine>, config: RelayConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        Self {
            id: SessionId::generate(),
            peer: None,
            config,
            engine,
            ack_handler: Arc::new(LoggingAckHandler),
            cancellation: Cancellation::new(),
            state,
        }
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    /// 记录对端描述（通常是远端地址），写入会话 span。
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn with_ack_handler(mut self, handler: Arc<dyn AckHandler>) -> Self {
        self.ack_handler = handler;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            cancellation: self.cancellation.clone(),
            state: self.state.subscribe(),
        }
    }

    /// 在给定读写端上运行会话直至结束。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：两泵以 `tokio::spawn` 独立运行并继承 `relay.session` span；
    ///   `select!` 等待先退出的一方，再按 [`Session::drain`] 回收另一方；
    /// - **契约 (What)**：本函数不会返回 `Err`，所有失败都体现在 [`SessionReport::outcome`]；
    ///   返回时状态已是 `Closed`，回复队列已关闭。
    pub async fn run<R, W>(self, reader: R, writer: W) -> SessionReport
    where
        R: EnvelopeReader + 'static,
        W: EnvelopeWriter + 'static,
    {
        let span = info_span!(
            "relay.session",
            session_id = %self.id,
            peer = self.peer.as_deref().unwrap_or("-"),
        );
        self.run_in_span(reader, writer).instrument(span).await
    }

    async fn run_in_span<R, W>(self, reader: R, writer: W) -> SessionReport
    where
        R: EnvelopeReader + 'static,
        W: EnvelopeWriter + 'static,
    {
        if self.cancellation.is_cancelled() {
            self.transition(SessionState::Closed);
            info!("session cancelled before start");
            return SessionReport {
                session_id: self.id,
                outcome: SessionOutcome::Cancelled,
                inbound: InboundStats::default(),
                outbound: OutboundStats::default(),
                pending_replies: 0,
            };
        }

        let (sink, receiver) = reply_sink(self.config.reply_queue_warn_depth);
        let adapter = TurnAdapter::new(
            self.id.clone(),
            sink.clone(),
            self.config.turn_timeout(),
            self.cancellation.clone(),
        );

        let inbound = InboundPump::new(
            reader,
            Arc::clone(&self.engine),
            adapter,
            Arc::clone(&self.ack_handler),
            sink.clone(),
            self.cancellation.clone(),
        );
        let outbound = OutboundPump::new(writer, receiver, self.cancellation.clone());

        let mut inbound = tokio::spawn(inbound.run().in_current_span());
        let mut outbound = tokio::spawn(outbound.run().in_current_span());
        self.transition(SessionState::Running);
        info!("session running");

        let (inbound_exit, outbound_exit, inbound_first) = tokio::select! {
            joined = &mut inbound => {
                let inbound_exit = flatten_join("inbound", joined);
                self.transition(SessionState::Draining);
                self.cancel_on_error(&inbound_exit);
                let outbound_exit = flatten_join("outbound", self.drain(&mut outbound).await);
                (inbound_exit, outbound_exit, true)
            }
            joined = &mut outbound => {
                let outbound_exit = flatten_join("outbound", joined);
                self.transition(SessionState::Draining);
                self.cancel_on_error(&outbound_exit);
                let inbound_exit = flatten_join("inbound", self.drain(&mut inbound).await);
                (inbound_exit, outbound_exit, false)
            }
        };

        // 出站泵以错误退出时队列可能仍然开放，此处保证关闭后不再接受推送。
        sink.close();
        let pending_replies = sink.depth();

        let (first, second) = if inbound_first {
            (inbound_exit.result, outbound_exit.result)
        } else {
            (outbound_exit.result, inbound_exit.result)
        };
        let outcome = match (first, second) {
            (Err(err), _) | (Ok(()), Err(err)) => SessionOutcome::Failed(err),
            (Ok(()), Ok(())) if self.cancellation.is_cancelled() => SessionOutcome::Cancelled,
            (Ok(()), Ok(())) => SessionOutcome::Clean,
        };

        self.transition(SessionState::Closed);
        match &outcome {
            SessionOutcome::Failed(err) => warn!(code = err.code(), error = %err, "session failed"),
            SessionOutcome::Cancelled => info!("session cancelled"),
            SessionOutcome::Clean => info!("session closed cleanly"),
        }

        SessionReport {
            session_id: self.id,
            outcome,
            inbound: inbound_exit.stats,
            outbound: outbound_exit.stats,
            pending_replies,
        }
    }

    /// 先退出的泵携带错误时立即取消，唤醒仍阻塞的另一方。
    fn cancel_on_error<S>(&self, exit: &PumpExit<S>) {
        if exit.result.is_err() {
            self.cancellation.cancel();
        }
    }

    /// 等待另一方退出；配置了排空时限时，超时则取消会话后继续等待。
    async fn drain<T>(&self, handle: &mut JoinHandle<T>) -> std::result::Result<T, JoinError> {
        let Some(limit) = self.config.drain_timeout() else {
            return handle.await;
        };
        match tokio::time::timeout(limit, &mut *handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    drain_timeout_ms = limit.as_millis() as u64,
                    "drain timed out; cancelling session"
                );
                self.cancellation.cancel();
                handle.await
            }
        }
    }

    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            let from = *current;
            if from.can_transition_to(next) {
                debug!(?from, to = ?next, "session state changed");
                *current = next;
                true
            } else {
                warn!(?from, to = ?next, "illegal session state transition ignored");
                false
            }
        });
    }
}

fn flatten_join<S: Default>(
    pump: &'static str,
    joined: std::result::Result<PumpExit<S>, JoinError>,
) -> PumpExit<S> {
    joined.unwrap_or_else(|err| PumpExit {
        stats: S::default(),
        result: Err(RelayError::internal(format!("{pump} pump task failed: {err}"))),
    })
}

/// 便捷入口：以默认配置运行一个会话。
pub async fn run_session<R, W>(engine: Arc<dyn Engine>, reader: R, writer: W) -> SessionReport
where
    R: EnvelopeReader + 'static,
    W: EnvelopeWriter + 'static,
{
    Session::new(engine, RelayConfig::default())
        .run(reader, writer)
        .await
}
