//! # 中继服务器
//!
//! ## 意图（Why）
//! - 每条 TCP 连接承载一个独立会话，某个会话的传输失败只记录日志，不影响监听循环与其他会话；
//! - 每条连接向 [`EngineFactory`] 申请一个新引擎，会话之间不共享回合状态。
//!
//! ## 逻辑（How）
//! - `serve` 以 `biased` 的 `select!` 依次处理：停机信号 → 已结束会话的回收 → 新连接；
//! - 会话在 [`JoinSet`] 中运行，句柄按任务 [`Id`] 登记，回收时按同一 `Id` 注销，停机时逐个取消后全部等待；
//! - `accept` 失败时短暂退避再重试，避免文件描述符耗尽时空转。
//!
//! ## 契约（What）
//! - [`RelayServer::serve`] 只在停机后返回，结果为 [`ServeReport`] 汇总；
//! - 停机后不再接受新连接，返回前所有会话均已进入 `Closed`。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spark_relay_core::error::Result;
use spark_relay_core::{
    AckHandler, Cancellation, Engine, ErrorKind, LoggingAckHandler, RelayConfig, Session,
    SessionHandle, SessionOutcome, SessionReport,
};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::listener::RelayListener;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 为每条新连接创建引擎。
pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self, peer: SocketAddr) -> Arc<dyn Engine>;
}

impl<F> EngineFactory for F
where
    F: Fn(SocketAddr) -> Arc<dyn Engine> + Send + Sync + 'static,
{
    fn create(&self, peer: SocketAddr) -> Arc<dyn Engine> {
        self(peer)
    }
}

/// `serve` 结束时的汇总。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ServeReport {
    pub accepted: u64,
    pub accept_errors: u64,
    pub clean: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl ServeReport {
    fn record(&mut self, joined: std::result::Result<(Id, SessionReport), JoinError>) {
        match joined {
            Ok((_, report)) => match &report.outcome {
                SessionOutcome::Clean => self.clean += 1,
                SessionOutcome::Cancelled => self.cancelled += 1,
                SessionOutcome::Failed(_) => self.failed += 1,
            },
            Err(_) => self.failed += 1,
        }
    }
}

/// TCP 中继服务器。
pub struct RelayServer {
    listener: RelayListener,
    relay: RelayConfig,
    factory: Arc<dyn EngineFactory>,
    ack_handler: Arc<dyn AckHandler>,
    shutdown: Cancellation,
}

impl RelayServer {
    /// 按配置绑定监听地址。
    pub async fn bind(config: &ServerConfig, factory: impl EngineFactory) -> Result<Self> {
        config.relay.validate()?;
        let listener = RelayListener::bind(config.bind, config.socket.clone()).await?;
        Ok(Self::from_listener(listener, config.relay.clone(), factory))
    }

    pub fn from_listener(
        listener: RelayListener,
        relay: RelayConfig,
        factory: impl EngineFactory,
    ) -> Self {
        Self {
            listener,
            relay,
            factory: Arc::new(factory),
            ack_handler: Arc::new(LoggingAckHandler),
            shutdown: Cancellation::new(),
        }
    }

    /// 所有会话共享的确认处理器。
    pub fn with_ack_handler(mut self, handler: Arc<dyn AckHandler>) -> Self {
        self.ack_handler = handler;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// 停机信号；对其调用 `cancel` 即触发优雅停机。
    pub fn shutdown_handle(&self) -> Cancellation {
        self.shutdown.clone()
    }

    /// 运行接受循环直至停机。
    pub async fn serve(self) -> ServeReport {
        let span = info_span!("relay.server", local_addr = %self.listener.local_addr());
        self.serve_in_span().instrument(span).await
    }

    async fn serve_in_span(self) -> ServeReport {
        let mut report = ServeReport::default();
        let mut sessions = JoinSet::new();
        let mut registry = SessionRegistry::default();
        info!("relay server accepting connections");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = sessions.join_next_with_id() => {
                    registry.forget(&joined);
                    report.record(joined);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(channel) => {
                        report.accepted += 1;
                        let peer = channel.peer_addr();
                        let session = Session::new(self.factory.create(peer), self.relay.clone())
                            .with_peer(peer.to_string())
                            .with_ack_handler(Arc::clone(&self.ack_handler));
                        let handle = session.handle();
                        let (reader, writer) = channel.into_split(self.relay.codec());
                        let task = sessions.spawn(
                            async move {
                                let report = session.run(reader, writer).await;
                                log_outcome(&report);
                                report
                            }
                            .in_current_span(),
                        );
                        registry.register(task.id(), handle);
                        debug!(%peer, active = registry.len(), "connection accepted");
                    }
                    Err(err) => {
                        report.accept_errors += 1;
                        warn!(code = err.code(), error = %err, "accept failed; backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(active = registry.len(), "relay server shutting down");
        registry.cancel_all();
        while let Some(joined) = sessions.join_next_with_id().await {
            registry.forget(&joined);
            report.record(joined);
        }
        info!(
            accepted = report.accepted,
            clean = report.clean,
            cancelled = report.cancelled,
            failed = report.failed,
            "relay server stopped"
        );
        report
    }
}

/// 运行中会话的句柄表，按会话任务的 [`Id`] 登记。
#[derive(Debug, Default)]
struct SessionRegistry {
    handles: HashMap<Id, SessionHandle>,
}

impl SessionRegistry {
    fn register(&mut self, task: Id, handle: SessionHandle) {
        self.handles.insert(task, handle);
    }

    /// 注销已结束任务的句柄；任务 panic 时会话未必到达 `Closed`，因此按任务 `Id` 精确移除。
    fn forget(&mut self, joined: &std::result::Result<(Id, SessionReport), JoinError>) {
        let task = match joined {
            Ok((task, _)) => *task,
            Err(err) => {
                error!(error = %err, "session task aborted");
                err.id()
            }
        };
        self.handles.remove(&task);
    }

    fn cancel_all(&self) {
        for handle in self.handles.values() {
            handle.cancel();
        }
    }

    fn len(&self) -> usize {
        self.handles.len()
    }
}

fn log_outcome(report: &SessionReport) {
    match &report.outcome {
        SessionOutcome::Failed(err) if err.kind() == ErrorKind::TransportError => error!(
            code = err.code(),
            error = %err,
            discarded = report.discarded(),
            "session ended by transport failure"
        ),
        SessionOutcome::Failed(err) => error!(code = err.code(), error = %err, "session failed"),
        SessionOutcome::Cancelled => info!(discarded = report.discarded(), "session cancelled"),
        SessionOutcome::Clean => debug!("session finished"),
    }
}
