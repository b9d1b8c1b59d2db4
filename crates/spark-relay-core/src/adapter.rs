//! # 回合适配器（Turn Adapter）
//!
//! ## 意图（Why）
//! - 引擎只认识“处理一条活动、通过上下文发送回复”的回合模型，不关心回复最终写到哪条流；
//! - 适配器把引擎的“发送活动”调用翻译为回复队列推送，并把引擎的失败、panic 与超时统一收敛为
//!   [`RelayError::Engine`]，由入站泵转成 `Error` 信封。
//!
//! ## 契约（What）
//! - [`TurnAdapter::process_activity`] 在引擎回合 Future 完成时返回；引擎可以克隆 [`TurnContext`]
//!   并在回合结束后继续推送，只要会话的回复队列尚未关闭；
//! - 同一回合内的推送顺序即写出顺序；
//! - 未携带 `id` 的活动在入队前被分配会话内唯一的关联 id `"<session>-<seq>"`，该 id 同时作为
//!   [`ResourceResponse`] 返回给引擎；
//! - `update_activity` / `delete_activity` 不被流式通道支持，立即返回 `UnsupportedOperation`。
//!
//! ## 风险（Trade-offs）
//! - 对端真正分配的投递 id 以确认形式异步到达，当前不回传给引擎，见 [`crate::ack::AckHandler`]。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::debug;

use crate::activity::{Activity, ResourceResponse};
use crate::cancel::Cancellation;
use crate::error::{EngineError, RelayError, Result, codes};
use crate::reply_sink::{OutboundItem, ReplySink};
use crate::session::SessionId;

/// 回合制会话引擎。
///
/// 实现方每次收到一条活动，通过 [`TurnContext`] 发出零到多条回复。
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError>;
}

#[async_trait]
impl<E: Engine + ?Sized> Engine for Arc<E> {
    async fn on_turn(&self, turn: TurnContext) -> std::result::Result<(), EngineError> {
        (**self).on_turn(turn).await
    }
}

/// 一次回合的上下文，可克隆并在回合结束后继续使用。
#[derive(Clone, Debug)]
pub struct TurnContext {
    activity: Arc<Activity>,
    adapter: TurnAdapter,
}

impl TurnContext {
    /// 触发本回合的入站活动。
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn session_id(&self) -> &SessionId {
        &self.adapter.session_id
    }

    /// 发送一条活动。
    pub fn send_activity(&self, activity: Activity) -> Result<ResourceResponse> {
        self.adapter.enqueue(activity)
    }

    /// 按顺序发送多条活动，每条返回一个 [`ResourceResponse`]。
    ///
    /// 队列在中途关闭时返回 `Closed`，此前已入队的活动仍会写出。
    pub fn send_activities(&self, activities: Vec<Activity>) -> Result<Vec<ResourceResponse>> {
        activities
            .into_iter()
            .map(|activity| self.adapter.enqueue(activity))
            .collect()
    }

    /// 以纯文本回复触发本回合的活动。
    pub fn send_text(&self, text: impl Into<String>) -> Result<ResourceResponse> {
        self.send_activity(self.activity.create_reply(text))
    }

    pub fn update_activity(&self, _activity: Activity) -> Result<ResourceResponse> {
        Err(RelayError::Unsupported {
            operation: "update_activity",
        })
    }

    pub fn delete_activity(&self, _activity_id: &str) -> Result<()> {
        Err(RelayError::Unsupported {
            operation: "delete_activity",
        })
    }
}

/// 面向引擎的会话级适配器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 每个会话一个适配器，持有回复队列的生产端与关联 id 计数器；
///
/// ## 逻辑 (How)
/// - 回合以 `catch_unwind` 包裹，panic 被转换为 `relay.engine.panicked`；
/// - 配置了回合超时时以 `tokio::time::timeout` 约束，超时返回 `relay.engine.timeout`；
/// - 与会话取消 `select!`，取消后立即放弃回合并返回 `relay.engine.cancelled`。
///
/// ## 契约 (What)
/// - 克隆共享同一计数器与队列；
/// - 返回的错误分类总是 `EngineError`，不会终结会话。
#[derive(Clone, Debug)]
pub struct TurnAdapter {
    session_id: SessionId,
    sink: ReplySink,
    next_seq: Arc<AtomicU64>,
    turn_timeout: Option<Duration>,
    cancellation: Cancellation,
}

impl TurnAdapter {
    pub fn new(
        session_id: SessionId,
        sink: ReplySink,
        turn_timeout: Option<Duration>,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            session_id,
            sink,
            next_seq: Arc::new(AtomicU64::new(1)),
            turn_timeout,
            cancellation,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// 以给定活动驱动引擎执行一个回合。
    pub async fn process_activity(&self, engine: &dyn Engine, activity: Activity) -> Result<()> {
        let context = TurnContext {
            activity: Arc::new(activity),
            adapter: self.clone(),
        };
        let turn = AssertUnwindSafe(engine.on_turn(context)).catch_unwind();
        let bounded = async {
            match self.turn_timeout {
                Some(limit) => tokio::time::timeout(limit, turn).await.map_err(|_| {
                    RelayError::engine(
                        codes::ENGINE_TIMEOUT,
                        format!("turn exceeded {} ms", limit.as_millis()),
                    )
                }),
                None => Ok(turn.await),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                return Err(RelayError::engine(codes::ENGINE_CANCELLED, "session cancelled during turn"));
            }
            outcome = bounded => outcome?,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(RelayError::engine(codes::ENGINE_FAILED, err.message())),
            Err(panic) => Err(RelayError::engine(
                codes::ENGINE_PANICKED,
                format!("engine panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }

    fn enqueue(&self, mut activity: Activity) -> Result<ResourceResponse> {
        let id = match &activity.id {
            Some(id) => id.clone(),
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let id = format!("{}-{}", self.session_id, seq);
                activity.id = Some(id.clone());
                id
            }
        };
        self.sink.push(OutboundItem::Activity(activity))?;
        debug!(session_id = %self.session_id, activity_id = %id, "reply enqueued");
        Ok(ResourceResponse::new(id))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
