//! # 投递确认（Ack）
//!
//! ## 角色定位（Why）
//! - 对端收到一条活动后回送 `RequestResponse` 信封，携带它为该活动分配的投递 id；
//! - 当前会话只记录确认，不把投递 id 回送给等待中的引擎调用；[`AckHandler`] 是未来实现
//!   “按关联 id 路由回发送方”的接缝。
//!
//! ## 契约（What）
//! - 线上形态为 `{"id": "...", "activityId": "..."}`，`activityId` 可缺省；
//! - 每条已投递活动至多一条确认，多条确认可以指向同一会话。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::session::SessionId;

/// 对端回送的投递确认。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// 对端分配的投递 id。
    pub id: String,
    /// 被确认活动的关联 id（即中继推送时写入的 `Activity::id`）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Ack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity_id: None,
            extensions: Map::new(),
        }
    }

    /// 绑定被确认活动的关联 id。
    pub fn for_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }
}

/// 确认处理接缝。
///
/// # 教案式说明
/// - **意图 (Why)**：入站泵不关心确认的去向，只把它交给会话配置的处理器；
/// - **契约 (What)**：`on_ack` 在入站泵任务内同步调用，实现不得阻塞；
///   需要异步处理时应自行转发到队列；
/// - **风险 (Trade-offs)**：默认实现 [`LoggingAckHandler`] 仅记录日志，引擎通过
///   `send_activities` 拿到的仍是中继合成的关联 id。
pub trait AckHandler: Send + Sync {
    fn on_ack(&self, session: &SessionId, ack: &Ack);
}

/// 只记录日志的确认处理器。
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingAckHandler;

impl AckHandler for LoggingAckHandler {
    fn on_ack(&self, session: &SessionId, ack: &Ack) {
        info!(
            session_id = %session,
            delivery_id = %ack.id,
            activity_id = ack.activity_id.as_deref().unwrap_or("-"),
            "ack received; delivery id is not routed back to the engine"
        );
    }
}
