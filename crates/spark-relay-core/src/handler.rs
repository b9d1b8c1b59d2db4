//! 按活动类型分派的引擎辅助。
//!
//! [`ActivityHandler`] 为每种活动类型提供一个默认空实现的回调，实现方只覆写关心的类型；
//! [`Dispatcher`] 把它包装成 [`Engine`]，对 [`ActivityType`] 做一次 `match`。

use async_trait::async_trait;
use tracing::debug;

use crate::activity::{ActivityType, ChannelAccount};
use crate::adapter::{Engine, TurnContext};
use crate::error::EngineError;

type HandlerResult = std::result::Result<(), EngineError>;

/// 分类型的活动回调。
#[async_trait]
pub trait ActivityHandler: Send + Sync + 'static {
    async fn on_message(&self, _turn: &TurnContext) -> HandlerResult {
        Ok(())
    }

    async fn on_event(&self, _turn: &TurnContext) -> HandlerResult {
        Ok(())
    }

    /// 默认在存在新增成员时转到 [`ActivityHandler::on_members_added`]。
    async fn on_conversation_update(&self, turn: &TurnContext) -> HandlerResult {
        let members = &turn.activity().members_added;
        if members.is_empty() {
            return Ok(());
        }
        self.on_members_added(members, turn).await
    }

    async fn on_members_added(
        &self,
        _members: &[ChannelAccount],
        _turn: &TurnContext,
    ) -> HandlerResult {
        Ok(())
    }

    /// 其余类型（`typing`、`endOfConversation` 与未知字符串）。
    async fn on_unrecognized(&self, turn: &TurnContext) -> HandlerResult {
        debug!(
            session_id = %turn.session_id(),
            activity_type = %turn.activity().activity_type,
            "activity type has no handler; ignoring"
        );
        Ok(())
    }
}

/// 将 [`ActivityHandler`] 适配为 [`Engine`]。
#[derive(Debug, Default)]
pub struct Dispatcher<H> {
    handler: H,
}

impl<H: ActivityHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: ActivityHandler> Engine for Dispatcher<H> {
    async fn on_turn(&self, turn: TurnContext) -> HandlerResult {
        match turn.activity().activity_type {
            ActivityType::Message => self.handler.on_message(&turn).await,
            ActivityType::Event => self.handler.on_event(&turn).await,
            ActivityType::ConversationUpdate => self.handler.on_conversation_update(&turn).await,
            ActivityType::Typing | ActivityType::EndOfConversation | ActivityType::Other(_) => {
                self.handler.on_unrecognized(&turn).await
            }
        }
    }
}
