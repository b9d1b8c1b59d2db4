//! 回显引擎。
//!
//! - 消息：回复 `Echo: <text>`；
//! - 事件：回复事件名与值的描述；
//! - 新成员加入：对接收方以外的每位成员发送一次欢迎语。

use async_trait::async_trait;
use serde_json::Value;
use spark_relay_core::{ActivityHandler, ChannelAccount, EngineError, TurnContext};

type HandlerResult = std::result::Result<(), EngineError>;

pub const WELCOME_TEXT: &str = "Hello and welcome!";

#[derive(Clone, Copy, Debug, Default)]
pub struct EchoBot;

#[async_trait]
impl ActivityHandler for EchoBot {
    async fn on_message(&self, turn: &TurnContext) -> HandlerResult {
        let text = turn.activity().text.as_deref().unwrap_or_default();
        turn.send_text(format!("Echo: {text}"))?;
        Ok(())
    }

    async fn on_event(&self, turn: &TurnContext) -> HandlerResult {
        let activity = turn.activity();
        let name = activity.name.as_deref().unwrap_or_default();
        let value = activity.value.as_ref().map(render_value).unwrap_or_default();
        turn.send_text(format!("Event received. Name: {name}. Value: {value}"))?;
        Ok(())
    }

    async fn on_members_added(
        &self,
        members: &[ChannelAccount],
        turn: &TurnContext,
    ) -> HandlerResult {
        let recipient = turn.activity().recipient.as_ref().map(|account| account.id.as_str());
        for member in members {
            if Some(member.id.as_str()) != recipient {
                turn.send_text(WELCOME_TEXT)?;
            }
        }
        Ok(())
    }
}

/// 字符串值不加引号，其余值按紧凑 JSON 输出。
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
