//! # 活动模型（Activity）
//!
//! ## 核心意图（Why）
//! - 描述引擎与对端之间交换的最小会话单元：消息、事件、成员变更等；
//! - 中继只解释少量字段（类型、标识、文本、参与方），其余字段通过 `extensions` 原样保留，
//!   保证转发时不丢失引擎或对端私有的扩展数据。
//!
//! ## 契约（What）
//! - 线上字段名采用 camelCase，`type` 字段映射为 [`ActivityType`]；
//! - 未知类型字符串保存在 [`ActivityType::Other`] 中，序列化时原样写回；
//! - 活动一旦推入回复队列，所有权随之转移，调用方不再修改。

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 纯文本格式标记。
pub const TEXT_FORMAT_PLAIN: &str = "plain";

/// 活动类型。
///
/// # 教案式说明
/// - **意图 (Why)**：以显式枚举承载引擎按类型分派的语义，取代字符串比较；
/// - **契约 (What)**：已知类型与线上字符串一一对应，其他字符串落入 `Other` 并保持原文；
/// - **风险 (Trade-offs)**：新增已知类型需同步更新 [`ActivityType::as_str`] 与 `From<String>`，
///   否则新类型会被当作 `Other` 处理（行为仍然正确，只是无法走专用分派）。
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum ActivityType {
    /// 文本消息。
    #[default]
    Message,
    /// 命名事件，携带 `name`/`value`。
    Event,
    /// 会话成员变更。
    ConversationUpdate,
    /// 输入中提示。
    Typing,
    /// 会话结束。
    EndOfConversation,
    /// 未内建的类型，保留原始字符串。
    Other(String),
}

impl ActivityType {
    /// 线上字符串表示。
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Message => "message",
            ActivityType::Event => "event",
            ActivityType::ConversationUpdate => "conversationUpdate",
            ActivityType::Typing => "typing",
            ActivityType::EndOfConversation => "endOfConversation",
            ActivityType::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => ActivityType::Message,
            "event" => ActivityType::Event,
            "conversationUpdate" => ActivityType::ConversationUpdate,
            "typing" => ActivityType::Typing,
            "endOfConversation" => ActivityType::EndOfConversation,
            _ => ActivityType::Other(value),
        }
    }
}

impl From<&str> for ActivityType {
    fn from(value: &str) -> Self {
        ActivityType::from(value.to_owned())
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActivityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ActivityType::from)
    }
}

/// 会话参与方（用户或机器人）。
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 会话标识。
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// 一条会话活动。
///
/// # 教案式说明
/// - **意图 (Why)**：作为引擎输入与输出的统一载体，同时充当线上 `Activity` 信封的负载；
/// - **契约 (What)**：
///   - `id` 由发送方分配，用于投递确认的关联；
///   - `extensions` 收纳所有未建模字段，解码后再编码得到等价 JSON；
///   - `members_added` 为空时不写出；
/// - **风险 (Trade-offs)**：`value` 为 `Some(Value::Null)` 时序列化后再解析会得到 `None`，
///   这是 JSON 可选字段的固有歧义，引擎不应依赖二者的区别。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Activity {
    /// 构造纯文本消息。
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityType::Message,
            text: Some(text.into()),
            text_format: Some(TEXT_FORMAT_PLAIN.to_owned()),
            ..Self::default()
        }
    }

    /// 构造命名事件。
    pub fn event(name: impl Into<String>, value: Value) -> Self {
        Self {
            activity_type: ActivityType::Event,
            name: Some(name.into()),
            value: Some(value),
            ..Self::default()
        }
    }

    /// 构造成员加入通知。
    pub fn members_added(members: Vec<ChannelAccount>) -> Self {
        Self {
            activity_type: ActivityType::ConversationUpdate,
            members_added: members,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_from(mut self, from: ChannelAccount) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_recipient(mut self, recipient: ChannelAccount) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationAccount) -> Self {
        self.conversation = Some(conversation);
        self
    }

    /// 基于当前活动生成一条文本回复。
    ///
    /// - **逻辑 (How)**：交换 `from`/`recipient`，复制会话与渠道，并以当前 `id` 填充 `reply_to_id`；
    /// - **契约 (What)**：回复不携带 `id`，由适配器在推送前分配。
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        self.address_reply(Activity::message(text))
    }

    /// 将任意活动寻址为当前活动的回复，保留其已有的参与方字段。
    pub fn address_reply(&self, mut reply: Activity) -> Activity {
        if reply.from.is_none() {
            reply.from = self.recipient.clone();
        }
        if reply.recipient.is_none() {
            reply.recipient = self.from.clone();
        }
        if reply.conversation.is_none() {
            reply.conversation = self.conversation.clone();
        }
        if reply.channel_id.is_none() {
            reply.channel_id = self.channel_id.clone();
        }
        if reply.reply_to_id.is_none() {
            reply.reply_to_id = self.id.clone();
        }
        reply
    }

    /// 会话标识，缺失时为 `None`。
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }
}

/// 发送活动后得到的资源响应。
///
/// 当前的 id 是适配器合成的关联 id，而非对端分配的投递 id。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub id: String,
}

impl ResourceResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
