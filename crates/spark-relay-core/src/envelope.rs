//! # 信封协议（Envelope）
//!
//! ## 设计动机（Why）
//! - 一条有序字节流上需要同时承载活动、投递确认与错误文本，信封以 `(Kind, Body)` 二元组完成多路复用；
//! - `Kind` 完全决定 `Body` 的解析方式，中继无需理解它转发的活动内部字段。
//!
//! ## 核心契约（What）
//! - 线上形态：`{"Kind": "...", "Body": "..."}`，`Body` 为负载的 JSON 文本（错误信封为纯文本）；
//! - 已知 `Kind`：`"Activity"`、`"RequestResponse"`（确认）、`"Error"`；
//! - 未知 `Kind` 解码为 [`Payload::Unrecognized`]，属于可恢复情形：由调用方记录后丢弃，绝不终结流；
//! - 往返律：对任意合法负载 `p`，`Envelope::encode(&p)?.decode()? == p`。
//!
//! ## 风险与考量（Trade-offs）
//! - `Body` 采用“JSON 套 JSON”的字符串形态以保持与既有对端的线上兼容，代价是一次额外的转义；
//! - `Unrecognized` 负载若携带已知 `Kind` 会破坏往返律，因此编码时直接拒绝。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ack::Ack;
use crate::activity::Activity;
use crate::error::{RelayError, Result, codes};

/// 线上 `Kind` 字符串常量。
pub mod wire {
    pub const ACTIVITY: &str = "Activity";
    pub const ACK: &str = "RequestResponse";
    pub const ERROR: &str = "Error";
}

/// 信封类型。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Activity,
    Ack,
    Error,
    /// 未识别的类型，保留原始字符串用于日志。
    Unrecognized(String),
}

impl Kind {
    /// 解析线上字符串，未知值不会失败。
    pub fn parse(raw: &str) -> Kind {
        match raw {
            wire::ACTIVITY => Kind::Activity,
            wire::ACK => Kind::Ack,
            wire::ERROR => Kind::Error,
            other => Kind::Unrecognized(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Kind::Activity => wire::ACTIVITY,
            Kind::Ack => wire::ACK,
            Kind::Error => wire::ERROR,
            Kind::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 信封解码后的负载。
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Activity(Activity),
    Ack(Ack),
    /// 诊断文本。
    Error(String),
    /// 未识别的信封，原样保留。
    Unrecognized { kind: String, body: String },
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Activity(_) => Kind::Activity,
            Payload::Ack(_) => Kind::Ack,
            Payload::Error(_) => Kind::Error,
            Payload::Unrecognized { kind, .. } => Kind::Unrecognized(kind.clone()),
        }
    }
}

/// 线上传输单元。
///
/// # 教案式说明
/// - **意图 (Why)**：作为传输层读写的唯一类型，泵与传输实现之间只交换信封；
/// - **契约 (What)**：`kind` 保留原始字符串，通过 [`Envelope::kind`] 获得解析后的 [`Kind`]；
///   缺失 `Body` 的帧解析为空字符串，由 `decode` 决定是否合法；
/// - **风险 (Trade-offs)**：字段名使用 PascalCase（`Kind`/`Body`），与对端既有实现保持一致，
///   不要改为 serde 默认命名。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Kind")]
    pub kind: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

impl Envelope {
    /// 以原始类型与正文构造信封，不做任何校验。
    pub fn new(kind: Kind, body: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_owned(),
            body: body.into(),
        }
    }

    /// 解析后的信封类型。
    pub fn kind(&self) -> Kind {
        Kind::parse(&self.kind)
    }

    /// 将负载编码为信封。
    ///
    /// - 活动与确认以 JSON 文本写入 `Body`；错误信封写入纯文本；
    /// - `Unrecognized` 负载若携带已知类型则返回 [`RelayError::Encode`]。
    pub fn encode(payload: &Payload) -> Result<Envelope> {
        match payload {
            Payload::Activity(activity) => Ok(Envelope::new(Kind::Activity, to_json(activity)?)),
            Payload::Ack(ack) => Ok(Envelope::new(Kind::Ack, to_json(ack)?)),
            Payload::Error(text) => Ok(Envelope::new(Kind::Error, text.clone())),
            Payload::Unrecognized { kind, body } => {
                if !matches!(Kind::parse(kind), Kind::Unrecognized(_)) {
                    return Err(RelayError::Encode {
                        detail: format!("`{kind}` is a known kind and cannot be sent unrecognized"),
                    });
                }
                Ok(Envelope {
                    kind: kind.clone(),
                    body: body.clone(),
                })
            }
        }
    }

    /// 按 `Kind` 解码正文。
    ///
    /// 未知类型返回 `Ok(Payload::Unrecognized)`；已知类型正文非法时返回 `DecodeError`。
    pub fn decode(&self) -> Result<Payload> {
        match self.kind() {
            Kind::Activity => serde_json::from_str(&self.body)
                .map(Payload::Activity)
                .map_err(|err| body_error(wire::ACTIVITY, err)),
            Kind::Ack => serde_json::from_str(&self.body)
                .map(Payload::Ack)
                .map_err(|err| body_error(wire::ACK, err)),
            Kind::Error => Ok(Payload::Error(self.body.clone())),
            Kind::Unrecognized(kind) => Ok(Payload::Unrecognized {
                kind,
                body: self.body.clone(),
            }),
        }
    }

    pub fn activity(activity: &Activity) -> Result<Envelope> {
        Ok(Envelope::new(Kind::Activity, to_json(activity)?))
    }

    pub fn ack(ack: &Ack) -> Result<Envelope> {
        Ok(Envelope::new(Kind::Ack, to_json(ack)?))
    }

    pub fn error(text: impl Into<String>) -> Envelope {
        Envelope::new(Kind::Error, text)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| RelayError::Encode {
        detail: err.to_string(),
    })
}

fn body_error(kind: &str, err: serde_json::Error) -> RelayError {
    RelayError::decode(
        codes::DECODE_BODY,
        format!("`{kind}` envelope body is not valid: {err}"),
    )
}
