#![doc = r#"
# spark-relay-core

## 设计动机（Why）
- **定位**：把一个“一次处理一条活动、随时可能异步发出回复”的回合制会话引擎，桥接到一条
  双向流式连接上，使引擎与远端对端互不阻塞各自的收发节奏。
- **架构角色**：本 crate 提供与具体传输无关的全部中继语义：信封协议、回复队列、回合适配器、
  入站/出站泵与会话编排；TCP 等具体传输由 `spark-relay-tcp` 提供。

## 核心契约（What）
- **信封**：线上单元为 `{"Kind", "Body"}`，`Kind` 决定 `Body` 的解析方式，未知 `Kind` 记录后丢弃；
- **单写者**：只有出站泵持有写端，写出顺序即回复入队顺序；
- **错误隔离**：解码错误只丢弃一个信封，引擎错误以 `Error` 信封告知对端，传输错误终结所在会话；
- **关闭**：入站结束即关闭回复队列，出站泵排空后关闭写端；取消则立即唤醒两泵并丢弃剩余回复。

## 实现策略（How）
- 两泵各自运行在独立的 Tokio 任务中，通过无界 `mpsc` 回复队列与会话级取消令牌协作；
- 所有日志经 `tracing` 输出，每个会话一个 `relay.session` span。

## 模块导览
- [`envelope`] / [`codec`]：信封与换行分帧；
- [`transport`]：读写端契约及行分帧、内存实现；
- [`reply_sink`]、[`adapter`]、[`handler`]：回复队列、回合适配器与分派辅助；
- [`pump`]、[`session`]：两泵与会话生命周期；
- [`client`]：对称的客户端实现；
- [`config`]、[`error`]：配置与错误域。
"#]

pub mod ack;
pub mod activity;
pub mod adapter;
pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod pump;
pub mod reply_sink;
pub mod session;
pub mod transport;

pub use ack::{Ack, AckHandler, LoggingAckHandler};
pub use activity::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, ResourceResponse,
};
pub use adapter::{Engine, TurnAdapter, TurnContext};
pub use cancel::Cancellation;
pub use client::{ClientEvent, ClientOptions, RelayClient};
pub use codec::{DEFAULT_MAX_FRAME_BYTES, FrameCodec};
pub use config::RelayConfig;
pub use envelope::{Envelope, Kind, Payload};
pub use error::{EngineError, ErrorKind, RelayError, Result};
pub use handler::{ActivityHandler, Dispatcher};
pub use pump::{InboundStats, OutboundStats};
pub use reply_sink::{OutboundItem, ReplyReceiver, ReplySink, reply_sink};
pub use session::{
    Session, SessionHandle, SessionId, SessionOutcome, SessionReport, SessionState, run_session,
};
pub use transport::{EnvelopeReader, EnvelopeWriter};
