//! # 中继客户端
//!
//! ## 意图（Why）
//! - 为对端（控制台、测试或其他宿主）提供与会话对称的最小实现：一个写任务独占写端，
//!   一个读任务接收回复，并对每条收到的活动自动回送确认；
//!
//! ## 契约（What）
//! - 发送与确认共用同一条出站队列，写出顺序即入队顺序；
//! - 每条收到的 `Activity` 恰好回送一条 `RequestResponse`，`activityId` 取自该活动的 `id`；
//! - [`RelayClient::close`] 结束写方向并等待服务端关闭其写方向后返回。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::ack::Ack;
use crate::activity::{Activity, ChannelAccount, ConversationAccount};
use crate::envelope::{Envelope, Payload};
use crate::error::{ErrorKind, RelayError, Result};
use crate::transport::{EnvelopeReader, EnvelopeWriter};

/// 客户端收到的事件。
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Activity(Activity),
    /// 服务端发来的 `Error` 信封文本。
    Error(String),
}

/// 客户端发送消息时使用的身份。
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub user: ChannelAccount,
    pub conversation: ConversationAccount,
    pub channel_id: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user: ChannelAccount::new("user").with_name("User"),
            conversation: ConversationAccount::new("conversation"),
            channel_id: "stream".to_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct OutgoingQueue {
    sender: ArcSwapOption<mpsc::UnboundedSender<Envelope>>,
}

impl OutgoingQueue {
    fn push(&self, envelope: Envelope) -> Result<()> {
        let guard = self.sender.load();
        let sender = guard.as_ref().ok_or(RelayError::Closed)?;
        sender.send(envelope).map_err(|_| RelayError::Closed)
    }

    fn close(&self) {
        self.sender.swap(None);
    }
}

/// 中继客户端。
pub struct RelayClient {
    options: ClientOptions,
    outgoing: Arc<OutgoingQueue>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    writer_task: JoinHandle<Result<()>>,
    reader_task: JoinHandle<Result<()>>,
}

impl RelayClient {
    /// 在给定读写端上启动客户端的读写任务。
    pub fn start<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: EnvelopeReader + 'static,
        W: EnvelopeWriter + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let outgoing = Arc::new(OutgoingQueue {
            sender: ArcSwapOption::from_pointee(tx),
        });
        let (events_tx, events) = mpsc::unbounded_channel();

        let span = info_span!("relay.client", conversation = %options.conversation.id);
        let writer_task = tokio::spawn(write_loop(writer, rx).instrument(span.clone()));
        let reader_task = tokio::spawn(
            read_loop(reader, Arc::clone(&outgoing), events_tx).instrument(span),
        );

        Self {
            options,
            outgoing,
            events,
            writer_task,
            reader_task,
        }
    }

    /// 发送一条活动，会补齐缺失的发送方、会话与渠道。
    pub fn send_activity(&self, mut activity: Activity) -> Result<()> {
        if activity.from.is_none() {
            activity.from = Some(self.options.user.clone());
        }
        if activity.conversation.is_none() {
            activity.conversation = Some(self.options.conversation.clone());
        }
        if activity.channel_id.is_none() {
            activity.channel_id = Some(self.options.channel_id.clone());
        }
        self.outgoing.push(Envelope::activity(&activity)?)
    }

    /// 发送纯文本消息。
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_activity(Activity::message(text))
    }

    /// 等待下一个事件；服务端关闭写方向后返回 `None`。
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// 结束写方向，等待服务端结束，返回首个传输错误。
    pub async fn close(self) -> Result<()> {
        self.outgoing.close();
        let written = join("writer", self.writer_task).await;
        let read = join("reader", self.reader_task).await;
        written.and(read)
    }

    /// 立即中止两个任务，不等待对端。
    pub fn abort(self) {
        self.outgoing.close();
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

async fn join(task: &'static str, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .await
        .map_err(|err| RelayError::internal(format!("client {task} task failed: {err}")))?
}

async fn write_loop<W: EnvelopeWriter>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
) -> Result<()> {
    while let Some(envelope) = queue.recv().await {
        match writer.write(envelope).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::DecodeError => {
                warn!(error = %err, "dropping envelope that cannot be framed");
            }
            Err(err) => return Err(err),
        }
    }
    debug!("client send queue closed; closing writer");
    writer.close().await
}

async fn read_loop<R: EnvelopeReader>(
    mut reader: R,
    outgoing: Arc<OutgoingQueue>,
    events: mpsc::UnboundedSender<ClientEvent>,
) -> Result<()> {
    let next_delivery = AtomicU64::new(1);
    loop {
        let envelope = match reader.next().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                info!("server finished sending");
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::DecodeError => {
                warn!(code = err.code(), error = %err, "dropping malformed envelope");
                continue;
            }
            Err(err) => {
                outgoing.close();
                return Err(err);
            }
        };

        let payload = match envelope.decode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(code = err.code(), error = %err, "dropping malformed envelope");
                continue;
            }
        };

        let event = match payload {
            Payload::Activity(activity) => {
                let delivery = next_delivery.fetch_add(1, Ordering::Relaxed).to_string();
                let mut ack = Ack::new(delivery);
                ack.activity_id = activity.id.clone();
                if let Err(err) = Envelope::ack(&ack).and_then(|env| outgoing.push(env)) {
                    debug!(error = %err, "ack not sent; send queue already closed");
                }
                ClientEvent::Activity(activity)
            }
            Payload::Error(text) => ClientEvent::Error(text),
            Payload::Ack(ack) => {
                debug!(delivery_id = %ack.id, "server acknowledged a delivery");
                continue;
            }
            Payload::Unrecognized { kind, .. } => {
                info!(kind = %kind, "unrecognized envelope kind; ignoring");
                continue;
            }
        };
        // 接收方已放弃事件流时继续排空，保证确认照常发送。
        let _ = events.send(event);
    }
}
