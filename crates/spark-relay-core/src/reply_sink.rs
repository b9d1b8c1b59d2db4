//! # 回复队列（Reply Sink）
//!
//! ## 角色定位（Why）
//! - 引擎可能在回合内、回合结束后，甚至在独立任务里发出回复；这些推送全部汇入同一个会话级队列，
//!   再由唯一的出站泵按序写出，从而保证单写者纪律；
//! - 推送是同步、非阻塞的，引擎永远不会因为对端读得慢而被卡住。
//!
//! ## 契约（What）
//! - 多生产者、单消费者、无界；同一生产者的推送顺序即写出顺序；
//! - [`ReplySink::close`] 之后的推送返回 [`RelayError::Closed`]；消费者在取完关闭前入队的全部条目后读到结束；
//! - 队列深度超过 `warn_depth` 时记录一次 WARN，作为软性背压信号。
//!
//! ## 实现（How）
//! - 底层是 `tokio::sync::mpsc::unbounded_channel`；发送端放在 `ArcSwapOption` 中，
//!   关闭即原子地换成 `None`，正在推送的调用持有的引用释放后通道自然结束。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tracing::warn;

use crate::activity::Activity;
use crate::envelope::Envelope;
use crate::error::{RelayError, Result};

/// 出站条目。
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundItem {
    Activity(Activity),
    /// 诊断文本，写出为 `Error` 信封。
    Error(String),
}

impl OutboundItem {
    /// 包装为线上信封。
    pub fn into_envelope(self) -> Result<Envelope> {
        match self {
            OutboundItem::Activity(activity) => Envelope::activity(&activity),
            OutboundItem::Error(text) => Ok(Envelope::error(text)),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            OutboundItem::Activity(_) => crate::envelope::wire::ACTIVITY,
            OutboundItem::Error(_) => crate::envelope::wire::ERROR,
        }
    }
}

#[derive(Debug)]
struct SinkShared {
    sender: ArcSwapOption<mpsc::UnboundedSender<OutboundItem>>,
    depth: AtomicUsize,
    warn_depth: usize,
}

/// 回复队列的生产端，可自由克隆并跨任务持有。
#[derive(Clone, Debug)]
pub struct ReplySink {
    shared: Arc<SinkShared>,
}

/// 回复队列的消费端，由出站泵独占。
#[derive(Debug)]
pub struct ReplyReceiver {
    inner: mpsc::UnboundedReceiver<OutboundItem>,
    shared: Arc<SinkShared>,
}

/// 创建一对回复队列端点。
///
/// `warn_depth` 为 0 时关闭深度告警。
pub fn reply_sink(warn_depth: usize) -> (ReplySink, ReplyReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(SinkShared {
        sender: ArcSwapOption::from_pointee(tx),
        depth: AtomicUsize::new(0),
        warn_depth,
    });
    (
        ReplySink {
            shared: Arc::clone(&shared),
        },
        ReplyReceiver { inner: rx, shared },
    )
}

impl ReplySink {
    /// 入队一个条目，永不阻塞。
    pub fn push(&self, item: OutboundItem) -> Result<()> {
        let guard = self.shared.sender.load();
        let Some(sender) = guard.as_ref() else {
            return Err(RelayError::Closed);
        };
        let previous = self.shared.depth.fetch_add(1, Ordering::AcqRel);
        if sender.send(item).is_err() {
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(RelayError::Closed);
        }
        let warn_depth = self.shared.warn_depth;
        if warn_depth > 0 && previous == warn_depth {
            warn!(
                depth = previous + 1,
                warn_depth, "reply queue is growing faster than the peer reads"
            );
        }
        Ok(())
    }

    pub fn push_activity(&self, activity: Activity) -> Result<()> {
        self.push(OutboundItem::Activity(activity))
    }

    pub fn push_error(&self, text: impl Into<String>) -> Result<()> {
        self.push(OutboundItem::Error(text.into()))
    }

    /// 关闭队列，返回本次调用是否真正执行了关闭。
    pub fn close(&self) -> bool {
        self.shared.sender.swap(None).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.sender.load().is_none()
    }

    /// 尚未被消费者取走的条目数。
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }
}

impl ReplyReceiver {
    /// 取下一个条目；队列关闭且取空后返回 `None`。
    ///
    /// 取消安全：Future 被丢弃时不会丢失条目。
    pub async fn recv(&mut self) -> Option<OutboundItem> {
        let item = self.inner.recv().await;
        if item.is_some() {
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// 关闭队列并丢弃所有剩余条目，返回丢弃数量。
    pub fn discard_remaining(&mut self) -> usize {
        self.shared.sender.swap(None);
        self.inner.close();
        let mut discarded = 0;
        while self.inner.try_recv().is_ok() {
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
            discarded += 1;
        }
        discarded
    }
}
