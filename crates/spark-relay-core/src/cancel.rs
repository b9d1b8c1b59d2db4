use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// 会话级取消令牌。
///
/// # 设计背景（Why）
/// - 会话内的两个泵分别阻塞在传输读与队列接收上，任一方失败都需要立刻唤醒另一方；
/// - 纯原子位只能被轮询，因此在原子位之外附带一个 [`Notify`]，使等待方可以 `select!` 在取消上。
///
/// # 逻辑解析（How）
/// - `cancel` 以 CAS 首次置位后调用 `notify_waiters` 唤醒全部等待者；
/// - `cancelled` 先登记等待再检查原子位，避免“检查后、登记前”发生的取消被错过。
///
/// # 契约说明（What）
/// - 克隆共享同一状态；取消不可撤销；
/// - `cancel` 返回 `true` 表示本次调用首次触发取消。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 标记取消并唤醒所有等待者。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 等待取消发生；已取消时立即返回。
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
