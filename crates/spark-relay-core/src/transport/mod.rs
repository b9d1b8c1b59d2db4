//! # 传输契约
//!
//! ## 意图（Why）
//! - 泵只面向“读下一个信封 / 写一个信封”两种能力编程，TCP、内存通道或任何字节流都可以接入；
//! - 读写两端拆成独立 trait，出站泵独占写端即可在类型层面保证单写者纪律。
//!
//! ## 契约（What）
//! - [`EnvelopeReader::next`]：`Ok(None)` 表示对端正常结束；可恢复的解码错误以
//!   `Err(kind == DecodeError)` 返回，读端在此之后仍可继续使用；其他错误视为传输失败；
//! - [`EnvelopeWriter::write`]：一次调用对应一次完整帧写出；
//! - [`EnvelopeWriter::close`]：结束写方向（半关闭），幂等。
//!
//! ## 实现（How）
//! - [`line`]：任意 Tokio `AsyncRead`/`AsyncWrite` 上的换行分帧实现；
//! - [`memory`]：基于 `mpsc` 的进程内双工对，供测试与嵌入使用。

pub mod line;
pub mod memory;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;

pub use line::{LineReader, LineWriter};
pub use memory::{MemoryReader, MemoryTransport, MemoryWriter, duplex};

/// 信封读端。
#[async_trait]
pub trait EnvelopeReader: Send {
    /// 读取下一个信封。
    ///
    /// 实现需保证被取消（Future 被丢弃）后再次调用不会丢失已缓冲的完整帧。
    async fn next(&mut self) -> Result<Option<Envelope>>;
}

/// 信封写端。
#[async_trait]
pub trait EnvelopeWriter: Send {
    async fn write(&mut self, envelope: Envelope) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: EnvelopeReader + ?Sized> EnvelopeReader for Box<T> {
    async fn next(&mut self) -> Result<Option<Envelope>> {
        (**self).next().await
    }
}

#[async_trait]
impl<T: EnvelopeWriter + ?Sized> EnvelopeWriter for Box<T> {
    async fn write(&mut self, envelope: Envelope) -> Result<()> {
        (**self).write(envelope).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// 装箱后的读端。
pub type BoxEnvelopeReader = Box<dyn EnvelopeReader>;
/// 装箱后的写端。
pub type BoxEnvelopeWriter = Box<dyn EnvelopeWriter>;
