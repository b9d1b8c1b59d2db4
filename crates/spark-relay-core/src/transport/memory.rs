//! 进程内双工传输。
//!
//! 两端各持有一个读端与一个写端，信封通过 `tokio::sync::mpsc` 直接传递，不经过分帧。
//! 适合集成测试以及把中继嵌入到同进程宿主中。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EnvelopeReader, EnvelopeWriter};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::error::RelayError;

/// 双工对中的一端。
#[derive(Debug)]
pub struct MemoryTransport {
    reader: MemoryReader,
    writer: MemoryWriter,
}

impl MemoryTransport {
    /// 拆分为独立的读端与写端。
    pub fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

/// 创建一对互联的内存传输端。
///
/// 一端写入的信封按顺序出现在另一端的读端；写端关闭或被丢弃后，对端读到流结束。
pub fn duplex() -> (MemoryTransport, MemoryTransport) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            reader: MemoryReader { inner: left_rx },
            writer: MemoryWriter {
                inner: Some(left_tx),
            },
        },
        MemoryTransport {
            reader: MemoryReader { inner: right_rx },
            writer: MemoryWriter {
                inner: Some(right_tx),
            },
        },
    )
}

#[derive(Debug)]
pub struct MemoryReader {
    inner: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl EnvelopeReader for MemoryReader {
    async fn next(&mut self) -> Result<Option<Envelope>> {
        Ok(self.inner.recv().await)
    }
}

#[derive(Debug)]
pub struct MemoryWriter {
    inner: Option<mpsc::UnboundedSender<Envelope>>,
}

#[async_trait]
impl EnvelopeWriter for MemoryWriter {
    async fn write(&mut self, envelope: Envelope) -> Result<()> {
        let sender = self.inner.as_ref().ok_or_else(RelayError::peer_closed)?;
        sender
            .send(envelope)
            .map_err(|_| RelayError::peer_closed())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}
