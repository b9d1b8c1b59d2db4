//! 任意 Tokio 字节流上的换行分帧读写端。

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{EnvelopeReader, EnvelopeWriter};
use crate::codec::{FrameCodec, frame_too_large};
use crate::envelope::Envelope;
use crate::error::{self, Result, map_io_error};

/// 一次帧扫描的结果。
enum Frame {
    Line(Vec<u8>),
    /// 超出预算被整行丢弃，携带已观察到的字节数。
    Oversized(usize),
    Eof,
}

/// 换行分帧读端。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把字节流切成信封帧，同时在帧级别隔离错误：一行坏数据只丢弃这一行；
/// - 超长行在扫描过程中即被丢弃，不会把整行读入内存。
///
/// ## 逻辑 (How)
/// - 借助 `BufReader::fill_buf` 逐块查找 `\n`，未跨越预算的字节累积到 `pending`；
/// - 一旦累计长度超过预算即切换到丢弃模式，直到遇见下一个换行符再报告 `frame_too_large`；
/// - 空行视为保活，直接跳过；流末尾残留的不完整行仍按一帧尝试解码。
///
/// ## 契约 (What)
/// - 扫描状态保存在结构体内，`next` 的 Future 被丢弃后再次调用会从断点继续；
/// - 解码错误可恢复，IO 错误映射为 `relay.transport.read_failed`。
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    codec: FrameCodec,
    pending: Vec<u8>,
    discarded: Option<usize>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner: BufReader::new(inner),
            codec,
            pending: Vec::new(),
            discarded: None,
        }
    }

    async fn read_frame(&mut self) -> std::io::Result<Frame> {
        let limit = self.codec.max_frame_bytes();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if let Some(seen) = self.discarded.take() {
                    return Ok(Frame::Oversized(seen));
                }
                if self.pending.is_empty() {
                    return Ok(Frame::Eof);
                }
                return Ok(Frame::Line(std::mem::take(&mut self.pending)));
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk_len = newline.unwrap_or(available.len());
            match self.discarded.as_mut() {
                Some(seen) => *seen += chunk_len,
                None if self.pending.len() + chunk_len > limit => {
                    self.discarded = Some(self.pending.len() + chunk_len);
                    self.pending.clear();
                }
                None => self.pending.extend_from_slice(&available[..chunk_len]),
            }

            match newline {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    if let Some(seen) = self.discarded.take() {
                        return Ok(Frame::Oversized(seen));
                    }
                    let line = std::mem::take(&mut self.pending);
                    if line.is_empty() || line == b"\r" {
                        continue;
                    }
                    return Ok(Frame::Line(line));
                }
                None => {
                    let consumed = available.len();
                    self.inner.consume(consumed);
                }
            }
        }
    }
}

#[async_trait]
impl<R> EnvelopeReader for LineReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<Envelope>> {
        let frame = self
            .read_frame()
            .await
            .map_err(|err| map_io_error(error::READ, err))?;
        match frame {
            Frame::Eof => Ok(None),
            Frame::Oversized(seen) => Err(frame_too_large(seen, self.codec.max_frame_bytes())),
            Frame::Line(line) => self.codec.decode(&line).map(Some),
        }
    }
}

/// 换行分帧写端。
///
/// 每个信封一次 `write_all` + `flush`；`close` 执行 `shutdown`，重复调用无副作用。
#[derive(Debug)]
pub struct LineWriter<W> {
    inner: W,
    codec: FrameCodec,
    closed: bool,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W, codec: FrameCodec) -> Self {
        Self {
            inner,
            codec,
            closed: false,
        }
    }
}

#[async_trait]
impl<W> EnvelopeWriter for LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, envelope: Envelope) -> Result<()> {
        if self.closed {
            return Err(crate::error::RelayError::transport(
                crate::error::codes::TRANSPORT_WRITE,
                "envelope write after close",
            ));
        }
        let frame = self.codec.encode(&envelope)?;
        self.inner
            .write_all(&frame)
            .await
            .map_err(|err| map_io_error(error::WRITE, err))?;
        self.inner
            .flush()
            .await
            .map_err(|err| map_io_error(error::WRITE, err))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner
            .shutdown()
            .await
            .map_err(|err| map_io_error(error::WRITE, err))
    }
}
