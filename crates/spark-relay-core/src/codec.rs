//! 基于换行符分帧的信封编解码。
//!
//! # 教案背景（Why）
//! - 字节流传输需要确定信封边界；`serde_json` 输出的紧凑 JSON 不含裸换行，
//!   因而“一行一个信封”即可无歧义分帧，无需长度前缀；
//! - 帧预算在解码侧兜底，防止对端构造超长行耗尽内存。
//!
//! # 合约说明（What）
//! - 编码：`serde_json::to_vec(envelope)` 后追加 `\n`；超过预算返回编码错误，信封不会被写出；
//! - 解码：输入为去掉换行符的一行字节，允许末尾 `\r`；非法 JSON 返回 `relay.decode.invalid_frame`。

use crate::envelope::Envelope;
use crate::error::{RelayError, Result, codes};

/// 默认帧预算：1 MiB。
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const NEWLINE: u8 = b'\n';

/// 行分帧编解码器，无内部状态，可随意克隆。
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// 帧预算（不含换行符）。
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// 编码一个完整帧（含换行符）。
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(envelope).map_err(|err| RelayError::Encode {
            detail: err.to_string(),
        })?;
        if frame.len() > self.max_frame_bytes {
            return Err(RelayError::Encode {
                detail: format!(
                    "`{}` frame of {} bytes exceeds budget {}",
                    envelope.kind,
                    frame.len(),
                    self.max_frame_bytes
                ),
            });
        }
        frame.push(NEWLINE);
        Ok(frame)
    }

    /// 解码一行（不含换行符）。
    pub fn decode(&self, line: &[u8]) -> Result<Envelope> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() > self.max_frame_bytes {
            return Err(frame_too_large(line.len(), self.max_frame_bytes));
        }
        serde_json::from_slice(line).map_err(|err| {
            RelayError::decode(codes::DECODE_FRAME, format!("frame is not an envelope: {err}"))
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// 构造超长帧错误。
pub(crate) fn frame_too_large(len: usize, limit: usize) -> RelayError {
    RelayError::decode(
        codes::DECODE_FRAME_TOO_LARGE,
        format!("frame of at least {len} bytes exceeds budget {limit}"),
    )
}
