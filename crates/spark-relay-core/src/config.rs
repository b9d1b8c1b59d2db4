//! # 中继配置
//!
//! ## 意图（Why）
//! - 宿主通常以 TOML 文件声明运行参数；配置结构直接 `serde` 反序列化，所有字段可缺省；
//! - 校验集中在 [`RelayConfig::validate`]，宿主只需在启动时调用一次。
//!
//! ## 契约（What）
//! ```toml
//! max_frame_bytes = 1048576      # 帧预算，必须大于 0
//! turn_timeout_ms = 30000        # 可选；缺省表示回合不设时限
//! drain_timeout_ms = 5000        # 可选；缺省表示排空阶段无限等待对端读完
//! reply_queue_warn_depth = 1024  # 回复队列深度告警阈值，0 表示关闭
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_MAX_FRAME_BYTES, FrameCodec};
use crate::error::{RelayError, Result};

/// 默认回复队列告警深度。
pub const DEFAULT_REPLY_QUEUE_WARN_DEPTH: usize = 1_024;

/// 单个会话的运行参数。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub max_frame_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,
    pub reply_queue_warn_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            turn_timeout_ms: None,
            drain_timeout_ms: None,
            reply_queue_warn_depth: DEFAULT_REPLY_QUEUE_WARN_DEPTH,
        }
    }
}

impl RelayConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: RelayConfig =
            toml::from_str(raw).map_err(|err| RelayError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 {
            return Err(RelayError::config("max_frame_bytes must be greater than zero"));
        }
        if self.turn_timeout_ms == Some(0) {
            return Err(RelayError::config(
                "turn_timeout_ms must be greater than zero; omit it to disable the timeout",
            ));
        }
        if self.drain_timeout_ms == Some(0) {
            return Err(RelayError::config(
                "drain_timeout_ms must be greater than zero; omit it to wait for the peer",
            ));
        }
        Ok(())
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_bytes)
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_ms.map(Duration::from_millis)
    }

    /// 排空时限；`None` 表示一直等到另一泵自行退出。
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}
