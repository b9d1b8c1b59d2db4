//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为中继的全部失败路径提供集中定义：帧/负载解码、引擎回合、传输读写、未实现的适配器操作；
//! - 每个变体都携带稳定错误码（`relay.<领域>.<语义>`），便于日志聚合与告警规则按码匹配。
//!
//! ## 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - [`ErrorKind`] 决定传播策略：解码与引擎错误只影响单个信封/回合，传输错误终结会话；
//! - 错误需满足 `Send + Sync + 'static`，以便跨泵任务传递。

use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// 稳定错误码。
///
/// 新增错误码时保持 `relay.<领域>.<语义>` 命名，避免与既有告警规则冲突。
pub mod codes {
    /// 帧不是合法的信封 JSON。
    pub const DECODE_FRAME: &str = "relay.decode.invalid_frame";
    /// 信封 `Body` 无法按 `Kind` 解析。
    pub const DECODE_BODY: &str = "relay.decode.invalid_body";
    /// 帧长度超过预算。
    pub const DECODE_FRAME_TOO_LARGE: &str = "relay.decode.frame_too_large";
    /// 负载序列化失败。
    pub const ENCODE_BODY: &str = "relay.encode.invalid_body";
    /// 引擎回合返回错误。
    pub const ENGINE_FAILED: &str = "relay.engine.failed";
    /// 引擎回合发生 panic。
    pub const ENGINE_PANICKED: &str = "relay.engine.panicked";
    /// 引擎回合超时。
    pub const ENGINE_TIMEOUT: &str = "relay.engine.timeout";
    /// 回合因会话取消而被放弃。
    pub const ENGINE_CANCELLED: &str = "relay.engine.cancelled";
    /// 传输读失败。
    pub const TRANSPORT_READ: &str = "relay.transport.read_failed";
    /// 传输写失败。
    pub const TRANSPORT_WRITE: &str = "relay.transport.write_failed";
    /// 传输被对端关闭。
    pub const TRANSPORT_CLOSED: &str = "relay.transport.closed";
    /// 适配器操作未实现。
    pub const UNSUPPORTED: &str = "relay.unsupported";
    /// 回复队列已关闭。
    pub const CLOSED: &str = "relay.closed";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "relay.config.invalid";
    /// 内部异常（任务 join 失败等）。
    pub const INTERNAL: &str = "relay.internal";
}

/// 错误分类，决定错误在会话内的传播范围。
///
/// # 教案式说明
/// - **意图 (Why)**：泵循环只需看分类即可决定“记录后继续”还是“终结会话”，不必理解具体变体；
/// - **契约 (What)**：`DecodeError`/`EngineError` 局限于单个信封或回合；`TransportError`/`Internal`
///   终结会话；`UnsupportedOperation`/`Closed` 只反馈给调用方；
/// - **风险 (Trade-offs)**：分类是粗粒度的，若未来需要区分可重试的传输错误，应在此处扩展而非在泵里特判。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// 畸形信封或负载：记录、丢弃、继续。
    DecodeError,
    /// 引擎处理失败：以 `Error` 信封告知对端，回合放弃。
    EngineError,
    /// 读写失败或对端断开：会话致命。
    TransportError,
    /// 适配器未实现的操作：立即失败，不影响会话。
    UnsupportedOperation,
    /// 回复队列已关闭。
    Closed,
    /// 配置校验失败。
    Config,
    /// 内部异常。
    Internal,
}

/// 中继错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把四类规格化错误（解码、引擎、传输、未实现）与运行期辅助错误收敛到一个枚举，
///   让泵、适配器与宿主共享同一套 `?` 传播路径；
/// - **契约 (What)**：
///   - 每个变体都能通过 [`RelayError::code`] 给出稳定错误码；
///   - [`RelayError::kind`] 给出分类，[`RelayError::is_session_fatal`] 据此判定是否终结会话；
/// - **设计权衡 (Trade-offs)**：上下文以 `String`/`Cow` 保存，牺牲少量分配换取可读的诊断文本；
///   这些文本会原样出现在对端收到的 `Error` 信封里，调用方应避免放入敏感信息。
#[derive(Debug, Error)]
pub enum RelayError {
    /// 帧或负载无法解码。
    #[error("decode failed ({code}): {detail}")]
    Decode {
        code: &'static str,
        detail: String,
    },

    /// 负载无法编码。
    #[error("encode failed: {detail}")]
    Encode { detail: String },

    /// 引擎回合失败。
    #[error("engine turn failed ({code}): {detail}")]
    Engine {
        code: &'static str,
        detail: String,
    },

    /// 传输层失败。
    #[error("transport failure ({code}): {detail}")]
    Transport {
        code: &'static str,
        detail: Cow<'static, str>,
    },

    /// 适配器不支持的操作。
    #[error("operation `{operation}` is not supported by the relay adapter")]
    Unsupported { operation: &'static str },

    /// 回复队列已关闭，推送被拒绝。
    #[error("reply sink is closed")]
    Closed,

    /// 配置非法。
    #[error("invalid relay configuration: {detail}")]
    Config { detail: String },

    /// 内部异常。
    #[error("internal relay failure: {detail}")]
    Internal { detail: String },
}

impl RelayError {
    /// 构造解码错误。
    pub fn decode(code: &'static str, detail: impl Into<String>) -> Self {
        RelayError::Decode {
            code,
            detail: detail.into(),
        }
    }

    /// 构造引擎错误。
    pub fn engine(code: &'static str, detail: impl Into<String>) -> Self {
        RelayError::Engine {
            code,
            detail: detail.into(),
        }
    }

    /// 构造传输错误。
    pub fn transport(code: &'static str, detail: impl Into<Cow<'static, str>>) -> Self {
        RelayError::Transport {
            code,
            detail: detail.into(),
        }
    }

    /// 对端关闭连接时使用的传输错误。
    pub fn peer_closed() -> Self {
        Self::transport(codes::TRANSPORT_CLOSED, "peer closed the connection")
    }

    /// 构造配置错误。
    pub fn config(detail: impl Into<String>) -> Self {
        RelayError::Config {
            detail: detail.into(),
        }
    }

    /// 构造内部错误。
    pub fn internal(detail: impl Into<String>) -> Self {
        RelayError::Internal {
            detail: detail.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Decode { code, .. }
            | RelayError::Engine { code, .. }
            | RelayError::Transport { code, .. } => code,
            RelayError::Encode { .. } => codes::ENCODE_BODY,
            RelayError::Unsupported { .. } => codes::UNSUPPORTED,
            RelayError::Closed => codes::CLOSED,
            RelayError::Config { .. } => codes::CONFIG_INVALID,
            RelayError::Internal { .. } => codes::INTERNAL,
        }
    }

    /// 返回错误分类。
    ///
    /// 编码失败归入 `DecodeError`：两者都只影响单个信封，传播策略一致。
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Decode { .. } | RelayError::Encode { .. } => ErrorKind::DecodeError,
            RelayError::Engine { .. } => ErrorKind::EngineError,
            RelayError::Transport { .. } => ErrorKind::TransportError,
            RelayError::Unsupported { .. } => ErrorKind::UnsupportedOperation,
            RelayError::Closed => ErrorKind::Closed,
            RelayError::Config { .. } => ErrorKind::Config,
            RelayError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// 是否应终结所在会话。
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportError | ErrorKind::Internal
        )
    }
}

/// 引擎侧可见的错误类型。
///
/// 引擎实现以此返回失败；适配器会将其包装为 [`RelayError::Engine`]。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// 以自然语言描述构造引擎错误。
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// 错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RelayError> for EngineError {
    /// 引擎在回合内调用 `TurnContext` 失败时可直接 `?` 传播。
    fn from(value: RelayError) -> Self {
        EngineError::new(value.to_string())
    }
}

/// 描述一次底层 IO 操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

/// 读取信封帧。
pub const READ: OperationKind = OperationKind {
    code: codes::TRANSPORT_READ,
    message: "envelope read",
};

/// 写出信封帧。
pub const WRITE: OperationKind = OperationKind {
    code: codes::TRANSPORT_WRITE,
    message: "envelope write",
};

/// 将 IO 错误映射为传输错误，保留操作语义。
pub fn map_io_error(kind: OperationKind, error: io::Error) -> RelayError {
    RelayError::transport(kind.code, format!("{}: {}", kind.message, error))
}

/// 中继统一的 `Result` 别名。
pub type Result<T, E = RelayError> = std::result::Result<T, E>;
