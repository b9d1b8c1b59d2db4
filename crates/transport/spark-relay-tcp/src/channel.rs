use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::SockRef;
use spark_relay_core::error::{Result, map_io_error};
use spark_relay_core::transport::{LineReader, LineWriter};
use spark_relay_core::FrameCodec;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error;

/// TCP 连接上的信封读端。
pub type TcpEnvelopeReader = LineReader<OwnedReadHalf>;
/// TCP 连接上的信封写端。
pub type TcpEnvelopeWriter = LineWriter<OwnedWriteHalf>;

/// 套接字级选项。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 中继的信封通常很小且对时延敏感，默认关闭 Nagle；
/// - `linger` 决定关闭时未发送数据的处理方式，交由部署方按需设置。
///
/// ## 契约 (What)
/// - `nodelay`：是否设置 `TCP_NODELAY`，默认 `true`；
/// - `linger_ms`：`SO_LINGER` 超时，缺省沿用内核默认行为。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSocketConfig {
    pub nodelay: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linger_ms: Option<u64>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger_ms: None,
        }
    }
}

impl TcpSocketConfig {
    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> Result<()> {
        self.apply_io(stream)
            .map_err(|err| map_io_error(error::CONFIGURE, err))
    }

    fn apply_io(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if self.linger_ms.is_some() {
            SockRef::from(stream).set_linger(self.linger())?;
        }
        Ok(())
    }
}

/// 已建立的中继连接。
#[derive(Debug)]
pub struct TcpRelayChannel {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpRelayChannel {
    /// 主动连接到中继服务器。
    pub async fn connect(addr: SocketAddr, config: &TcpSocketConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Self::from_stream(stream, addr, config)
    }

    pub(crate) fn from_stream(
        stream: TcpStream,
        peer_addr: SocketAddr,
        config: &TcpSocketConfig,
    ) -> Result<Self> {
        config.apply(&stream)?;
        Ok(Self { stream, peer_addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 拆分为信封读写端；两半可分别交给入站泵与出站泵。
    pub fn into_split(self, codec: FrameCodec) -> (TcpEnvelopeReader, TcpEnvelopeWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            LineReader::new(read_half, codec),
            LineWriter::new(write_half, codec),
        )
    }
}
