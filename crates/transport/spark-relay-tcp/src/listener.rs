use std::net::SocketAddr;

use spark_relay_core::error::{Result, map_io_error};
use tokio::net::TcpListener;

use crate::channel::{TcpRelayChannel, TcpSocketConfig};
use crate::error;

/// 对 Tokio `TcpListener` 的语义封装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 宿主只关心“绑定 → 接受一条中继连接”，套接字选项在接受时统一下沉；
/// - 绑定与接受失败都带稳定错误码，服务器据此决定退避还是退出。
///
/// ## 契约 (What)
/// - `bind`：绑定成功后 [`RelayListener::local_addr`] 返回实际地址（端口 0 时为内核分配的端口）；
/// - `accept`：返回已应用 [`TcpSocketConfig`] 的 [`TcpRelayChannel`]；
///   失败时监听器本身仍可继续使用。
///
/// ## 注意事项 (Trade-offs)
/// - 未设置 `SO_REUSEPORT` 等选项，需要时可改为先用 `socket2` 构造再转交 Tokio。
#[derive(Debug)]
pub struct RelayListener {
    inner: TcpListener,
    local_addr: SocketAddr,
    socket: TcpSocketConfig,
}

impl RelayListener {
    pub async fn bind(addr: SocketAddr, socket: TcpSocketConfig) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        Ok(Self {
            inner,
            local_addr,
            socket,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn socket_config(&self) -> &TcpSocketConfig {
        &self.socket
    }

    /// 接受一个入站连接。
    ///
    /// 取消安全：`Future` 被丢弃时不会丢失已排队的连接。
    pub async fn accept(&self) -> Result<TcpRelayChannel> {
        let (stream, peer_addr) = self
            .inner
            .accept()
            .await
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        TcpRelayChannel::from_stream(stream, peer_addr, &self.socket)
    }
}
