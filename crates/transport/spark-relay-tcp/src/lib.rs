#![doc = r#"
# spark-relay-tcp

## 设计目标（Why）
- 把 `spark-relay-core` 的会话与客户端接到 Tokio TCP 上：一条连接一个会话，帧为换行分隔的 JSON；
- 保持与核心库一致的错误语义：绑定、接受、建连与套接字配置失败都映射为带稳定错误码的传输错误。

## 核心契约（What）
- [`RelayListener`]：绑定与接受，接受时应用 [`TcpSocketConfig`]；
- [`TcpRelayChannel`]：已建立的连接，可拆分为核心库的行读写端；
- [`RelayServer`]：接受循环、按连接创建引擎、会话失败隔离与优雅停机；
- [`connect`]：客户端建连并返回 [`spark_relay_core::RelayClient`]；
- [`ServerConfig`] / [`ClientConfig`]：TOML 宿主配置。

## 实现策略（How）
- 连接拆分为 `OwnedReadHalf` / `OwnedWriteHalf`，读写分别交给入站泵与出站泵；
- `SO_LINGER` 经 `socket2::SockRef` 设置，其余选项走 Tokio 原生接口。
"#]

mod channel;
mod client;
mod config;
mod error;
mod listener;
mod server;

pub use channel::{TcpEnvelopeReader, TcpEnvelopeWriter, TcpRelayChannel, TcpSocketConfig};
pub use client::connect;
pub use config::{ClientConfig, DEFAULT_PORT, ServerConfig};
pub use listener::RelayListener;
pub use server::{EngineFactory, RelayServer, ServeReport};
