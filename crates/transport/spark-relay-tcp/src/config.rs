//! # 宿主配置
//!
//! 服务端与客户端各自一张 TOML 表，中继参数放在 `[relay]` 子表里：
//!
//! ```toml
//! bind = "127.0.0.1:3978"
//!
//! [socket]
//! nodelay = true
//! linger_ms = 0
//!
//! [relay]
//! turn_timeout_ms = 30000
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use spark_relay_core::{RelayConfig, RelayError, Result};

use crate::channel::TcpSocketConfig;

/// 未指定地址时使用的默认端口。
pub const DEFAULT_PORT: u16 = 3978;

fn default_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// 中继服务器配置。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub socket: TcpSocketConfig,
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_addr(),
            socket: TcpSocketConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(raw).map_err(|err| RelayError::config(err.to_string()))?;
        config.relay.validate()?;
        Ok(config)
    }
}

/// 中继客户端配置。
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub connect: SocketAddr,
    pub socket: TcpSocketConfig,
    pub relay: RelayConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_addr(),
            socket: TcpSocketConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(raw).map_err(|err| RelayError::config(err.to_string()))?;
        config.relay.validate()?;
        Ok(config)
    }
}
