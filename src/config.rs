/*!
 * Server Configuration
 */

use anyhow::{anyhow, Context, Result};
use log::warn;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Listen address used when none is configured (all interfaces, port 5001)
pub const DEFAULT_LISTEN_ADDR: &str = ":5001";

/// Reply write timeout; 0 disables it
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

pub const ENV_LISTEN_ADDR: &str = "KVLOOP_LISTEN_ADDR";
pub const ENV_ERROR_REPLIES: &str = "KVLOOP_ERROR_REPLIES";
pub const ENV_WRITE_TIMEOUT_MS: &str = "KVLOOP_WRITE_TIMEOUT_MS";

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port`, or `:port` for every interface
    pub listen_addr: String,
    /// Send `-ERR key not found` for GET misses instead of no reply
    pub error_replies: bool,
    /// Longest a reply write may block before the peer is dropped (0 = never)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            error_replies: false,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Build a config from `KVLOOP_*` environment variables
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            cfg.listen_addr = addr;
        }
        if let Ok(v) = std::env::var(ENV_ERROR_REPLIES) {
            cfg.error_replies = parse_flag(&v);
        }
        if let Ok(v) = std::env::var(ENV_WRITE_TIMEOUT_MS) {
            match v.trim().parse() {
                Ok(ms) => cfg.write_timeout_ms = ms,
                Err(_) => warn!("ignoring {}={:?}: not a number", ENV_WRITE_TIMEOUT_MS, v),
            }
        }
        cfg
    }

    /// Resolve the listen address into bind candidates, in order
    ///
    /// An empty address falls back to the default. `:port` means every
    /// interface: dual-stack `[::]:port` first, then `0.0.0.0:port` for hosts
    /// without IPv6.
    pub fn socket_addrs(&self) -> Result<Vec<SocketAddr>> {
        let addr = self.listen_addr.trim();
        let addr = if addr.is_empty() { DEFAULT_LISTEN_ADDR } else { addr };

        if let Some(port) = addr.strip_prefix(':') {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid listen port '{}'", port))?;
            return Ok(vec![
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ]);
        }

        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .with_context(|| format!("invalid listen address '{}'", addr))?
            .collect();
        if addrs.is_empty() {
            return Err(anyhow!("listen address '{}' resolved to nothing", addr));
        }
        Ok(addrs)
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
