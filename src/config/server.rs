use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Single path segment the scrape endpoint is served on
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - port is 0
    /// - metrics path is empty or spans several segments
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidConfig("server.port cannot be 0".into()));
        }
        if self.metrics_path.is_empty() || self.metrics_path.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "server.metrics_path '{}' must be a single non-empty path segment",
                self.metrics_path
            )));
        }
        Ok(())
    }
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    9291
}
fn default_metrics_path() -> String {
    "metrics".to_string()
}
