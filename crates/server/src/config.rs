//! Server configuration from the environment
//!
//! Recognized variables: `PORT`, `TLS_CERT`, `TLS_KEY`, `LOG_LEVEL`
//! (consumed by the tracing subscriber), plus the engine variables
//! handled by `EngineConfig`.

use entitydb_core::{DbResult, EntityDbError};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8085;

/// HTTP-layer settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
    /// TLS certificate path, when termination is in front of us
    pub tls_cert: Option<PathBuf>,
    /// TLS key path
    pub tls_key: Option<PathBuf>,
}

impl ServerConfig {
    /// Read `PORT`, `TLS_CERT`, and `TLS_KEY`
    pub fn from_env() -> DbResult<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                EntityDbError::malformed(format!("PORT must be a port number, got '{}'", raw))
            })?,
            Err(_) => DEFAULT_PORT,
        };
        Ok(ServerConfig {
            port,
            tls_cert: std::env::var("TLS_CERT").ok().map(PathBuf::from),
            tls_key: std::env::var("TLS_KEY").ok().map(PathBuf::from),
        })
    }

    /// The bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        let c = ServerConfig {
            port: DEFAULT_PORT,
            tls_cert: None,
            tls_key: None,
        };
        assert_eq!(c.bind_addr().port(), DEFAULT_PORT);
    }
}
