use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_host: IpAddr,
    /// Absent means grids and cases live in process memory.
    pub redis_url: Option<String>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            redis_url: None,
            log_filter: "info,casegrid_server=debug".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("CASEGRID_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            bind_host: env::var("CASEGRID_BIND_HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(defaults.bind_host),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            log_filter: env::var("RUST_LOG").unwrap_or(defaults.log_filter),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn default_binds_every_interface_on_3030() {
        let config = Config::default();
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:3030");
        assert!(config.redis_url.is_none());
    }
}
