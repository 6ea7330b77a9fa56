use std::env;
use std::time::Duration;

use crate::coalescer::DEFAULT_SAVE_DELAY;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3030";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub save_delay: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            save_delay: DEFAULT_SAVE_DELAY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let save_delay = env::var("CASEGRID_SAVE_DELAY_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.save_delay);
        let reconnect_delay = env::var("CASEGRID_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_delay);

        Self {
            base_url: env::var("CASEGRID_URL").unwrap_or(defaults.base_url),
            save_delay,
            reconnect_delay,
        }
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Broadcast socket endpoint derived from the HTTP base URL.
    pub fn websocket_url(&self) -> String {
        let base = self.api_base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws")
    }
}
