//! Connection settings for the device management API.

use std::time::Duration;

use crate::transport::Platform;

/// Default RESTCONF port of the management API.
pub const DEFAULT_PORT: u16 = 8888;

/// Everything needed to reach one device.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Verify the device certificate. Off by default, appliances ship self-signed.
    pub validate_certs: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Skip platform discovery and use this role.
    pub platform: Option<Platform>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            validate_certs: false,
            request_timeout: Duration::from_secs(120),
            platform: None,
        }
    }

    /// RESTCONF data root, e.g. `https://10.1.1.1:8888/api/data`.
    pub fn base_url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("https://{}:{}/api/data", host, self.port)
    }
}
