use std::time::Duration;

/// GATT client configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Time allowed between characteristic value reads during discovery
    /// before the discovery is abandoned.
    pub discovery_timeout: Duration,
    /// Time allowed for any single request to receive a response.
    pub request_timeout: Duration,
    /// Maximum number of security escalations per request.
    pub security_retries: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            security_retries: 1,
        }
    }
}
