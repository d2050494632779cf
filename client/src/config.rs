use std::env;
use std::time::Duration;
use url::Url;

use crate::error::ClientError;

/// Default relay origin for local development.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3005";

/// Fixed delay between reconnect attempts. There is deliberately no backoff
/// growth: a viewing session is long-lived and the relay tolerates polling.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Cadence of WebSocket keep-alive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// Timeout applied to the one-shot snapshot fetch.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for a party session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) origin of the relay, e.g. `http://localhost:3005`.
    pub server_url: String,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read the relay origin from `MATINEE_SERVER_URL`, falling back to the
    /// local development default.
    pub fn from_env() -> Self {
        let url = env::var("MATINEE_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self::new(url)
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// WebSocket endpoint for a party. The bearer token rides as a query
    /// parameter; the relay accepts nothing else on the upgrade request.
    pub fn ws_url(&self, party_id: &str, token: &str) -> Result<String, ClientError> {
        let mut url = self.parse_origin()?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "unsupported scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidEndpoint("cannot derive ws scheme".into()))?;
        url.set_path("/ws");
        url.query_pairs_mut()
            .clear()
            .append_pair("party", party_id)
            .append_pair("token", token);
        Ok(url.to_string())
    }

    /// REST endpoint serving the initial party snapshot.
    pub fn snapshot_url(&self, party_id: &str) -> Result<String, ClientError> {
        let mut url = self.parse_origin()?;
        url.set_path(&format!("/api/parties/{party_id}"));
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.to_string())
    }

    fn parse_origin(&self) -> Result<Url, ClientError> {
        Url::parse(&self.server_url)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {e}", self.server_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_carries_party_and_token() {
        let config = ClientConfig::new("http://localhost:3005");
        let url = config.ws_url("412-877", "secret").unwrap();
        assert_eq!(url, "ws://localhost:3005/ws?party=412-877&token=secret");
    }

    #[test]
    fn https_maps_to_wss() {
        let config = ClientConfig::new("https://matinee.example.com");
        let url = config.ws_url("412-877", "secret").unwrap();
        assert!(url.starts_with("wss://matinee.example.com/ws?"));
    }

    #[test]
    fn snapshot_url_strips_query() {
        let config = ClientConfig::new("http://localhost:3005/?stale=1");
        let url = config.snapshot_url("412-877").unwrap();
        assert_eq!(url, "http://localhost:3005/api/parties/412-877");
    }

    #[test]
    fn rejects_non_http_origin() {
        let config = ClientConfig::new("ftp://example.com");
        assert!(config.ws_url("412-877", "secret").is_err());
    }
}
