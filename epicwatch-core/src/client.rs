//! HTTP client for the workflow backend
//!
//! Two endpoints are used:
//! - `GET {events_path}`: the long-lived `text/event-stream`
//! - `GET {state_path}`: a full [`ProjectStateTree`] snapshot for resync

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::types::ProjectStateTree;

/// HTTP client for the backend's stream and snapshot endpoints
#[derive(Debug, Clone)]
pub struct DashboardClient {
    http_client: reqwest::Client,
    events_url: String,
    state_url: String,
    request_timeout: Duration,
}

impl DashboardClient {
    /// Create a new client from configuration
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        // No overall timeout: the event stream stays open indefinitely
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            events_url: config.events_url(),
            state_url: config.state_url(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    pub fn state_url(&self) -> &str {
        &self.state_url
    }

    /// Fetch the complete project state
    pub async fn fetch_state(&self) -> Result<ProjectStateTree> {
        let response = self
            .http_client
            .get(&self.state_url)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Resync(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let tree: ProjectStateTree = response
                .json()
                .await
                .map_err(|e| Error::Resync(format!("failed to parse state: {}", e)))?;
            Ok(tree)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Resync(format!("API error ({}): {}", status, error_text)))
        }
    }

    /// Open the event stream. A non-success status is a transport error.
    pub async fn open_stream(&self) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .get(&self.events_url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("stream request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Transport(format!(
                "stream failed with status {}: {}",
                status, error_text
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_urls_from_config() {
        let config = ServerConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        let client = DashboardClient::new(&config).unwrap();
        assert_eq!(client.events_url(), "http://127.0.0.1:9000/api/events");
        assert_eq!(client.state_url(), "http://127.0.0.1:9000/api/state");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Grab a free port, then close it so nothing is listening there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ServerConfig {
            base_url: format!("http://127.0.0.1:{}", port),
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let client = DashboardClient::new(&config).unwrap();
        assert!(matches!(
            client.open_stream().await,
            Err(Error::Transport(_))
        ));
        assert!(matches!(client.fetch_state().await, Err(Error::Resync(_))));
    }
}
