//! HTTP channel authorization.
//!
//! Private and presence subscriptions are forwarded to the application's
//! broadcasting auth endpoint together with the socket's credentials.

use crate::config::AuthConfig;
use async_trait::async_trait;
use herald_core::{AuthError, AuthRequest, AuthResponse, Authenticator};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Body posted to the auth endpoint.
#[derive(Debug, Serialize)]
struct AuthPayload<'a> {
    channel_name: &'a str,
    socket_id: &'a str,
}

/// Authorizes subscriptions against an HTTP endpoint.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthenticator {
    /// Create an authenticator for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url(),
        })
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Forwarded credentials plus the marker Laravel uses to answer with JSON.
fn request_headers(request: &AuthRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid auth header"),
        }
    }
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authorize(&self, request: &AuthRequest) -> Result<AuthResponse, AuthError> {
        debug!(channel = %request.channel, socket = %request.socket_id, url = %self.url, "Sending auth request");

        let response = self
            .client
            .post(&self.url)
            .headers(request_headers(request))
            .json(&AuthPayload {
                channel_name: &request.channel,
                socket_id: &request.socket_id,
            })
            .send()
            .await
            .map_err(|e| {
                AuthError::new(500, format!("Error sending authentication request: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::new(
                status.as_u16(),
                format!("Client can not be authenticated, got HTTP status {}", status.as_u16()),
            ));
        }

        response
            .json::<AuthResponse>()
            .await
            .map_err(|e| AuthError::new(500, format!("Invalid authentication response: {e}")))
    }
}
