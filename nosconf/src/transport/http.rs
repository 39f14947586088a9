//! RESTCONF transport over HTTPS.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use super::{ApiResponse, Platform, PlatformCell, Transport};
use crate::config::ConnectionConfig;
use crate::error::Result;

const CONTENT_TYPE: &str = "application/yang-data+json";

/// Transport talking to the device's RESTCONF data root.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    platform: PlatformCell,
}

impl HttpTransport {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.validate_certs)
            .timeout(config.request_timeout)
            .build()?;

        let platform = config
            .platform
            .map(PlatformCell::fixed)
            .unwrap_or_default();

        Ok(Self {
            client,
            base_url: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
            platform,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Sending request");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.user, Some(&self.password))
            .header(reqwest::header::ACCEPT, CONTENT_TYPE);
        if let Some(body) = body {
            // json() keeps an already set content type.
            request = request
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .json(body);
        }

        let response = request.send().await?;
        let code = response.status().as_u16();
        let text = response.text().await?;

        // Error payloads are not always JSON; keep them as a string then.
        let contents = if text.trim().is_empty() {
            Value::String(String::new())
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(code, "Received response");
        Ok(ApiResponse { code, contents })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.send(Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::DELETE, path, None).await
    }

    async fn platform(&self) -> Result<Platform> {
        self.platform.get(self).await
    }
}
