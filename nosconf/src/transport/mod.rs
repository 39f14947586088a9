//! Transport facade for the device management API.
//!
//! The engine only talks to the device through [`Transport`]. Every call
//! returns the raw status code and the decoded body; interpreting them is the
//! caller's job. `platform()` is read once per client and cached.

pub mod http;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};

pub use http::HttpTransport;

pub const PLATFORM_PATH: &str = "/openconfig-platform:components/component=platform/state";

/// A decoded API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub code: u16,
    pub contents: Value,
}

impl ApiResponse {
    pub fn new(code: u16, contents: Value) -> Self {
        Self { code, contents }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 404, or an empty 204, means the resource is not there.
    pub fn is_not_found(&self) -> bool {
        self.code == 404 || self.code == 204
    }

    /// Best-effort human readable body for error messages.
    pub fn message(&self) -> String {
        match &self.contents {
            Value::String(s) => s.clone(),
            Value::Null => format!("HTTP {}", self.code),
            other => other.to_string(),
        }
    }

    /// Turn a non-success response into a device error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::device_status(self.code, self.message()))
        }
    }
}

/// Role of the connected endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Chassis system controller. Tenant image management is not valid here.
    Controller,
    /// Chassis partition.
    Partition,
    /// Standalone appliance.
    Appliance,
}

impl Platform {
    /// Parse the device-reported platform description.
    pub fn from_description(description: &str) -> Self {
        let lower = description.to_ascii_lowercase();
        if lower.contains("controller") {
            Platform::Controller
        } else if lower.contains("partition") {
            Platform::Partition
        } else {
            Platform::Appliance
        }
    }

    pub fn is_controller(&self) -> bool {
        matches!(self, Platform::Controller)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Controller => write!(f, "Velos Controller"),
            Platform::Partition => write!(f, "Velos Partition"),
            Platform::Appliance => write!(f, "rSeries Platform"),
        }
    }
}

/// Read the role discriminator. Anything but a 2xx answer is an error so
/// role checks never pass on a failed read.
pub async fn discover_platform(transport: &dyn Transport) -> Result<Platform> {
    let response = transport.get(PLATFORM_PATH).await?.error_for_status()?;
    let description = response
        .contents
        .get("openconfig-platform:state")
        .and_then(|s| s.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let platform = Platform::from_description(description);
    debug!(description, platform = %platform, "Discovered platform");
    Ok(platform)
}

/// Platform discovered at most once per client. Failed reads are not cached.
#[derive(Debug, Default)]
pub struct PlatformCell(OnceCell<Platform>);

impl PlatformCell {
    /// Skip discovery.
    pub fn fixed(platform: Platform) -> Self {
        Self(OnceCell::new_with(Some(platform)))
    }

    pub async fn get(&self, transport: &dyn Transport) -> Result<Platform> {
        self.0
            .get_or_try_init(|| discover_platform(transport))
            .await
            .copied()
    }
}

/// Device API client used by the engine.
///
/// Implementations must not retry on their own account beyond transport-level
/// transient failures; the engine treats every response as authoritative.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<ApiResponse>;

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse>;

    async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse>;

    async fn delete(&self, path: &str) -> Result<ApiResponse>;

    /// Role discriminator, read once and cached.
    async fn platform(&self) -> Result<Platform>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers every GET with `response` and counts the reads.
    struct PlatformSource {
        response: ApiResponse,
        reads: Mutex<u32>,
        platform: PlatformCell,
    }

    impl PlatformSource {
        fn new(response: ApiResponse) -> Self {
            Self {
                response,
                reads: Mutex::new(0),
                platform: PlatformCell::default(),
            }
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for PlatformSource {
        async fn get(&self, path: &str) -> Result<ApiResponse> {
            assert_eq!(path, PLATFORM_PATH);
            *self.reads.lock().unwrap() += 1;
            Ok(self.response.clone())
        }

        async fn post(&self, _path: &str, _body: &Value) -> Result<ApiResponse> {
            unreachable!()
        }

        async fn patch(&self, _path: &str, _body: &Value) -> Result<ApiResponse> {
            unreachable!()
        }

        async fn delete(&self, _path: &str) -> Result<ApiResponse> {
            unreachable!()
        }

        async fn platform(&self) -> Result<Platform> {
            self.platform.get(self).await
        }
    }

    #[tokio::test]
    async fn test_platform_is_read_once() {
        let source = PlatformSource::new(ApiResponse::new(
            200,
            json!({ "openconfig-platform:state": { "description": "Velos Controller" } }),
        ));

        assert_eq!(source.platform().await.unwrap(), Platform::Controller);
        assert_eq!(source.platform().await.unwrap(), Platform::Controller);
        assert_eq!(source.reads(), 1);
    }

    #[tokio::test]
    async fn test_failed_discovery_is_an_error_and_not_cached() {
        let source = PlatformSource::new(ApiResponse::new(401, json!("Unauthorized")));

        for _ in 0..2 {
            match source.platform().await {
                Err(Error::Device { code, message }) => {
                    assert_eq!(code, Some(401));
                    assert_eq!(message, "Unauthorized");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(source.reads(), 2);
    }

    #[tokio::test]
    async fn test_fixed_platform_skips_discovery() {
        let source = PlatformSource::new(ApiResponse::new(500, Value::Null));
        let cell = PlatformCell::fixed(Platform::Partition);
        assert_eq!(cell.get(&source).await.unwrap(), Platform::Partition);
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn test_platform_from_description() {
        assert_eq!(
            Platform::from_description("Velos Controller"),
            Platform::Controller
        );
        assert_eq!(
            Platform::from_description("VELOS partition"),
            Platform::Partition
        );
        assert_eq!(
            Platform::from_description("rSeries Platform"),
            Platform::Appliance
        );
        assert!(Platform::Controller.is_controller());
        assert!(!Platform::Appliance.is_controller());
    }

    #[test]
    fn test_response_classification() {
        assert!(ApiResponse::new(201, json!({})).is_success());
        assert!(ApiResponse::new(404, Value::Null).is_not_found());
        assert!(ApiResponse::new(204, json!("")).is_not_found());
        assert!(!ApiResponse::new(500, Value::Null).is_success());
    }

    #[test]
    fn test_error_for_status_keeps_device_message() {
        let resp = ApiResponse::new(400, json!("operation failed"));
        match resp.error_for_status() {
            Err(Error::Device { code, message }) => {
                assert_eq!(code, Some(400));
                assert_eq!(message, "operation failed");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
