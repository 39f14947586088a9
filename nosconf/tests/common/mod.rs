//! Shared test utilities for nosconf integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use nosconf::params::RawParams;
use nosconf::plan::Verb;
use nosconf::probe::{ProbeResult, ReachabilityProbe};
use nosconf::transport::{ApiResponse, Platform, PlatformCell, Transport};
use nosconf::{Error, Result};

/// One call seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct Call {
    pub verb: Verb,
    pub path: String,
    pub body: Option<Value>,
}

/// Transport answering from per-route response queues.
///
/// Each `(verb, path)` route pops its queue; the last response is sticky.
/// Calls without a scripted route fail with a 599 device error.
pub struct MockTransport {
    routes: Mutex<HashMap<(Verb, String), VecDeque<ApiResponse>>>,
    calls: Mutex<Vec<Call>>,
    platform: PlatformCell,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_platform(Platform::Appliance)
    }

    pub fn with_platform(platform: Platform) -> Self {
        Self::with_cell(PlatformCell::fixed(platform))
    }

    /// Platform read from the scripted platform route on first use.
    pub fn discovering() -> Self {
        Self::with_cell(PlatformCell::default())
    }

    fn with_cell(platform: PlatformCell) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            platform,
        }
    }

    /// Script responses for a route, in order.
    pub fn on(&self, verb: Verb, path: &str, responses: impl IntoIterator<Item = ApiResponse>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((verb, path.to_string()))
            .or_default()
            .extend(responses);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change device state.
    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb != Verb::Get).collect()
    }

    pub fn count(&self, verb: Verb, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb && c.path == path)
            .count()
    }

    fn respond(&self, verb: Verb, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(Call {
            verb,
            path: path.to_string(),
            body: body.cloned(),
        });

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&(verb, path.to_string()))
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::device_status(599, format!("unscripted {} {}", verb, path)))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            Ok(queue[0].clone())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.respond(Verb::Get, path, None)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.respond(Verb::Post, path, Some(body))
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.respond(Verb::Patch, path, Some(body))
    }

    async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.respond(Verb::Delete, path, None)
    }

    async fn platform(&self) -> Result<Platform> {
        self.platform.get(self).await
    }
}

/// Probe answering from a scripted queue; the last result is sticky.
pub struct MockProbe {
    results: Mutex<VecDeque<ProbeResult>>,
    probed: Mutex<Vec<(String, u16)>>,
}

impl MockProbe {
    pub fn new(results: impl IntoIterator<Item = ProbeResult>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            probed: Mutex::new(Vec::new()),
        }
    }

    /// Probe for tests that never reach the SSH check.
    pub fn idle() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probed(&self) -> Vec<(String, u16)> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for MockProbe {
    async fn probe(&self, host: &str, port: u16) -> ProbeResult {
        self.probed.lock().unwrap().push((host.to_string(), port));
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results
                .front()
                .cloned()
                .unwrap_or_else(|| ProbeResult::NotReady("unscripted".to_string()))
        }
    }
}

/// JSON fixtures from `tests/fixtures`, each file read at most once.
pub struct FixtureCache {
    dir: PathBuf,
    loaded: HashMap<String, Value>,
}

impl FixtureCache {
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"),
            loaded: HashMap::new(),
        }
    }

    pub fn load(&mut self, name: &str) -> Value {
        let dir = &self.dir;
        self.loaded
            .entry(name.to_string())
            .or_insert_with(|| {
                let path = dir.join(name);
                let text = std::fs::read_to_string(&path)
                    .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
                serde_json::from_str(&text)
                    .unwrap_or_else(|e| panic!("Failed to parse {}: {}", path.display(), e))
            })
            .clone()
    }
}

pub fn ok(contents: Value) -> ApiResponse {
    ApiResponse::new(200, contents)
}

pub fn no_content() -> ApiResponse {
    ApiResponse::new(204, Value::Null)
}

pub fn not_found() -> ApiResponse {
    ApiResponse::new(
        404,
        serde_json::json!({
            "ietf-restconf:errors": {
                "error": [{ "error-type": "application", "error-tag": "invalid-value", "error-message": "uri keypath not found" }]
            }
        }),
    )
}

/// RESTCONF error document with `code`.
pub fn failure(code: u16, message: &str) -> ApiResponse {
    ApiResponse::new(
        code,
        serde_json::json!({
            "ietf-restconf:errors": { "error": [{ "error-type": "application", "error-message": message }] }
        }),
    )
}

/// Declared intent from a JSON literal.
pub fn params(value: Value) -> RawParams {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
