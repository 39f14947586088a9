//! Tenant images.
//!
//! `import` starts a file transfer from a remote server and returns at once.
//! `present` waits for an import to finish: the transfer has to complete
//! and the device has to verify and replicate the image. `absent` removes it.
//! None of this is valid on a chassis controller.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::names::encode_key;
use crate::params::{
    get_choice, get_int_in, get_str, is_valid_host, reject_unknown, require_str, RawParams,
};
use crate::plan::{Action, AttrValue, Attrs, Operation, ReconciliationPlan, Target};
use crate::poller::{PollState, Poller, Tick};
use crate::report::{report, Report};
use crate::transport::{ApiResponse, Transport};

use super::{ensure_removed, Reconciler};

pub const IMPORT_PATH: &str = "/f5-utils-file-transfer:file/import";
pub const TRANSFER_STATUS_PATH: &str =
    "/f5-utils-file-transfer:file/transfer-operations/transfer-operation";
pub const REMOVE_PATH: &str = "/f5-tenant-images:images/remove";

pub const DEFAULT_LOCAL_PATH: &str = "images/staging";
pub const DEFAULT_TIMEOUT: i64 = 300;
const TIMEOUT_MIN: i64 = 150;
const TIMEOUT_MAX: i64 = 3600;
/// The wait budget is split into this many polls.
const POLL_DIVISOR: u32 = 100;

const ALLOWED: &[&str] = &[
    "image_name",
    "remote_host",
    "remote_port",
    "remote_user",
    "remote_password",
    "remote_path",
    "local_path",
    "protocol",
    "timeout",
    "state",
];

pub fn status_path(image: &str) -> String {
    format!("/f5-tenant-images:images/image={}/status", encode_key(image))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Import,
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Scp,
    Sftp,
    Https,
}

impl Protocol {
    const CHOICES: &'static [&'static str] = &["scp", "sftp", "https"];
    const ALL: [Protocol; 3] = [Protocol::Scp, Protocol::Sftp, Protocol::Https];

    pub fn as_str(&self) -> &'static str {
        Self::CHOICES[*self as usize]
    }
}

/// How long and how often to poll an import.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollBudget {
    pub interval: Duration,
    pub retries: u32,
}

impl PollBudget {
    /// Spread `timeout` seconds over a fixed number of polls.
    pub fn from_timeout(timeout: u64) -> Self {
        Self {
            interval: Duration::from_secs_f64(timeout as f64 / f64::from(POLL_DIVISOR)),
            retries: POLL_DIVISOR,
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(self.interval, self.interval * self.retries).with_max_attempts(self.retries)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TenantImageParams {
    pub image_name: String,
    pub state: ImageState,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub remote_user: Option<String>,
    pub remote_password: Option<String>,
    /// Full remote file path, image name included.
    pub remote_path: Option<String>,
    pub local_path: String,
    pub protocol: Protocol,
    pub budget: PollBudget,
}

/// Append the image name unless the path already points at the file.
fn join_remote_path(path: &str, image: &str) -> String {
    if path.ends_with(image) {
        path.to_string()
    } else if path.ends_with('/') {
        format!("{}{}", path, image)
    } else {
        format!("{}/{}", path, image)
    }
}

impl TenantImageParams {
    pub fn from_raw(raw: &RawParams) -> Result<Self> {
        reject_unknown(raw, ALLOWED, "tenant image")?;

        let image_name = require_str(raw, "image_name")?;
        let state = match get_choice(raw, "state", &["import", "present", "absent"])? {
            Some(1) => ImageState::Present,
            Some(2) => ImageState::Absent,
            _ => ImageState::Import,
        };

        let remote_host = match state {
            ImageState::Import => Some(require_str(raw, "remote_host")?),
            _ => get_str(raw, "remote_host")?,
        };
        if let Some(host) = remote_host.as_deref().filter(|h| !is_valid_host(h)) {
            return Err(Error::validation(format!(
                "The provided remote_host: {} is not a valid IP address or hostname.",
                host
            )));
        }
        let remote_path = match state {
            ImageState::Import => Some(require_str(raw, "remote_path")?),
            _ => get_str(raw, "remote_path")?,
        }
        .map(|p| join_remote_path(&p, &image_name));

        let protocol = get_choice(raw, "protocol", Protocol::CHOICES)?
            .map(|i| Protocol::ALL[i])
            .unwrap_or(Protocol::Scp);
        let timeout = get_int_in(raw, "timeout", TIMEOUT_MIN, TIMEOUT_MAX)?.unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            image_name,
            state,
            remote_host,
            remote_port: get_int_in(raw, "remote_port", 1, 65535)?.map(|p| p as u16),
            remote_user: get_str(raw, "remote_user")?,
            remote_password: get_str(raw, "remote_password")?,
            remote_path,
            local_path: get_str(raw, "local_path")?.unwrap_or_else(|| DEFAULT_LOCAL_PATH.to_string()),
            protocol,
            budget: PollBudget::from_timeout(timeout as u64),
        })
    }

    /// Body of the file import RPC.
    pub fn import_body(&self) -> Value {
        let mut input = json!({
            "protocol": self.protocol.as_str(),
            "remote-host": self.remote_host,
            "remote-file": self.remote_path,
            "local-file": self.local_path,
            "insecure": "",
        });
        if let Some(port) = self.remote_port {
            input["remote-port"] = json!(port);
        }
        if let Some(user) = &self.remote_user {
            input["username"] = json!(user);
        }
        if let Some(password) = &self.remote_password {
            input["password"] = json!(password);
        }
        json!({ "input": [input] })
    }
}

fn transfer_failure_reason(status: &str) -> &str {
    status.split_once(':').map(|(_, r)| r.trim()).unwrap_or(status)
}

/// Reconciler for [`TenantImageParams`].
pub struct TenantImageReconciler;

impl TenantImageReconciler {
    /// One progress check: transfer status first, then the image status once
    /// the transfer is done.
    async fn progress(&self, transport: &dyn Transport, image: &str) -> Result<Tick> {
        let response = transport.get(TRANSFER_STATUS_PATH).await?.error_for_status()?;
        let transfer = response.contents["f5-utils-file-transfer:transfer-operation"]
            .as_array()
            .and_then(|ops| {
                ops.iter().find(|op| {
                    op["local-file-path"]
                        .as_str()
                        .is_some_and(|p| p.ends_with(image))
                })
            });
        let Some(transfer) = transfer else {
            return Ok(Tick::Failure(
                "File upload job not has not started, check device logs for more information."
                    .to_string(),
            ));
        };

        let transfer_status = transfer["status"].as_str().unwrap_or_default().trim();
        debug!(image, status = transfer_status, "Transfer status");
        if transfer_status.starts_with("Failed") {
            return Ok(Tick::Failure(format!(
                "File upload failed with the following result: {}",
                transfer_failure_reason(transfer_status)
            )));
        }
        if !transfer_status.starts_with("Completed") {
            return Ok(Tick::Continue(transfer_status.to_string()));
        }

        let response = transport.get(&status_path(image)).await?;
        if response.is_not_found() {
            return Ok(Tick::Continue("not-present".to_string()));
        }
        let response = response.error_for_status()?;
        let status = response.contents["f5-tenant-images:status"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        debug!(image, status = %status, "Image status");
        Ok(match status.as_str() {
            "replicated" => Tick::Success(status),
            "importing" | "verifying" | "uploading" | "upload-complete" => Tick::Continue(status),
            "verification-failed" => Tick::Failure(format!(
                "The image: {} was imported, but it failed signature verification, remove the image and try again.",
                image
            )),
            other => Tick::Failure(format!(
                "The image: {} is in an unexpected state: {}",
                image, other
            )),
        })
    }
}

#[async_trait]
impl Reconciler for TenantImageReconciler {
    type Spec = TenantImageParams;

    fn kind(&self) -> &'static str {
        "tenant-image"
    }

    fn target(&self, spec: &TenantImageParams) -> Target {
        match spec.state {
            ImageState::Absent => Target::Absent,
            ImageState::Import | ImageState::Present => Target::Present,
        }
    }

    async fn preflight(&self, transport: &dyn Transport, _spec: &TenantImageParams) -> Result<()> {
        if transport.platform().await?.is_controller() {
            return Err(Error::RoleMismatch(
                "Target device is a VELOS controller, aborting.".to_string(),
            ));
        }
        Ok(())
    }

    async fn observe(
        &self,
        transport: &dyn Transport,
        spec: &TenantImageParams,
    ) -> Result<Option<Attrs>> {
        let response = transport.get(&status_path(&spec.image_name)).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let status = response.contents["f5-tenant-images:status"]
            .as_str()
            .unwrap_or_default();
        Ok(Some(Attrs::from([("status", AttrValue::Str(status.to_string()))])))
    }

    fn desired(&self, spec: &TenantImageParams) -> Attrs {
        match spec.state {
            ImageState::Present => Attrs::from([("status", AttrValue::Str("replicated".into()))]),
            ImageState::Import | ImageState::Absent => Attrs::new(),
        }
    }

    fn operations(
        &self,
        spec: &TenantImageParams,
        plan: &ReconciliationPlan,
    ) -> Result<Vec<Operation>> {
        Ok(match (spec.state, plan.action) {
            (ImageState::Import, Action::Create) => {
                vec![Operation::post(IMPORT_PATH, spec.import_body())]
            }
            (_, Action::Delete) => vec![Operation::post(
                REMOVE_PATH,
                json!({ "input": [{ "name": spec.image_name }] }),
            )],
            _ => Vec::new(),
        })
    }

    fn check_response(
        &self,
        spec: &TenantImageParams,
        op: &Operation,
        response: ApiResponse,
    ) -> Result<()> {
        let response = response.error_for_status()?;
        if op.path == REMOVE_PATH {
            let result = response.contents["f5-tenant-images:output"]["result"]
                .as_str()
                .unwrap_or_default();
            if result != "Successful." {
                return Err(Error::device(format!(
                    "Failed to remove tenant image: {} {}",
                    spec.image_name, result
                )));
            }
        }
        Ok(())
    }

    async fn verify(
        &self,
        transport: &dyn Transport,
        spec: &TenantImageParams,
        plan: &ReconciliationPlan,
    ) -> Result<Option<PollState>> {
        match (spec.state, plan.action) {
            (_, Action::Delete) => {
                ensure_removed(self, transport, spec).await?;
                Ok(None)
            }
            (ImageState::Present, Action::Create | Action::Update) => {
                info!(
                    image = %spec.image_name,
                    interval = ?spec.budget.interval,
                    retries = spec.budget.retries,
                    "Waiting for image import"
                );
                let poll = spec
                    .budget
                    .poller()
                    .await_terminal(|| self.progress(transport, &spec.image_name))
                    .await?;
                if poll.timed_out() {
                    warn!(
                        image = %spec.image_name,
                        elapsed = ?poll.elapsed,
                        last_status = ?poll.last_status,
                        "Image import still in progress"
                    );
                }
                Ok(Some(poll))
            }
            _ => Ok(None),
        }
    }

    fn report(
        &self,
        spec: &TenantImageParams,
        plan: &ReconciliationPlan,
        poll: Option<&PollState>,
    ) -> Report {
        let name = &spec.image_name;
        let message = match (spec.state, plan.action, poll) {
            (_, Action::Delete, _) => format!("Image {} removed.", name),
            (ImageState::Absent, _, _) => format!("Image {} is not present.", name),
            (_, Action::NoOp, _) => format!("Image {} is already present.", name),
            (ImageState::Import, _, _) => format!("Image {} import started.", name),
            (_, _, Some(p)) if p.timed_out() => format!(
                "Image {} import still in progress after {}s.",
                name,
                p.elapsed.as_secs()
            ),
            _ => format!("Image {} import successful.", name),
        };
        report(plan, poll)
            .field("image_name", Some(name))
            .field("remote_path", spec.remote_path.as_ref())
            .field("message", Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "BIGIP-bigip14.1.x-miro-14.1.2.5-0.0.336.ALL-VELOS.qcow2.zip";

    fn raw(value: Value) -> RawParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_poll_budget() {
        let budget = PollBudget::from_timeout(600);
        assert_eq!(budget.interval, Duration::from_secs(6));
        assert_eq!(budget.retries, 100);
        assert_eq!(PollBudget::from_timeout(300).interval, Duration::from_secs(3));
    }

    #[test]
    fn test_remote_path_join() {
        assert_eq!(join_remote_path("/test/", IMAGE), format!("/test/{}", IMAGE));
        assert_eq!(join_remote_path("/test", IMAGE), format!("/test/{}", IMAGE));
        let full = format!("/test/{}", IMAGE);
        assert_eq!(join_remote_path(&full, IMAGE), full);
    }

    #[test]
    fn test_defaults() {
        let spec = TenantImageParams::from_raw(&raw(json!({
            "image_name": IMAGE,
            "remote_host": "fake.imageserver.foo.bar.com",
            "remote_path": "/test/"
        })))
        .unwrap();
        assert_eq!(spec.state, ImageState::Import);
        assert_eq!(spec.protocol, Protocol::Scp);
        assert_eq!(spec.local_path, DEFAULT_LOCAL_PATH);
        assert_eq!(spec.budget, PollBudget::from_timeout(300));
    }

    #[test]
    fn test_validation() {
        for bad in [
            json!({ "image_name": IMAGE, "remote_path": "/test/" }),
            json!({ "image_name": IMAGE, "remote_host": "a.b", "state": "import" }),
            json!({ "image_name": IMAGE, "state": "present", "timeout": 100 }),
            json!({ "image_name": IMAGE, "state": "present", "timeout": 3601 }),
            json!({ "image_name": IMAGE, "state": "absent", "remote_host": "bad_host!" }),
            json!({ "image_name": IMAGE, "state": "absent", "protocol": "ftp" }),
            json!({ "state": "absent" }),
        ] {
            assert!(
                matches!(TenantImageParams::from_raw(&raw(bad.clone())), Err(Error::Validation(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_import_body() {
        let spec = TenantImageParams::from_raw(&raw(json!({
            "image_name": IMAGE,
            "remote_host": "fake.imageserver.foo.bar.com",
            "remote_user": "admin",
            "remote_password": "admin",
            "remote_path": "/test/",
            "local_path": "images",
        })))
        .unwrap();
        assert_eq!(
            spec.import_body(),
            json!({ "input": [{
                "protocol": "scp",
                "remote-host": "fake.imageserver.foo.bar.com",
                "remote-file": format!("/test/{}", IMAGE),
                "username": "admin",
                "password": "admin",
                "local-file": "images",
                "insecure": ""
            }]})
        );
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(
            transfer_failure_reason("Failed to download file: Peer certificate cannot be authenticated"),
            "Peer certificate cannot be authenticated"
        );
        assert_eq!(transfer_failure_reason("Failed"), "Failed");
    }
}
