//! Wait for a chassis partition to come up.
//!
//! Nothing is written here; the partition is polled until it is running or
//! accepts SSH connections on its management address.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::names::encode_key;
use crate::params::{get_choice, get_int_in, get_str, reject_unknown, require_str, RawParams};
use crate::poller::{Poller, Tick};
use crate::probe::{ProbeResult, ReachabilityProbe, SSH_PORT};
use crate::report::Report;
use crate::transport::Transport;

pub const DEFAULT_DELAY: u64 = 0;
pub const DEFAULT_SLEEP: u64 = 1;
pub const DEFAULT_TIMEOUT: u64 = 600;
const MAX_SECONDS: i64 = 86_400;

const ALLOWED: &[&str] = &["name", "state", "delay", "sleep", "timeout", "msg"];

pub fn partition_path(name: &str) -> String {
    format!("/f5-system-partition:partitions/partition={}", encode_key(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Running,
    SshReady,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::Running => write!(f, "running"),
            WaitState::SshReady => write!(f, "ssh-ready"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionWaitParams {
    pub name: String,
    pub state: WaitState,
    pub delay: u64,
    pub sleep: u64,
    pub timeout: u64,
    pub msg: Option<String>,
}

impl PartitionWaitParams {
    pub fn from_raw(raw: &RawParams) -> Result<Self> {
        reject_unknown(raw, ALLOWED, "partition wait")?;

        let seconds = |key: &str, default: u64| -> Result<u64> {
            Ok(get_int_in(raw, key, 0, MAX_SECONDS)?.map_or(default, |v| v as u64))
        };
        let delay = seconds("delay", DEFAULT_DELAY)?;
        let sleep = seconds("sleep", DEFAULT_SLEEP)?;
        let timeout = seconds("timeout", DEFAULT_TIMEOUT)?;

        if delay >= timeout {
            return Err(Error::validation(
                "The delay should not be greater than or equal to the timeout.",
            ));
        }
        if delay + sleep >= timeout {
            return Err(Error::validation(
                "The combined delay and sleep should not be greater than or equal to the timeout.",
            ));
        }

        let state = match get_choice(raw, "state", &["running", "ssh-ready"])? {
            Some(1) => WaitState::SshReady,
            _ => WaitState::Running,
        };

        Ok(Self {
            name: require_str(raw, "name")?,
            state,
            delay,
            sleep,
            timeout,
            msg: get_str(raw, "msg")?,
        })
    }

    fn timeout_message(&self) -> String {
        self.msg.clone().unwrap_or_else(|| {
            format!(
                "Timeout waiting for partition {} to reach state {}",
                self.name, self.state
            )
        })
    }
}

/// Management address from a partition document, IPv4 preferred.
fn management_address(partition: &serde_json::Value) -> Option<&str> {
    let mgmt = &partition["config"]["mgmt-ip"];
    mgmt["ipv4"]["address"]
        .as_str()
        .or_else(|| mgmt["ipv6"]["address"].as_str())
        .filter(|a| !a.is_empty())
}

/// Polls one partition until it reaches the requested state.
pub struct PartitionWait<'a> {
    transport: &'a dyn Transport,
    probe: &'a dyn ReachabilityProbe,
}

impl<'a> PartitionWait<'a> {
    pub fn new(transport: &'a dyn Transport, probe: &'a dyn ReachabilityProbe) -> Self {
        Self { transport, probe }
    }

    /// Wait for `spec`. Never reports a change; running out of time is an
    /// error carrying the elapsed seconds.
    pub async fn run(&self, spec: &PartitionWaitParams) -> Result<Report> {
        info!(
            partition = %spec.name,
            state = %spec.state,
            delay = spec.delay,
            sleep = spec.sleep,
            timeout = spec.timeout,
            "Waiting for partition"
        );

        let poll = Poller::new(
            Duration::from_secs(spec.sleep),
            Duration::from_secs(spec.timeout),
        )
        .with_initial_delay(Duration::from_secs(spec.delay))
        .await_terminal(|| self.check(spec))
        .await?;

        if poll.timed_out() {
            return Err(Error::Timeout {
                message: spec.timeout_message(),
                elapsed: poll.elapsed.as_secs(),
            });
        }

        info!(partition = %spec.name, elapsed = ?poll.elapsed, "Partition ready");
        Ok(Report::new(false).field("elapsed", Some(poll.elapsed.as_secs())))
    }

    async fn check(&self, spec: &PartitionWaitParams) -> Result<Tick> {
        let response = self.transport.get(&partition_path(&spec.name)).await?;
        if response.is_not_found() {
            debug!(partition = %spec.name, "Partition does not exist yet");
            return Ok(Tick::Continue("absent".to_string()));
        }
        let response = response.error_for_status()?;
        let Some(partition) = response.contents["f5-system-partition:partition"].get(0) else {
            return Ok(Tick::Continue("absent".to_string()));
        };

        let status = partition["state"]["status"].as_str().unwrap_or_default();
        debug!(partition = %spec.name, status, "Partition status");

        match spec.state {
            WaitState::Running if status == "running" => Ok(Tick::Success(status.to_string())),
            WaitState::Running => Ok(Tick::Continue(status.to_string())),
            WaitState::SshReady => {
                let Some(address) = management_address(partition) else {
                    return Ok(Tick::Continue("no management address".to_string()));
                };
                match self.probe.probe(address, SSH_PORT).await {
                    ProbeResult::Reachable => Ok(Tick::Success("ssh-ready".to_string())),
                    ProbeResult::NotReady(reason) => {
                        debug!(partition = %spec.name, address, reason = %reason, "SSH not ready");
                        Ok(Tick::Continue(reason))
                    }
                }
            }
        }
    }
}
