//! SSH reachability probe.
//!
//! A partition counts as SSH-ready once its management address completes key
//! exchange and answers an authentication request. The request carries no
//! credentials; a rejection listing the allowed methods is as good as a
//! success here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::PublicKey;
use tokio::time::timeout;
use tracing::debug;

pub const SSH_PORT: u16 = 22;

const PROBE_USER: &str = "nosconf-probe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable,
    /// Connection or protocol failure; worth retrying.
    NotReady(String),
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> ProbeResult;
}

/// Partitions regenerate host keys on reinstall; any key is accepted.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Probe running an SSH client up to the authentication step.
pub struct SshProbe {
    handshake_timeout: Duration,
}

impl SshProbe {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }

    async fn handshake(&self, host: &str, port: u16) -> Result<(), russh::Error> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.handshake_timeout),
            ..Default::default()
        });

        let mut session = client::connect(config, (host, port), AcceptAnyHostKey).await?;
        let accepted = session.authenticate_none(PROBE_USER).await?;
        debug!(host, port, accepted, "SSH server answered authentication");

        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        Ok(())
    }
}

impl Default for SshProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ReachabilityProbe for SshProbe {
    async fn probe(&self, host: &str, port: u16) -> ProbeResult {
        match timeout(self.handshake_timeout, self.handshake(host, port)).await {
            Ok(Ok(())) => ProbeResult::Reachable,
            Ok(Err(e)) => ProbeResult::NotReady(format!("SSH handshake failed: {}", e)),
            Err(_) => ProbeResult::NotReady("SSH handshake timed out".to_string()),
        }
    }
}
