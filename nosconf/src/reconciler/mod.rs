//! Reconcilers for the different entity types.
//!
//! Each reconciler compares declared intent with observed device state and
//! says what has to be done; [`crate::driver::converge`] does the rest.

pub mod lag;
pub mod partition_wait;
pub mod tenant_image;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::driver::converge;
use crate::error::{Error, Result};
use crate::params::RawParams;
use crate::plan::{Action, Attrs, Operation, ReconciliationPlan, Target};
use crate::poller::PollState;
use crate::probe::ReachabilityProbe;
use crate::report::{report, Report};
use crate::transport::{ApiResponse, Transport};

pub use lag::{LagParams, LagReconciler};
pub use partition_wait::{PartitionWait, PartitionWaitParams};
pub use tenant_image::{TenantImageParams, TenantImageReconciler};

/// Trait for entity reconcilers driven by [`converge`].
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Normalized declared intent.
    type Spec: Send + Sync;

    /// Short entity name for logs.
    fn kind(&self) -> &'static str;

    fn target(&self, spec: &Self::Spec) -> Target;

    /// Checks that must pass before anything is read or written.
    async fn preflight(&self, _transport: &dyn Transport, _spec: &Self::Spec) -> Result<()> {
        Ok(())
    }

    /// Observed attributes, `None` if the entity does not exist.
    async fn observe(&self, transport: &dyn Transport, spec: &Self::Spec)
        -> Result<Option<Attrs>>;

    /// Supplied desired attributes.
    fn desired(&self, spec: &Self::Spec) -> Attrs;

    /// Ordered writes for the plan.
    fn operations(&self, spec: &Self::Spec, plan: &ReconciliationPlan) -> Result<Vec<Operation>>;

    /// Judge a write response. Non-2xx is a device error by default.
    fn check_response(
        &self,
        _spec: &Self::Spec,
        _op: &Operation,
        response: ApiResponse,
    ) -> Result<()> {
        response.error_for_status().map(|_| ())
    }

    /// Confirm the plan took effect. Deletes are re-read by default; other
    /// writes are trusted.
    async fn verify(
        &self,
        transport: &dyn Transport,
        spec: &Self::Spec,
        plan: &ReconciliationPlan,
    ) -> Result<Option<PollState>> {
        if plan.action == Action::Delete {
            ensure_removed(self, transport, spec).await?;
        }
        Ok(None)
    }

    fn report(
        &self,
        _spec: &Self::Spec,
        plan: &ReconciliationPlan,
        poll: Option<&PollState>,
    ) -> Report {
        report(plan, poll)
    }
}

/// Re-read after a delete; the entity must be gone.
pub async fn ensure_removed<R: Reconciler + ?Sized>(
    reconciler: &R,
    transport: &dyn Transport,
    spec: &R::Spec,
) -> Result<()> {
    if reconciler.observe(transport, spec).await?.is_some() {
        return Err(Error::device("Failed to delete the resource."));
    }
    Ok(())
}

/// Entity types the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Lag,
    TenantImage,
    PartitionWait,
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lag" => Ok(EntityKind::Lag),
            "tenant-image" | "tenant_image" => Ok(EntityKind::TenantImage),
            "partition-wait" | "partition_wait" => Ok(EntityKind::PartitionWait),
            other => Err(Error::validation(format!("unknown entity type: {}", other))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Lag => write!(f, "lag"),
            EntityKind::TenantImage => write!(f, "tenant-image"),
            EntityKind::PartitionWait => write!(f, "partition-wait"),
        }
    }
}

/// Normalize `raw` for `kind` and reconcile it against the device.
///
/// Validation happens before the first device call.
pub async fn apply(
    kind: EntityKind,
    raw: &RawParams,
    transport: &dyn Transport,
    probe: &dyn ReachabilityProbe,
) -> Result<Report> {
    match kind {
        EntityKind::Lag => {
            let spec = LagParams::from_raw(raw)?;
            converge(&LagReconciler, transport, &spec).await
        }
        EntityKind::TenantImage => {
            let spec = TenantImageParams::from_raw(raw)?;
            converge(&TenantImageReconciler, transport, &spec).await
        }
        EntityKind::PartitionWait => {
            let spec = PartitionWaitParams::from_raw(raw)?;
            PartitionWait::new(transport, probe).run(&spec).await
        }
    }
}
