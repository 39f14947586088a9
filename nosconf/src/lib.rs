//! nosconf: declarative configuration for network operating systems.
//!
//! Declared intent for one entity (a link aggregation group, a tenant image,
//! a partition to wait for) is normalized, compared with what the device
//! reports over its RESTCONF-style API, and converged with the minimal set
//! of writes. Long-running device workflows are polled to a terminal state.

pub mod config;
pub mod driver;
pub mod error;
pub mod names;
pub mod params;
pub mod plan;
pub mod poller;
pub mod probe;
pub mod reconciler;
pub mod report;
pub mod transport;

pub use error::{Error, Result};
pub use reconciler::{apply, EntityKind};
pub use report::Report;
