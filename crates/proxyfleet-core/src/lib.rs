//! proxyfleet core
//!
//! Keeps the registry of proxy workers and owns every mutation of it:
//!
//! - **Provision**: bring up N workers on consecutive ports
//! - **Restart**: restart the worker behind one endpoint
//! - **TerminateAll**: stop and remove every worker, exactly once at exit
//! - **Export**: write the endpoint roster for downstream consumers

pub mod controller;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod signals;

pub use controller::{
    DEFAULT_IMAGE, DEFAULT_NAME_PREFIX, DEFAULT_SEPARATOR, FleetController, ProvisionPlan,
    WorkerTemplate,
};
pub use endpoint::Endpoint;
pub use error::{FleetError, Result, TeardownFailure};
pub use lifecycle::{Disconnect, Lifecycle, ShutdownReport, ShutdownToken};
pub use registry::FleetRegistry;
pub use signals::ShutdownSignals;
