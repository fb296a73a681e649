//! Core library for the `minihost` local cluster host manager.
//!
//! The crate exposes a driver abstraction over the backends that can host a
//! single Kubernetes node (a privileged docker or podman container, a
//! `VirtualBox` VM, or the local machine itself), a file-backed store of host
//! records, and a reconciler that walks a machine from "absent" or "stopped"
//! to "provisioned and ready" with retries.

pub mod config;
pub mod driver;
pub mod exec;
pub mod host;
pub mod mount;
pub mod oci;
pub mod provision;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod ssh;
pub mod state;
pub mod sysinit;
pub mod test_support;
pub mod virtualbox;

pub use config::{ConfigError, MachineConfig};
pub use driver::{Driver, DriverConfig, DriverError, MachineDriver};
pub use exec::{CommandRunner, ExecError, ProcessCommandRunner, RunResult};
pub use host::{FileHostStore, Host, HostStore, HostStoreError};
pub use provision::{GuestProvisioner, ProvisionError, Provisioner};
pub use reconcile::{FixFailure, FixOptions, FixReport, Phase, ReconcileError, Reconciler};
pub use registry::{DriverFactory, DriverRegistry};
pub use retry::{Backoff, Transient};
pub use state::State;
