//! Bootstrapping a Chromium checkout and scaffolding projects that build
//! against it.
//!
//! - **Provisioning** - Idempotent acquisition of the source tree, guarded by
//!   a marker file and an advisory lock
//! - **Fetch monitoring** - Streaming long-running fetches, telling slow from
//!   stuck from fatal
//! - **Acquisition strategies** - Direct `git clone` or depot_tools
//!   `fetch` + `gclient sync`
//! - **Configuration** - The typed `jumpstart.config.json` document
//! - **Build flags** - Deterministic translation into `gn` arguments
//!
//! # Architecture
//!
//! ```text
//! workflow::run_init
//!     │
//!     ├── tools: depot_tools located or cloned ──► Supervisor tool dir
//!     ├── provision::Provisioner
//!     │       ├── state: marker present? done
//!     │       ├── acquire::AcquisitionStrategy ──► fetch::StepRunner
//!     │       │                                        └── fetch::FetchMonitor
//!     │       │                                              └── process::Supervisor
//!     │       └── host_deps::HostDependencies
//!     ├── project + config: scaffold, write, load back
//!     └── flags ──► gn gen out/<project>
//! ```
//!
//! Nothing here exits the process. Failures are [`ProvisionError`] values and
//! the `jumpstart` binary decides the exit code.

pub mod acquire;
pub mod config;
pub mod error;
pub mod fetch;
pub mod flags;
pub mod host_deps;
pub mod operator;
pub mod preflight;
pub mod process;
pub mod project;
pub mod provision;
pub mod settings;
pub mod state;
pub mod tools;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::Configuration;
pub use error::ProvisionError;
pub use fetch::{FetchMonitor, FetchOutcome};
pub use operator::Operator;
pub use process::Supervisor;
pub use provision::{EnvironmentOutcome, Provisioner};
pub use settings::{AcquisitionMethod, ProvisionSettings};
pub use workflow::{run_init, InitReport, InitRequest};
