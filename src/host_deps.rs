//! OS dependency installation hook.
//!
//! Runs inside the fresh checkout after acquisition, before the provisioning
//! marker is written. Only macOS has a real implementation.

use std::path::Path;

use tracing::{info, warn};

use crate::process::{ProcessError, Supervisor};

pub trait HostDependencies {
    fn name(&self) -> &'static str;

    fn install(&self, checkout: &Path, supervisor: &Supervisor) -> Result<(), ProcessError>;
}

/// `brew install ninja ccache`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacOsDependencies;

impl HostDependencies for MacOsDependencies {
    fn name(&self) -> &'static str {
        "homebrew"
    }

    fn install(&self, checkout: &Path, supervisor: &Supervisor) -> Result<(), ProcessError> {
        info!("installing build dependencies with Homebrew");
        supervisor.run("brew install ninja ccache", checkout, true)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SkipDependencies;

impl HostDependencies for SkipDependencies {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn install(&self, _checkout: &Path, _supervisor: &Supervisor) -> Result<(), ProcessError> {
        info!("skipping OS dependency installation");
        Ok(())
    }
}

/// Hook for this host. Non-macOS hosts get the no-op hook.
pub fn host_dependencies(skip: bool) -> Box<dyn HostDependencies> {
    if skip {
        return Box::new(SkipDependencies);
    }
    if cfg!(target_os = "macos") {
        Box::new(MacOsDependencies)
    } else {
        warn!(
            os = std::env::consts::OS,
            "no dependency installer for this OS; install ninja and ccache yourself"
        );
        Box::new(SkipDependencies)
    }
}
