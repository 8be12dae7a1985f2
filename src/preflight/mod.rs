//! Host checks run before any download.
//!
//! Acquisition takes hours; a missing `git` should fail in the first second,
//! with the package to install.
//!
//! ```rust
//! use chromium_jumpstart::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("git") {
//!     println!("git not installed");
//! }
//!
//! let tools = &[("git", "git"), ("python3", "python3")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every run needs, as (command_name, package_name).
///
/// depot_tools itself is not listed; it is cloned on demand.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("git", "git"), ("python3", "python3")];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}
