//! Runtime settings for provisioning.
//!
//! Resolution order for each value:
//! 1. Explicit argument (CLI flag)
//! 2. `JUMPSTART_*` environment variable
//! 3. Built-in default
//!
//! Malformed environment values are errors rather than silently ignored.
//! Relative directories are resolved against the working directory, since
//! the source directory is persisted into project configurations.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::{self, Path, PathBuf};
use std::time::Duration;

use crate::acquire::CHECKOUT_DIR;

pub const DEFAULT_CHROMIUM_URL: &str = "https://chromium.googlesource.com/chromium/src.git";
pub const DEFAULT_DEPOT_TOOLS_URL: &str =
    "https://chromium.googlesource.com/chromium/tools/depot_tools.git";
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How the source tree is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMethod {
    /// `fetch` + `gclient sync` from depot_tools.
    ToolingFetch,
    /// A single `git clone`.
    DirectClone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Directory that receives the source tree and the provisioning marker.
    pub source_dir: PathBuf,
    pub depot_tools_dir: PathBuf,
    /// Where raw output of long-running steps is kept.
    pub log_dir: PathBuf,
    pub method: AcquisitionMethod,
    pub chromium_url: String,
    pub depot_tools_url: String,
    pub stall_threshold: Duration,
    pub poll_interval: Duration,
    /// Upper bound on acquisition attempts, counting corruption restarts.
    pub max_attempts: u32,
}

impl ProvisionSettings {
    /// Settings with built-in defaults only.
    pub fn new(source_dir: PathBuf, method: AcquisitionMethod) -> Self {
        Self {
            source_dir,
            depot_tools_dir: default_depot_tools_dir(),
            log_dir: default_log_dir(),
            method,
            chromium_url: DEFAULT_CHROMIUM_URL.to_string(),
            depot_tools_url: DEFAULT_DEPOT_TOOLS_URL.to_string(),
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Settings with `JUMPSTART_*` environment overrides applied.
    pub fn from_env(source_dir: Option<PathBuf>, method: AcquisitionMethod) -> Result<Self> {
        Self::from_lookup(source_dir, method, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        source_dir: Option<PathBuf>,
        method: AcquisitionMethod,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let source_dir = absolute(&source_dir.unwrap_or_else(default_source_dir))?;
        let mut settings = Self::new(source_dir, method);

        if let Some(dir) = lookup("JUMPSTART_DEPOT_TOOLS") {
            settings.depot_tools_dir = absolute(Path::new(&dir))?;
        }
        if let Some(dir) = lookup("JUMPSTART_LOG_DIR") {
            settings.log_dir = absolute(Path::new(&dir))?;
        }
        if let Some(url) = lookup("JUMPSTART_CHROMIUM_URL") {
            settings.chromium_url = url;
        }
        if let Some(url) = lookup("JUMPSTART_DEPOT_TOOLS_URL") {
            settings.depot_tools_url = url;
        }
        if let Some(secs) = parse_positive(&lookup, "JUMPSTART_STALL_SECS")? {
            settings.stall_threshold = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_positive(&lookup, "JUMPSTART_POLL_MS")? {
            settings.poll_interval = Duration::from_millis(millis);
        }
        if let Some(attempts) = parse_positive(&lookup, "JUMPSTART_MAX_ATTEMPTS")? {
            settings.max_attempts = u32::try_from(attempts)
                .with_context(|| format!("JUMPSTART_MAX_ATTEMPTS is too large: {attempts}"))?;
        }

        if settings.poll_interval >= settings.stall_threshold {
            bail!(
                "poll interval ({}ms) must be shorter than the stall threshold ({}s)",
                settings.poll_interval.as_millis(),
                settings.stall_threshold.as_secs()
            );
        }

        Ok(settings)
    }

    /// The checkout inside the source directory (`<source_dir>/src`).
    pub fn checkout_dir(&self) -> PathBuf {
        self.source_dir.join(CHECKOUT_DIR)
    }
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    path::absolute(dir).with_context(|| format!("Failed to resolve path: {}", dir.display()))
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))?;
    if value == 0 {
        bail!("{key} must be a positive integer, got '{raw}'");
    }
    Ok(Some(value))
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/chromium_src`
pub fn default_source_dir() -> PathBuf {
    home_dir().join("chromium_src")
}

/// `~/depot_tools`
pub fn default_depot_tools_dir() -> PathBuf {
    home_dir().join("depot_tools")
}

/// `~/.cache/chromium-jumpstart/logs` (or the platform equivalent).
pub fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("chromium-jumpstart")
        .join("logs")
}
