//! depot_tools bootstrap.
//!
//! Resolution order:
//! 1. The configured directory (`JUMPSTART_DEPOT_TOOLS`, default `~/depot_tools`)
//! 2. System PATH (`which gclient`)
//! 3. Fresh `git clone` into the configured directory
//!
//! The resolved directory is handed to the [`Supervisor`] as a tool
//! directory; `PATH` of this process is left alone.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tracing::info;

use crate::error::ProvisionError;
use crate::process::{shell_quote, Supervisor};
use crate::settings::ProvisionSettings;

/// Where depot_tools was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepotToolsSource {
    Configured,
    SystemPath,
    ClonedNow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotTools {
    pub dir: PathBuf,
    pub source: DepotToolsSource,
}

fn is_depot_tools(dir: &Path) -> bool {
    dir.join("gclient").is_file()
}

pub fn ensure_depot_tools(
    settings: &ProvisionSettings,
    supervisor: &Supervisor,
) -> Result<DepotTools, ProvisionError> {
    let on_path = which::which("gclient")
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf));
    ensure_with(settings, supervisor, on_path)
}

fn ensure_with(
    settings: &ProvisionSettings,
    supervisor: &Supervisor,
    on_path: Option<PathBuf>,
) -> Result<DepotTools, ProvisionError> {
    let dir = &settings.depot_tools_dir;

    if is_depot_tools(dir) {
        info!(path = %dir.display(), "using depot_tools");
        return Ok(DepotTools {
            dir: dir.clone(),
            source: DepotToolsSource::Configured,
        });
    }
    if dir.exists() {
        return Err(anyhow!(
            "{} exists but is not a depot_tools checkout (no gclient).\n\
             Remove it or point JUMPSTART_DEPOT_TOOLS elsewhere.",
            dir.display()
        )
        .into());
    }

    if let Some(found) = on_path {
        info!(path = %found.display(), "using depot_tools from PATH");
        return Ok(DepotTools {
            dir: found,
            source: DepotToolsSource::SystemPath,
        });
    }

    let parent = dir
        .parent()
        .ok_or_else(|| anyhow!("depot_tools path has no parent: {}", dir.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    info!(url = %settings.depot_tools_url, path = %dir.display(), "cloning depot_tools");
    let command = format!(
        "git clone {} {}",
        shell_quote(&settings.depot_tools_url),
        shell_quote(&dir.to_string_lossy())
    );
    supervisor.run(&command, parent, true)?;

    if !is_depot_tools(dir) {
        return Err(anyhow!(
            "cloned {} but it has no gclient; check JUMPSTART_DEPOT_TOOLS_URL",
            settings.depot_tools_url
        )
        .into());
    }

    Ok(DepotTools {
        dir: dir.clone(),
        source: DepotToolsSource::ClonedNow,
    })
}
