//! Project scaffolding and build file generation.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::error::ProvisionError;
use crate::flags::gn_args;
use crate::process::{shell_quote, CommandOutput, ProcessError, Supervisor};

/// Subdirectories created in every new project.
pub const PROJECT_SUBDIRS: &[&str] = &["scripts", "src"];

/// Trim `name` and check it can be used as a directory name.
pub fn validate_project_name(name: &str) -> Result<&str, ProvisionError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProvisionError::EmptyProjectName);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(ProvisionError::InvalidProjectName(name.to_string())),
    }
}

/// Create `<parent>/<name>` with its standard subdirectories. An existing
/// directory is never reused.
pub fn create_project_dir(parent: &Path, name: &str) -> Result<PathBuf, ProvisionError> {
    let project_dir = parent.join(name);
    if project_dir.exists() {
        return Err(ProvisionError::ProjectExists { path: project_dir });
    }

    for sub in PROJECT_SUBDIRS {
        let dir = project_dir.join(sub);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    info!(path = %project_dir.display(), "created project directory");
    Ok(project_dir)
}

/// `out/<name>`, relative to the checkout.
pub fn build_dir_name(name: &str) -> String {
    format!("out/{name}")
}

/// Create the project's build output directory inside the checkout.
pub fn setup_build_dir(checkout: &Path, name: &str) -> Result<PathBuf> {
    let build_dir = checkout.join(build_dir_name(name));
    fs::create_dir_all(&build_dir)
        .with_context(|| format!("Failed to create build directory {}", build_dir.display()))?;
    info!(path = %build_dir.display(), "created build directory");
    Ok(build_dir)
}

/// `gn gen 'out/<name>' --args='<flags>'`, run in the checkout.
pub fn gn_gen_command(name: &str, flags: &[String]) -> String {
    format!(
        "gn gen {} --args={}",
        shell_quote(&build_dir_name(name)),
        shell_quote(&gn_args(flags))
    )
}

pub fn generate_build_files(
    supervisor: &Supervisor,
    checkout: &Path,
    name: &str,
    flags: &[String],
) -> Result<CommandOutput, ProcessError> {
    let command = gn_gen_command(name, flags);
    info!(args = %gn_args(flags), "generating build files");
    supervisor.run(&command, checkout, true)
}
