//! The `init` workflow: provision the environment, scaffold a project, and
//! generate its build files.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::acquire::strategy_for;
use crate::config::{self, Configuration};
use crate::error::ProvisionError;
use crate::fetch::{FetchMonitor, MonitoredRunner};
use crate::flags;
use crate::host_deps::HostDependencies;
use crate::operator::Operator;
use crate::process::Supervisor;
use crate::project;
use crate::provision::{EnvironmentOutcome, Provisioner};
use crate::settings::ProvisionSettings;
use crate::tools::{ensure_depot_tools, DepotTools};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    /// Prompted for when absent.
    pub name: Option<String>,
    /// Directory that receives the project directory.
    pub parent_dir: PathBuf,
    /// Configuration document to start from instead of the default.
    pub seed_config: Option<PathBuf>,
}

/// A freshly created project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    pub name: String,
    pub project_dir: PathBuf,
    pub config_path: PathBuf,
    pub build_dir: PathBuf,
    /// `None` when the configuration could not be read back.
    pub flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub depot_tools: DepotTools,
    pub environment: EnvironmentOutcome,
    pub checkout: PathBuf,
    pub scaffold: Scaffold,
    pub build_files_generated: bool,
}

/// Fail before any download if a name given up front is unusable.
fn precheck(request: &InitRequest) -> Result<(), ProvisionError> {
    let Some(name) = request.name.as_deref() else {
        return Ok(());
    };
    let name = project::validate_project_name(name)?;
    let project_dir = request.parent_dir.join(name);
    if project_dir.exists() {
        return Err(ProvisionError::ProjectExists { path: project_dir });
    }
    Ok(())
}

fn starting_config(seed: Option<&Path>) -> Configuration {
    match seed {
        Some(path) => {
            info!(path = %path.display(), "starting from configuration file");
            config::validate(path)
        }
        None => config::generate(),
    }
}

/// Create the project directory, its configuration and its build directory.
pub fn scaffold_project(
    request: &InitRequest,
    settings: &ProvisionSettings,
    operator: &mut dyn Operator,
) -> Result<Scaffold, ProvisionError> {
    let answer = match &request.name {
        Some(name) => name.clone(),
        None => operator.ask("Enter your project name:")?,
    };
    let name = project::validate_project_name(&answer)?.to_string();
    info!(project = %name, "initializing project");

    let project_dir = project::create_project_dir(&request.parent_dir, &name)?;

    let mut config = starting_config(request.seed_config.as_deref());
    config.metadata.name = name.clone();
    config.paths.chromium_src = settings.source_dir.clone();
    let config_path = config::write(&project_dir, &config)?;

    let build_dir = project::setup_build_dir(&settings.checkout_dir(), &name)?;

    let flags = config::load(&project_dir)?.map(|loaded| flags::translate(&loaded.build));

    Ok(Scaffold {
        name,
        project_dir,
        config_path,
        build_dir,
        flags,
    })
}

pub fn run_init(
    request: &InitRequest,
    settings: &ProvisionSettings,
    host_deps: &dyn HostDependencies,
    operator: &mut dyn Operator,
) -> Result<InitReport, ProvisionError> {
    precheck(request)?;

    let tools = ensure_depot_tools(settings, &Supervisor::new())?;
    let supervisor = Supervisor::new().with_tool_dir(&tools.dir);

    let strategy = strategy_for(settings);
    let mut runner = MonitoredRunner::new(
        supervisor.clone(),
        FetchMonitor::new(settings.poll_interval),
        settings.stall_threshold,
    )
    .with_log_dir(&settings.log_dir);

    let environment = Provisioner::new(settings, strategy.as_ref(), host_deps, &supervisor)
        .ensure_environment(&mut runner, operator)?;

    let scaffold = scaffold_project(request, settings, operator)?;
    let checkout = settings.checkout_dir();

    let build_files_generated = match &scaffold.flags {
        Some(flags) => {
            project::generate_build_files(&supervisor, &checkout, &scaffold.name, flags)?;
            true
        }
        None => {
            warn!("no configuration file found; skipping build file generation");
            false
        }
    };

    Ok(InitReport {
        depot_tools: tools,
        environment,
        checkout,
        scaffold,
        build_files_generated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationLevel;
    use crate::host_deps::SkipDependencies;
    use crate::settings::AcquisitionMethod;
    use crate::state;
    use crate::testing::ScriptedOperator;
    use crate::tools::DepotToolsSource;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProvisionSettings) {
        let temp = TempDir::new().unwrap();
        let settings =
            ProvisionSettings::new(temp.path().join("chromium_src"), AcquisitionMethod::ToolingFetch);
        (temp, settings)
    }

    fn request(temp: &TempDir, name: Option<&str>) -> InitRequest {
        InitRequest {
            name: name.map(str::to_string),
            parent_dir: temp.path().join("projects"),
            seed_config: None,
        }
    }

    #[test]
    fn prompted_name_drives_the_layout() {
        let (temp, settings) = setup();
        let mut operator = ScriptedOperator::new().ask_answers(["  browser  "]);

        let scaffold = scaffold_project(&request(&temp, None), &settings, &mut operator).unwrap();

        assert_eq!(scaffold.name, "browser");
        assert_eq!(operator.questions().to_vec(), vec!["Enter your project name:"]);
        assert!(scaffold.project_dir.join("scripts").is_dir());
        assert!(scaffold.build_dir.ends_with("chromium_src/src/out/browser"));

        let written = config::load(&scaffold.project_dir).unwrap().unwrap();
        assert_eq!(written.metadata.name, "browser");
        assert_eq!(written.paths.chromium_src, settings.source_dir);
        assert_eq!(
            scaffold.flags.unwrap(),
            flags::translate(&config::generate().build)
        );
    }

    #[test]
    fn empty_prompted_name_is_rejected() {
        let (temp, settings) = setup();
        let mut operator = ScriptedOperator::new().ask_answers([""]);

        let err = scaffold_project(&request(&temp, None), &settings, &mut operator).unwrap_err();

        assert!(matches!(err, ProvisionError::EmptyProjectName));
        assert!(!temp.path().join("projects").exists());
    }

    #[test]
    fn seed_configuration_is_kept_apart_from_name_and_source() {
        let (temp, settings) = setup();
        let mut seed = config::generate();
        seed.metadata.description = "Hardened build".to_string();
        seed.build.optimization_level = OptimizationLevel::O0;
        seed.build.custom_build_flags = Some("symbol_level=0".to_string());
        let seed_dir = temp.path().join("seed");
        fs::create_dir_all(&seed_dir).unwrap();
        let seed_path = config::write(&seed_dir, &seed).unwrap();

        let mut req = request(&temp, Some("hardened"));
        req.seed_config = Some(seed_path);
        let scaffold = scaffold_project(&req, &settings, &mut ScriptedOperator::new()).unwrap();

        let written = config::load(&scaffold.project_dir).unwrap().unwrap();
        assert_eq!(written.metadata.description, "Hardened build");
        assert_eq!(written.metadata.name, "hardened");
        let flags = scaffold.flags.unwrap();
        assert_eq!(flags.first().map(String::as_str), Some("is_optimized=false"));
        assert_eq!(flags.last().map(String::as_str), Some("symbol_level=0"));
    }

    #[test]
    fn precheck_rejects_existing_project_before_any_work() {
        let (temp, _) = setup();
        fs::create_dir_all(temp.path().join("projects/browser")).unwrap();

        let err = precheck(&request(&temp, Some("browser"))).unwrap_err();
        assert!(matches!(err, ProvisionError::ProjectExists { .. }));

        precheck(&request(&temp, None)).unwrap();
        precheck(&request(&temp, Some("fresh"))).unwrap();
    }

    fn install_stub(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn gn_invocations(tools: &Path) -> Vec<String> {
        fs::read_to_string(tools.join("gn.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn repeated_init_skips_provisioning_and_generates_build_files() {
        let (temp, mut settings) = setup();
        let tools = temp.path().join("depot_tools");
        fs::create_dir_all(&tools).unwrap();
        install_stub(&tools, "gclient", "exit 0");
        install_stub(&tools, "gn", r#"echo "$*" >> "$(dirname "$0")/gn.log""#);
        settings.depot_tools_dir = tools.clone();
        fs::create_dir_all(settings.checkout_dir()).unwrap();
        state::mark_provisioned(&settings.source_dir, "tooling-fetch", 1).unwrap();

        for name in ["alpha", "beta"] {
            let mut operator = ScriptedOperator::new();
            let report = run_init(
                &request(&temp, Some(name)),
                &settings,
                &SkipDependencies,
                &mut operator,
            )
            .unwrap();

            assert_eq!(report.environment, EnvironmentOutcome::AlreadyProvisioned);
            assert_eq!(report.depot_tools.source, DepotToolsSource::Configured);
            assert_eq!(report.depot_tools.dir, tools);
            assert!(report.build_files_generated);
            assert!(report.scaffold.config_path.is_file());
            assert!(settings.checkout_dir().join("out").join(name).is_dir());
            assert!(operator.questions().is_empty());
        }

        let invocations = gn_invocations(&tools);
        assert_eq!(invocations.len(), 2);
        assert!(invocations[0].starts_with("gen out/alpha --args=is_optimized=true is_debug=false"));
        assert!(invocations[1].starts_with("gen out/beta --args=is_optimized=true"));
    }

    #[test]
    fn existing_project_name_fails_before_tools_or_downloads() {
        let (temp, mut settings) = setup();
        fs::create_dir_all(temp.path().join("projects/alpha")).unwrap();
        settings.depot_tools_dir = temp.path().join("missing/depot_tools");
        settings.depot_tools_url = temp.path().join("no-such-repo").display().to_string();

        let err = run_init(
            &request(&temp, Some("alpha")),
            &settings,
            &SkipDependencies,
            &mut ScriptedOperator::new(),
        )
        .unwrap_err();

        assert!(matches!(err, ProvisionError::ProjectExists { .. }));
        assert!(!temp.path().join("missing").exists());
        assert!(!settings.source_dir.exists());
    }
}
