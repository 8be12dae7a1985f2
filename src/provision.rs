//! Provisioning orchestrator.
//!
//! `ensure_environment` is idempotent: once the provisioning marker exists,
//! later runs return immediately. Otherwise the source tree is acquired in a
//! bounded loop of attempts, OS dependencies are installed, and the marker
//! is written last.
//!
//! A failed attempt (stall, fatal output, non-zero exit, missing `src`) or a
//! corrupted tree is put to the operator: delete the tree and try again, or
//! stop and keep it for inspection. The final allowed attempt does not ask;
//! it ends in [`ProvisionError::RetryLimitExceeded`] with the tree kept.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use fs2::FileExt;
use tracing::{debug, error, info, warn};

use crate::acquire::{find_corruption, AcquisitionStrategy};
use crate::error::ProvisionError;
use crate::fetch::StepRunner;
use crate::host_deps::HostDependencies;
use crate::operator::Operator;
use crate::process::Supervisor;
use crate::settings::ProvisionSettings;
use crate::state;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentOutcome {
    /// Marker present; nothing was done.
    AlreadyProvisioned,
    ProvisionedNow { attempts: u32 },
}

/// Exclusive advisory lock on a source directory, held while provisioning.
#[derive(Debug)]
pub struct ProvisionLock {
    _file: File,
    path: PathBuf,
}

impl ProvisionLock {
    /// `<parent>/.<name>.jumpstart.lock`, beside the source directory so
    /// deleting the tree does not drop the lock.
    pub fn path_for(source_dir: &Path) -> PathBuf {
        let name = source_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let parent = source_dir.parent().unwrap_or(Path::new("."));
        parent.join(format!(".{name}.jumpstart.lock"))
    }

    pub fn acquire(source_dir: &Path) -> Result<Self, ProvisionError> {
        let path = Self::path_for(source_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // The lock file is never unlinked: a second process could otherwise
        // lock a fresh file at the same path while this one still holds the old.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(ProvisionError::Locked {
                path: source_dir.to_path_buf(),
            });
        }
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct Provisioner<'a> {
    settings: &'a ProvisionSettings,
    strategy: &'a dyn AcquisitionStrategy,
    host_deps: &'a dyn HostDependencies,
    supervisor: &'a Supervisor,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        settings: &'a ProvisionSettings,
        strategy: &'a dyn AcquisitionStrategy,
        host_deps: &'a dyn HostDependencies,
        supervisor: &'a Supervisor,
    ) -> Self {
        Self {
            settings,
            strategy,
            host_deps,
            supervisor,
        }
    }

    fn source_dir(&self) -> &Path {
        &self.settings.source_dir
    }

    pub fn ensure_environment(
        &self,
        runner: &mut dyn StepRunner,
        operator: &mut dyn Operator,
    ) -> Result<EnvironmentOutcome, ProvisionError> {
        let source_dir = self.source_dir();
        if state::is_provisioned(source_dir) {
            info!(path = %source_dir.display(), "environment already provisioned");
            return Ok(EnvironmentOutcome::AlreadyProvisioned);
        }

        let lock = ProvisionLock::acquire(source_dir)?;
        debug!(lock = %lock.path().display(), "holding provisioning lock");
        // Another run may have finished before the lock was taken.
        if state::is_provisioned(source_dir) {
            return Ok(EnvironmentOutcome::AlreadyProvisioned);
        }

        let attempts = self.acquire_with_retries(runner, operator)?;

        let checkout = source_dir.join(self.strategy.expected_entry());
        info!(hook = self.host_deps.name(), "installing OS dependencies");
        self.host_deps.install(&checkout, self.supervisor)?;

        state::mark_provisioned(source_dir, self.strategy.name(), attempts)?;
        info!(path = %source_dir.display(), attempts, "environment provisioned");
        Ok(EnvironmentOutcome::ProvisionedNow { attempts })
    }

    fn acquire_with_retries(
        &self,
        runner: &mut dyn StepRunner,
        operator: &mut dyn Operator,
    ) -> Result<u32, ProvisionError> {
        let max_attempts = self.settings.max_attempts;

        for attempt in 1..=max_attempts {
            info!(
                attempt,
                max_attempts,
                strategy = self.strategy.name(),
                "acquiring source tree"
            );

            let failure = match self.attempt(runner, operator) {
                Ok(()) => match find_corruption(self.source_dir()) {
                    None => return Ok(attempt),
                    Some(marker) => ProvisionError::Corrupted {
                        path: self.source_dir().to_path_buf(),
                        marker,
                    },
                },
                Err(err) if err.is_attempt_failure() => err,
                Err(err) => return Err(err),
            };
            error!(attempt, "acquisition attempt failed: {failure}");

            if attempt == max_attempts {
                return Err(ProvisionError::RetryLimitExceeded {
                    path: self.source_dir().to_path_buf(),
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }
            self.offer_restart(failure, operator)?;
        }

        Err(anyhow!("max_attempts must be at least 1").into())
    }

    fn attempt(
        &self,
        runner: &mut dyn StepRunner,
        operator: &mut dyn Operator,
    ) -> Result<(), ProvisionError> {
        self.strategy.acquire(self.source_dir(), runner, operator)?;

        let expected = self.source_dir().join(self.strategy.expected_entry());
        if !expected.exists() {
            return Err(ProvisionError::IncompleteTree { path: expected });
        }
        Ok(())
    }

    /// Ask whether to wipe the tree and go again. Declining ends provisioning.
    fn offer_restart(
        &self,
        failure: ProvisionError,
        operator: &mut dyn Operator,
    ) -> Result<(), ProvisionError> {
        let source_dir = self.source_dir();
        let question = match &failure {
            ProvisionError::Corrupted { marker, .. } => format!(
                "Found '{}'; the checkout looks corrupted. Delete '{}' and start over?",
                marker.display(),
                source_dir.display()
            ),
            other => format!(
                "Acquisition failed: {other}. Delete '{}' and retry?",
                source_dir.display()
            ),
        };

        if !operator.confirm(&question)? {
            return Err(match failure {
                ProvisionError::Corrupted { path, marker } => {
                    ProvisionError::CorruptionDeclined { path, marker }
                }
                cause => ProvisionError::Abandoned {
                    path: source_dir.to_path_buf(),
                    cause: Box::new(cause),
                },
            });
        }

        warn!(path = %source_dir.display(), "deleting partial source tree");
        if source_dir.exists() {
            fs::remove_dir_all(source_dir)
                .with_context(|| format!("Failed to delete {}", source_dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{DirectClone, CHECKOUT_DIR};
    use crate::fetch::FetchOutcome;
    use crate::host_deps::SkipDependencies;
    use crate::process::ProcessError;
    use crate::settings::AcquisitionMethod;
    use crate::testing::{Effect, ScriptedOperator, ScriptedRunner};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        settings: ProvisionSettings,
        strategy: DirectClone,
        supervisor: Supervisor,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let settings = ProvisionSettings::new(
                temp.path().join("chromium_src"),
                AcquisitionMethod::DirectClone,
            );
            Self {
                _temp: temp,
                settings,
                strategy: DirectClone::new("https://example.test/src.git"),
                supervisor: Supervisor::new(),
            }
        }

        fn source_dir(&self) -> &Path {
            &self.settings.source_dir
        }

        fn run(
            &self,
            runner: &mut ScriptedRunner,
            operator: &mut ScriptedOperator,
        ) -> Result<EnvironmentOutcome, ProvisionError> {
            self.run_with(&SkipDependencies, runner, operator)
        }

        fn run_with(
            &self,
            deps: &dyn HostDependencies,
            runner: &mut ScriptedRunner,
            operator: &mut ScriptedOperator,
        ) -> Result<EnvironmentOutcome, ProvisionError> {
            Provisioner::new(&self.settings, &self.strategy, deps, &self.supervisor)
                .ensure_environment(runner, operator)
        }
    }

    fn failed() -> FetchOutcome {
        FetchOutcome::Failed {
            exit_code: 128,
            last_line: None,
        }
    }

    #[test]
    fn second_run_skips_acquisition() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::CreateCheckout);
        let mut operator = ScriptedOperator::new();

        let first = fixture.run(&mut runner, &mut operator).unwrap();
        let second = fixture.run(&mut runner, &mut operator).unwrap();

        assert_eq!(first, EnvironmentOutcome::ProvisionedNow { attempts: 1 });
        assert_eq!(second, EnvironmentOutcome::AlreadyProvisioned);
        assert_eq!(runner.commands().len(), 1);
        assert!(state::is_provisioned(fixture.source_dir()));
        assert!(operator.questions().is_empty());
    }

    #[test]
    fn existing_directory_without_marker_is_acquired() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.source_dir().join(CHECKOUT_DIR)).unwrap();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::CreateCheckout);

        let outcome = fixture
            .run(&mut runner, &mut ScriptedOperator::new())
            .unwrap();

        assert_eq!(outcome, EnvironmentOutcome::ProvisionedNow { attempts: 1 });
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn corruption_restarts_from_a_clean_tree() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::Corrupt)
            .then(FetchOutcome::Completed, Effect::CreateCheckout);
        let mut operator = ScriptedOperator::new().confirm_answers([true]);

        let outcome = fixture.run(&mut runner, &mut operator).unwrap();

        assert_eq!(outcome, EnvironmentOutcome::ProvisionedNow { attempts: 2 });
        assert!(operator.questions()[0].contains("corrupted"));
        assert!(find_corruption(fixture.source_dir()).is_none());
        assert_eq!(
            state::read_record(fixture.source_dir())
                .unwrap()
                .unwrap()
                .attempts,
            2
        );
    }

    #[test]
    fn declined_corruption_recovery_aborts_without_marker() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::Corrupt);
        let mut operator = ScriptedOperator::new().confirm_answers([false]);

        let err = fixture.run(&mut runner, &mut operator).unwrap_err();

        assert!(matches!(err, ProvisionError::CorruptionDeclined { .. }));
        assert!(!state::is_provisioned(fixture.source_dir()));
        assert!(find_corruption(fixture.source_dir()).is_some());
    }

    #[test]
    fn persistent_corruption_hits_retry_limit() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::Corrupt)
            .then(FetchOutcome::Completed, Effect::Corrupt)
            .then(FetchOutcome::Completed, Effect::Corrupt);
        let mut operator = ScriptedOperator::new().confirm_answers([true, true]);

        let err = fixture.run(&mut runner, &mut operator).unwrap_err();

        match err {
            ProvisionError::RetryLimitExceeded { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ProvisionError::Corrupted { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.commands().len(), 3);
        assert_eq!(operator.questions().len(), 2);
        assert!(!state::is_provisioned(fixture.source_dir()));
    }

    #[test]
    fn failure_then_retry_succeeds() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(failed(), Effect::Nothing)
            .then(FetchOutcome::Completed, Effect::CreateCheckout);
        let mut operator = ScriptedOperator::new().confirm_answers([true]);

        let outcome = fixture.run(&mut runner, &mut operator).unwrap();

        assert_eq!(outcome, EnvironmentOutcome::ProvisionedNow { attempts: 2 });
        assert!(operator.questions()[0].contains("retry"));
    }

    #[test]
    fn declined_retry_keeps_partial_tree() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir()).then(
            FetchOutcome::FatalError {
                line: "fatal: early EOF".to_string(),
            },
            Effect::Nothing,
        );
        let mut operator = ScriptedOperator::new().confirm_answers([false]);

        let err = fixture.run(&mut runner, &mut operator).unwrap_err();

        match err {
            ProvisionError::Abandoned { cause, .. } => {
                assert!(matches!(*cause, ProvisionError::FatalOutput { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fixture.source_dir().is_dir());
        assert!(!state::is_provisioned(fixture.source_dir()));
    }

    #[test]
    fn zero_exit_without_checkout_is_incomplete() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::Nothing);
        let mut operator = ScriptedOperator::new().confirm_answers([false]);

        let err = fixture.run(&mut runner, &mut operator).unwrap_err();

        match err {
            ProvisionError::Abandoned { cause, .. } => {
                assert!(matches!(*cause, ProvisionError::IncompleteTree { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct FailingDeps;

    impl HostDependencies for FailingDeps {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn install(&self, _checkout: &Path, _supervisor: &Supervisor) -> Result<(), ProcessError> {
            Err(ProcessError::NonZeroExit {
                command: "brew install ninja ccache".to_string(),
                code: 1,
                stderr: "no network".to_string(),
            })
        }
    }

    #[test]
    fn dependency_failure_leaves_no_marker() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(fixture.source_dir())
            .then(FetchOutcome::Completed, Effect::CreateCheckout);

        let err = fixture
            .run_with(&FailingDeps, &mut runner, &mut ScriptedOperator::new())
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Process(ProcessError::NonZeroExit { .. })
        ));
        assert!(!state::is_provisioned(fixture.source_dir()));
    }

    #[test]
    fn concurrent_run_is_rejected() {
        let fixture = Fixture::new();
        let held = ProvisionLock::acquire(fixture.source_dir()).unwrap();
        assert!(held.path().ends_with(".chromium_src.jumpstart.lock"));
        let mut runner = ScriptedRunner::new(fixture.source_dir());

        let err = fixture
            .run(&mut runner, &mut ScriptedOperator::new())
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Locked { .. }));
        assert!(runner.commands().is_empty());
    }
}
