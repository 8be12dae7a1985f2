//! Running acquisition steps under the monitor, with the operator in the loop.

use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{info, warn};

use super::{Clock, FetchMonitor, FetchOutcome, FetchSession, SystemClock};
use crate::error::ProvisionError;
use crate::operator::Operator;
use crate::process::{Channel, OutputSource, Supervisor};

/// One long-running command of an acquisition strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStep {
    /// Short name, used for log file names.
    pub label: String,
    pub command: String,
    pub cwd: PathBuf,
    pub channel: Channel,
}

impl FetchStep {
    pub fn new(
        label: impl Into<String>,
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
        channel: Channel,
    ) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            cwd: cwd.into(),
            channel,
        }
    }
}

/// Executes fetch steps. Strategies only describe steps; this runs them.
pub trait StepRunner {
    fn run_step(
        &mut self,
        step: &FetchStep,
        operator: &mut dyn Operator,
    ) -> Result<FetchOutcome, ProvisionError>;
}

/// Runs steps as real child processes watched by a [`FetchMonitor`].
///
/// A stall is put to the operator: keep waiting resumes the same child,
/// declining kills it and reports the stall.
pub struct MonitoredRunner<C: Clock = SystemClock> {
    supervisor: Supervisor,
    monitor: FetchMonitor<C>,
    stall_threshold: Duration,
    log_dir: Option<PathBuf>,
}

impl<C: Clock> MonitoredRunner<C> {
    pub fn new(supervisor: Supervisor, monitor: FetchMonitor<C>, stall_threshold: Duration) -> Self {
        Self {
            supervisor,
            monitor,
            stall_threshold,
            log_dir: None,
        }
    }

    /// Keep the raw output of every step under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn open_log(&self, step: &FetchStep) -> Option<File> {
        let dir = self.log_dir.as_ref()?;
        let stamp = OffsetDateTime::now_utc().unix_timestamp();
        let path = dir.join(format!("{}-{stamp}.log", step.label));
        match fs::create_dir_all(dir).and_then(|()| File::create(&path)) {
            Ok(file) => {
                info!(step = %step.label, log = %path.display(), "logging step output");
                Some(file)
            }
            Err(err) => {
                warn!(log = %path.display(), "cannot create step log: {err}");
                None
            }
        }
    }

    fn drive(
        &self,
        session: &mut FetchSession,
        source: &mut dyn OutputSource,
        operator: &mut dyn Operator,
    ) -> Result<FetchOutcome, ProvisionError> {
        loop {
            let outcome = self
                .monitor
                .watch(session, source, &mut |line| operator.progress(line))?;

            let FetchOutcome::Stalled { idle, last_line } = &outcome else {
                return Ok(outcome);
            };

            operator.end_progress();
            let mut question = format!(
                "'{}' has printed nothing for {}s.",
                session.command(),
                idle.as_secs()
            );
            if let Some(line) = last_line {
                question.push_str(&format!(" Last output: {line}."));
            }
            question.push_str(" Keep waiting?");

            if operator.confirm(&question)? {
                info!(command = %session.command(), "operator chose to keep waiting");
                session.resume(self.monitor.clock().now());
                continue;
            }

            warn!(command = %session.command(), "stopping stalled command");
            source.kill()?;
            return Ok(outcome);
        }
    }
}

impl<C: Clock> StepRunner for MonitoredRunner<C> {
    fn run_step(
        &mut self,
        step: &FetchStep,
        operator: &mut dyn Operator,
    ) -> Result<FetchOutcome, ProvisionError> {
        info!(step = %step.label, command = %step.command, cwd = %step.cwd.display(), "starting");

        let mut source = self
            .supervisor
            .spawn(&step.command, &step.cwd, step.channel)?;
        let mut session = self
            .monitor
            .start_session(&step.command, self.stall_threshold);
        if let Some(log) = self.open_log(step) {
            session = session.with_log(log);
        }

        let result = self.drive(&mut session, source.as_mut(), operator);
        operator.end_progress();

        if let Ok(outcome) = &result {
            info!(
                step = %step.label,
                bytes = session.bytes_seen(),
                %outcome,
                "step finished"
            );
        }
        result
    }
}
