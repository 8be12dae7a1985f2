use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::{FetchOutcome, FetchStep};
use crate::process::ProcessError;

/// Failures of the provisioning and scaffolding workflow.
///
/// Nothing in the library exits the process; the binary maps these to a
/// non-zero exit code.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("interactive prompt failed")]
    Prompt(#[from] io::Error),

    #[error("'{command}' stalled with no output for {}s", .idle.as_secs())]
    Stalled { command: String, idle: Duration },

    #[error("'{command}' reported a fatal error: {line}")]
    FatalOutput { command: String, line: String },

    #[error("'{command}' exited with status {exit_code}")]
    StepFailed { command: String, exit_code: i32 },

    #[error("acquisition finished but '{}' is missing", .path.display())]
    IncompleteTree { path: PathBuf },

    #[error("checkout at '{}' is corrupted (found '{}')", .path.display(), .marker.display())]
    Corrupted { path: PathBuf, marker: PathBuf },

    #[error(
        "acquisition of '{}' abandoned; partial tree kept for inspection",
        .path.display()
    )]
    Abandoned {
        path: PathBuf,
        #[source]
        cause: Box<ProvisionError>,
    },

    #[error(
        "checkout at '{}' is corrupted (found '{}') and recovery was declined",
        .path.display(),
        .marker.display()
    )]
    CorruptionDeclined { path: PathBuf, marker: PathBuf },

    #[error("gave up acquiring '{}' after {attempts} attempts", .path.display())]
    RetryLimitExceeded {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: Box<ProvisionError>,
    },

    #[error("source tree '{}' is locked by another jumpstart run", .path.display())]
    Locked { path: PathBuf },

    #[error("project name cannot be empty")]
    EmptyProjectName,

    #[error("invalid project name '{0}': must be a single path component")]
    InvalidProjectName(String),

    #[error(
        "directory '{}' already exists; choose a different name or delete the old one",
        .path.display()
    )]
    ProjectExists { path: PathBuf },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProvisionError {
    /// Error for a step that ended in `outcome`, or `None` if it completed.
    pub fn from_outcome(step: &FetchStep, outcome: FetchOutcome) -> Option<Self> {
        let command = step.command.clone();
        match outcome {
            FetchOutcome::Completed => None,
            FetchOutcome::Stalled { idle, .. } => Some(Self::Stalled { command, idle }),
            FetchOutcome::FatalError { line } => Some(Self::FatalOutput { command, line }),
            FetchOutcome::Failed { exit_code, .. } => {
                Some(Self::StepFailed { command, exit_code })
            }
        }
    }

    /// Whether this is a failed acquisition attempt that deleting the
    /// partial tree and retrying could fix.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            Self::Stalled { .. }
                | Self::FatalOutput { .. }
                | Self::StepFailed { .. }
                | Self::IncompleteTree { .. }
                | Self::Corrupted { .. }
        )
    }
}
