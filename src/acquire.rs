//! Strategies for obtaining the source tree.
//!
//! A strategy only describes its steps for a given target directory; a
//! [`StepRunner`] executes them. Steps run in order and the first one that
//! does not complete ends the attempt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::ProvisionError;
use crate::fetch::{FetchStep, StepRunner};
use crate::operator::Operator;
use crate::process::{shell_quote, Channel};
use crate::settings::{AcquisitionMethod, ProvisionSettings};

/// Top-level entry every successful acquisition leaves in the target.
pub const CHECKOUT_DIR: &str = "src";

/// Artifacts of an interrupted acquisition, relative to the target.
pub const CORRUPTION_MARKERS: &[&str] = &["src/.git/index.lock", "_bad_scm"];

pub trait AcquisitionStrategy {
    fn name(&self) -> &'static str;

    /// Steps for acquiring into `target`, given what is already there.
    fn steps(&self, target: &Path) -> Vec<FetchStep>;

    /// Entry that must exist under the target once acquisition succeeded.
    fn expected_entry(&self) -> &'static str {
        CHECKOUT_DIR
    }

    fn acquire(
        &self,
        target: &Path,
        runner: &mut dyn StepRunner,
        operator: &mut dyn Operator,
    ) -> Result<(), ProvisionError> {
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;

        for step in self.steps(target) {
            let outcome = runner.run_step(&step, operator)?;
            if let Some(err) = ProvisionError::from_outcome(&step, outcome) {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Plain `git clone` of the source repository.
#[derive(Debug, Clone)]
pub struct DirectClone {
    url: String,
}

impl DirectClone {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl AcquisitionStrategy for DirectClone {
    fn name(&self) -> &'static str {
        "direct-clone"
    }

    fn steps(&self, target: &Path) -> Vec<FetchStep> {
        let checkout = target.join(CHECKOUT_DIR);
        if checkout.join(".git").is_dir() {
            return vec![FetchStep::new(
                "fetch",
                "git fetch --progress origin",
                checkout,
                Channel::Pty,
            )];
        }
        vec![FetchStep::new(
            "clone",
            format!("git clone --progress {} {CHECKOUT_DIR}", shell_quote(&self.url)),
            target,
            Channel::Pty,
        )]
    }
}

/// depot_tools `fetch` followed by `gclient sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolingFetch;

impl AcquisitionStrategy for ToolingFetch {
    fn name(&self) -> &'static str {
        "tooling-fetch"
    }

    fn steps(&self, target: &Path) -> Vec<FetchStep> {
        let mut steps = Vec::with_capacity(2);
        // An earlier fetch already wrote .gclient; sync picks up from there.
        if !target.join(".gclient").exists() {
            steps.push(FetchStep::new(
                "fetch",
                "fetch --nohooks chromium",
                target,
                Channel::Pty,
            ));
        }
        steps.push(FetchStep::new("sync", "gclient sync", target, Channel::Pty));
        steps
    }
}

/// First corruption marker present under `target`.
pub fn find_corruption(target: &Path) -> Option<PathBuf> {
    CORRUPTION_MARKERS
        .iter()
        .map(|marker| target.join(marker))
        .find(|path| path.exists())
}

pub fn strategy_for(settings: &ProvisionSettings) -> Box<dyn AcquisitionStrategy> {
    match settings.method {
        AcquisitionMethod::DirectClone => Box::new(DirectClone::new(&settings.chromium_url)),
        AcquisitionMethod::ToolingFetch => Box::new(ToolingFetch),
    }
}
