//! Test doubles: a manual clock, scripted child output, a scripted step
//! runner and a scripted operator.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::ProvisionError;
use crate::fetch::{Clock, FetchOutcome, FetchStep, StepRunner};
use crate::operator::Operator;
use crate::process::{OutputEvent, OutputSource, ProcessError};

/// Clock that only moves when something sleeps or waits on it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    fn advance_to(&self, at: Duration) {
        if at > self.elapsed.get() {
            self.elapsed.set(at);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Child whose output and exit happen at fixed offsets on a [`ManualClock`].
pub struct ScriptedSource {
    clock: ManualClock,
    events: VecDeque<(Duration, Vec<u8>)>,
    exit: Option<(Duration, i32)>,
    killed: bool,
}

impl ScriptedSource {
    /// `events` are `(offset, bytes)` in order; `exit` is `(offset, code)`.
    pub fn new(
        clock: &ManualClock,
        events: Vec<(Duration, Vec<u8>)>,
        exit: Option<(Duration, i32)>,
    ) -> Self {
        Self {
            clock: clock.clone(),
            events: events.into(),
            exit,
            killed: false,
        }
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    fn exit_at(&self) -> Option<Duration> {
        self.exit.map(|(at, _)| at)
    }
}

impl OutputSource for ScriptedSource {
    fn poll_output(&mut self, timeout: Duration) -> OutputEvent {
        if self.killed {
            return OutputEvent::Closed;
        }
        let now = self.clock.elapsed();
        let deadline = now + timeout;

        if let Some((at, _)) = self.events.front() {
            if *at <= deadline {
                let (at, chunk) = self.events.pop_front().unwrap_or_default();
                self.clock.advance_to(at);
                return OutputEvent::Chunk(chunk);
            }
        }
        if let Some(exit_at) = self.exit_at() {
            if exit_at <= deadline {
                self.clock.advance_to(exit_at);
                return OutputEvent::Closed;
            }
        }
        self.clock.advance_to(deadline);
        OutputEvent::Quiet
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>, ProcessError> {
        if self.killed {
            return Ok(Some(-1));
        }
        Ok(self
            .exit
            .filter(|(at, _)| *at <= self.clock.elapsed())
            .map(|(_, code)| code))
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        self.killed = true;
        Ok(())
    }
}

/// What a scripted step leaves behind in the target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Nothing,
    /// `src/.git`, as a finished checkout would.
    CreateCheckout,
    /// `src/.git/index.lock`, as an interrupted checkout would.
    Corrupt,
}

/// Step runner that replays scripted outcomes in order.
pub struct ScriptedRunner {
    target: PathBuf,
    script: VecDeque<(FetchOutcome, Effect)>,
    calls: Vec<FetchStep>,
}

impl ScriptedRunner {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            script: VecDeque::new(),
            calls: Vec::new(),
        }
    }

    pub fn then(mut self, outcome: FetchOutcome, effect: Effect) -> Self {
        self.script.push_back((outcome, effect));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.iter().map(|step| step.command.clone()).collect()
    }
}

impl StepRunner for ScriptedRunner {
    fn run_step(
        &mut self,
        step: &FetchStep,
        _operator: &mut dyn Operator,
    ) -> Result<FetchOutcome, ProvisionError> {
        self.calls.push(step.clone());
        let (outcome, effect) = self
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected step: {}", step.command));

        let git_dir = self.target.join("src/.git");
        match effect {
            Effect::Nothing => {}
            Effect::CreateCheckout => fs::create_dir_all(&git_dir).unwrap(),
            Effect::Corrupt => {
                fs::create_dir_all(&git_dir).unwrap();
                fs::write(git_dir.join("index.lock"), "").unwrap();
            }
        }
        Ok(outcome)
    }
}

/// Operator with queued answers that records every question and progress line.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<String>,
    confirmations: VecDeque<bool>,
    questions: Vec<String>,
    progress: Vec<String>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ask_answers<I, S>(mut self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers.extend(answers.into_iter().map(Into::into));
        self
    }

    pub fn confirm_answers(mut self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirmations.extend(answers);
        self
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn progress_lines(&self) -> &[String] {
        &self.progress
    }
}

impl Operator for ScriptedOperator {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .map(|answer| answer.trim().to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer"))
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        self.questions.push(question.to_string());
        self.confirmations
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer"))
    }

    fn progress(&mut self, line: &str) {
        self.progress.push(line.to_string());
    }
}
