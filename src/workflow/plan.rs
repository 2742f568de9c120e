// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step plans.
//!
//! Every workflow operation is expressed as a __plan__: an ordered list of
//! steps that is built up front, and only then executed. Building the plan
//! reads configuration and local filesystem state, so a missing option is
//! reported before a single command has been issued.
//!
//! # Retry Policy
//!
//! A step holds one or more alternative invocations. The first one is the
//! primary form, the rest are fallbacks that are only tried when everything
//! before them failed. Once all attempts of a step fail, the step either
//! aborts the plan, or is reported as a warning and skipped, depending on
//! its [`OnFailure`] policy. No completed step is ever rolled back.

use crate::{
    command::{Host, Invocation, RunError, Runner},
    target::RemoteTarget,
};

use tracing::{info, warn};

/// What to do once every attempt of a step has failed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop the plan, and report the failure.
    #[default]
    Abort,

    /// Log a warning, and carry on with the next step.
    Warn,
}

/// Single labelled step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub attempts: Vec<Invocation>,
    pub on_failure: OnFailure,
}

impl Step {
    /// Construct new step that aborts the plan if its invocation fails.
    pub fn new(label: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            label: label.into(),
            attempts: vec![invocation],
            on_failure: OnFailure::Abort,
        }
    }

    /// Add fallback invocation to try if every earlier attempt fails.
    pub fn with_fallback(mut self, invocation: Invocation) -> Self {
        self.attempts.push(invocation);
        self
    }

    /// Carry on with the plan even if every attempt fails.
    pub fn tolerate_failure(mut self) -> Self {
        self.on_failure = OnFailure::Warn;
        self
    }
}

/// Ordered list of steps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Construct new empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append step.
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Append every step of another plan.
    pub fn append(&mut self, other: Plan) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[Step] {
        self.steps.as_slice()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Primary invocation of each step, in order.
    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        self.steps.iter().filter_map(|step| step.attempts.first())
    }

    /// Run plan step by step, stopping at the first unrecoverable failure.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::Step`] if every attempt of an aborting step fails.
    pub fn execute(&self, runner: &impl Runner, target: &RemoteTarget) -> Result<()> {
        for step in &self.steps {
            run_step(step, runner, target)?;
        }

        Ok(())
    }
}

impl FromIterator<Step> for Plan {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

fn run_step(step: &Step, runner: &impl Runner, target: &RemoteTarget) -> Result<()> {
    let mut last_error = None;
    for (attempt, invocation) in step.attempts.iter().enumerate() {
        if attempt > 0 {
            warn!("{} failed, trying fallback {attempt}", step.label);
        }

        let host = match invocation.host {
            Host::Local => "localhost".to_string(),
            Host::Remote => target.to_string(),
        };
        info!("[{host}] {}: {}", step.label, invocation.command);

        match runner.run(invocation) {
            Ok(()) => return Ok(()),
            Err(error) => last_error = Some(error),
        }
    }

    let Some(source) = last_error else {
        return Ok(());
    };

    match step.on_failure {
        OnFailure::Abort => Err(PlanError::Step {
            label: step.label.clone(),
            source,
        }),
        OnFailure::Warn => {
            warn!("{} failed, continuing anyway: {source}", step.label);
            Ok(())
        }
    }
}

/// Plan execution error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Step failed on every attempt.
    #[error("step {label:?} failed")]
    Step {
        label: String,
        #[source]
        source: RunError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PlanError> = std::result::Result<T, E>;
