// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Scenario driver: parse a script, set the workspace up, let the plugin react
//! and assert on what it reported and what is on disk.

pub mod driver;
pub mod expect;
pub mod fixture;
pub mod script;

use std::fmt;

use serde::Serialize;

pub use driver::{PluginSource, ScenarioDriver};
pub use script::{Directive, Script, ScriptError, Step};

use crate::bridge::ChannelStats;
use crate::error::ErrorCategory;

/// Driver state. `Failed` can follow any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Parse,
    Before,
    Trigger,
    After,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Parse => "parse",
            Phase::Before => "before",
            Phase::Trigger => "trigger",
            Phase::After => "after",
            Phase::Done => "done",
            Phase::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// No matching parcel before the deadline.
    ExpectationTimeout,
    Mismatch,
    /// Path expected by a `file-state` step does not exist.
    NotFound,
    Existence,
    OrderingViolation,
    CaptureOverflow,
    MalformedParcel,
}

/// The first expectation that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectationFailure {
    pub step: String,
    pub kind: FailureKind,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for ExpectationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step `{}` {:?}: expected {}, got {}",
            self.step, self.kind, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Verdict {
    Passed,
    Failed(ExpectationFailure),
    /// Infrastructure problem, distinct from an assertion failure.
    Errored {
        step: Option<String>,
        category: ErrorCategory,
        error: String,
    },
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    /// Declared name of the plugin, once it started.
    pub plugin: Option<String>,
    pub verdict: Verdict,
    /// Last phase entered before the run finished or failed.
    pub phase: Phase,
    pub parcels_observed: usize,
    pub captures: usize,
    pub stats: ChannelStats,
    /// Error from stopping the plugin after the run had already halted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<String>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Process exit code: 0 passed, 1 failed, 2 infrastructure error.
    pub fn exit_code(&self) -> i32 {
        match self.verdict {
            Verdict::Passed => 0,
            Verdict::Failed(_) => 1,
            Verdict::Errored { .. } => 2,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            Verdict::Passed => write!(f, "PASS {}", self.scenario)?,
            Verdict::Failed(failure) => write!(f, "FAIL {} in {}: {failure}", self.scenario, self.phase)?,
            Verdict::Errored {
                step,
                category,
                error,
            } => {
                write!(f, "ERROR {} in {}", self.scenario, self.phase)?;
                if let Some(step) = step {
                    write!(f, " step `{step}`")?;
                }
                write!(f, " ({category:?}): {error}")?;
            }
        }
        write!(
            f,
            " [{} parcels, {} captures, {} dropped]",
            self.parcels_observed, self.captures, self.stats.dropped
        )?;
        if let Some(teardown) = &self.teardown {
            write!(f, "; teardown: {teardown}")?;
        }
        Ok(())
    }
}
