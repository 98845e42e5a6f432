use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::{FeedbackAction, ToolOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Describe,
    Prototype,
    Iterate,
    Build,
    Export,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Describe,
        Phase::Prototype,
        Phase::Iterate,
        Phase::Build,
        Phase::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Describe => "describe",
            Phase::Prototype => "prototype",
            Phase::Iterate => "iterate",
            Phase::Build => "build",
            Phase::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Describe => "Describe",
            Phase::Prototype => "Prototype",
            Phase::Iterate => "Iterate",
            Phase::Build => "Build",
            Phase::Export => "Export",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phase::Describe => "Describe what you want to build",
            Phase::Prototype => "Review and compare variants",
            Phase::Iterate => "Refine based on feedback",
            Phase::Build => "Generate full implementation",
            Phase::Export => "Export your project",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase a completed turn's tool results point to, if any.
///
/// Approval and build results are taken in order, so the last one wins;
/// any variant result overrides both with `Prototype`.
pub fn target_phase(results: &[ToolOutput]) -> Option<Phase> {
    let mut target = None;
    let mut saw_variant = false;

    for result in results {
        match result {
            ToolOutput::Variant(_) => saw_variant = true,
            ToolOutput::FeedbackProcessed(feedback) if feedback.action == FeedbackAction::Approve => {
                target = Some(Phase::Build)
            }
            ToolOutput::BuildComplete(_) => target = Some(Phase::Export),
            ToolOutput::FeedbackProcessed(_)
            | ToolOutput::Question(_)
            | ToolOutput::ExportReady(_) => {}
        }
    }

    if saw_variant {
        Some(Phase::Prototype)
    } else {
        target
    }
}

/// Project phase, advanced by observing completed turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseMachine {
    phase: Phase,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume at a previously stored phase.
    pub fn resume(phase: Phase) -> Self {
        Self { phase }
    }

    pub fn current(&self) -> Phase {
        self.phase
    }

    /// Apply one completed turn. Returns the target phase when the turn had a
    /// qualifying result, even if it equals the current phase.
    pub fn observe_turn(&mut self, results: &[ToolOutput]) -> Option<Phase> {
        let target = target_phase(results)?;
        self.phase = target;
        Some(target)
    }

    /// Direct UI action: the user picked a variant to give feedback on.
    pub fn begin_iteration(&mut self) -> Phase {
        self.phase = Phase::Iterate;
        self.phase
    }
}
