//! Per-project conversation state.
//!
//! A [`ProjectSession`] is constructed explicitly for one project and owns
//! that project's phase machine, variant store and transcript. Completed
//! turns are folded into it with [`ProjectSession::apply_turn`]; nothing is
//! applied for a turn that did not finish.

mod phase;
mod variants;

pub use phase::{Phase, PhaseMachine, target_phase};
pub use variants::{FeedbackItem, Variant, VariantStore};

use serde::Serialize;
use tracing::debug;

use crate::agent::{
    AskQuestion, BuildFullStack, CompletedTurn, FeedbackAction, Message, PrepareExport,
    ProcessFeedback, ToolOutput, VariantId,
};

/// What a completed turn changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Phase targeted by the turn, if it had a qualifying result
    pub phase: Option<Phase>,
    /// Ids of a new variant batch, when the turn produced one
    pub variants: Vec<VariantId>,
    pub approved_variant_id: Option<String>,
    pub asked_question: bool,
    pub build_ready: bool,
    pub export_ready: bool,
}

impl TurnOutcome {
    pub fn variants_replaced(&self) -> bool {
        !self.variants.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ProjectSession {
    project_id: String,
    name: String,
    phase: PhaseMachine,
    variants: VariantStore,
    transcript: Vec<Message>,
    pending_question: Option<AskQuestion>,
    last_feedback: Option<ProcessFeedback>,
    latest_build: Option<BuildFullStack>,
    latest_export: Option<PrepareExport>,
}

impl ProjectSession {
    pub fn new(project_id: &str, name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            name: name.to_string(),
            phase: PhaseMachine::new(),
            variants: VariantStore::new(),
            transcript: Vec::new(),
            pending_question: None,
            last_feedback: None,
            latest_build: None,
            latest_export: None,
        }
    }

    /// Rebuild a session from persisted project state.
    pub fn restore(
        project_id: &str,
        name: &str,
        phase: Phase,
        variants: VariantStore,
        transcript: Vec<Message>,
    ) -> Self {
        let mut session = Self::new(project_id, name);
        session.phase = PhaseMachine::resume(phase);
        session.variants = variants;
        session.transcript = transcript;
        session
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    pub fn variants(&self) -> &VariantStore {
        &self.variants
    }

    pub fn variants_mut(&mut self) -> &mut VariantStore {
        &mut self.variants
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn push_message(&mut self, message: Message) {
        self.transcript.push(message);
    }

    /// Adopt a transcript supplied by the client.
    pub fn replace_transcript(&mut self, messages: Vec<Message>) {
        self.transcript = messages;
    }

    pub fn pending_question(&self) -> Option<&AskQuestion> {
        self.pending_question.as_ref()
    }

    pub fn last_feedback(&self) -> Option<&ProcessFeedback> {
        self.last_feedback.as_ref()
    }

    pub fn latest_build(&self) -> Option<&BuildFullStack> {
        self.latest_build.as_ref()
    }

    pub fn latest_export(&self) -> Option<&PrepareExport> {
        self.latest_export.as_ref()
    }

    /// Append the turn's transcript entries and fold its tool results.
    pub fn apply_turn(&mut self, turn: &CompletedTurn) -> TurnOutcome {
        self.transcript.extend(turn.messages.iter().cloned());
        self.apply_tool_results(&turn.tool_results)
    }

    /// Fold one turn's tool results into the variant store and phase.
    ///
    /// A variant batch replaces the list before any approval in the same
    /// turn is applied, so approving an id from the new batch sticks.
    pub fn apply_tool_results(&mut self, results: &[ToolOutput]) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();
        let mut batch: Vec<Variant> = Vec::new();

        // An unanswered question is superseded by whatever the model did next
        self.pending_question = None;

        for result in results {
            match result {
                ToolOutput::Question(question) => {
                    self.pending_question = Some(question.clone());
                    outcome.asked_question = true;
                }
                ToolOutput::Variant(variant) => {
                    // A regenerated id replaces its earlier emission in place
                    let variant = Variant::from(variant.clone());
                    match batch.iter_mut().find(|v| v.id == variant.id) {
                        Some(existing) => *existing = variant,
                        None => batch.push(variant),
                    }
                }
                ToolOutput::FeedbackProcessed(feedback) => {
                    if feedback.action == FeedbackAction::Approve
                        && let Some(id) = &feedback.approved_variant_id
                    {
                        outcome.approved_variant_id = Some(id.clone());
                    }
                    self.last_feedback = Some(feedback.clone());
                }
                ToolOutput::BuildComplete(build) => {
                    self.latest_build = Some(build.clone());
                    outcome.build_ready = true;
                }
                ToolOutput::ExportReady(export) => {
                    self.latest_export = Some(export.clone());
                    outcome.export_ready = true;
                }
            }
        }

        if !batch.is_empty() {
            outcome.variants = batch.iter().map(|v| v.id).collect();
            self.variants.replace_all(batch);
        }

        if let Some(id) = &outcome.approved_variant_id {
            self.variants.approve(id);
        }

        outcome.phase = self.phase.observe_turn(results);
        debug!(
            "[Project {}] Turn applied, phase now {}",
            self.project_id,
            self.phase.current()
        );

        outcome
    }

    /// Select a variant for feedback and enter the iterate phase.
    pub fn begin_iteration(&mut self, variant_id: &str) -> Phase {
        self.variants.select(variant_id);
        self.phase.begin_iteration()
    }

    /// Drain collected feedback into the text of the next user message.
    pub fn submit_feedback(&mut self) -> Option<String> {
        let items = self.variants.take_feedback();
        if items.is_empty() {
            return None;
        }

        let mut order: Vec<&str> = Vec::new();
        for item in &items {
            if !order.contains(&item.variant_id.as_str()) {
                order.push(&item.variant_id);
            }
        }

        let mut text = String::from("Here is my feedback on the variants:\n");
        for variant_id in order {
            match self.variants.get(variant_id) {
                Some(v) => text.push_str(&format!("\nVariant {} ({}):\n", variant_id, v.name)),
                None => text.push_str(&format!("\nVariant {}:\n", variant_id)),
            }
            for item in items.iter().filter(|f| f.variant_id == variant_id) {
                match &item.element_selector {
                    Some(selector) => {
                        text.push_str(&format!("- {} (on `{}`)\n", item.comment, selector))
                    }
                    None => text.push_str(&format!("- {}\n", item.comment)),
                }
            }
        }
        text.push_str("\nPlease refine the designs based on this feedback.");

        Some(text)
    }

    pub fn snapshot(&self) -> SessionSnapshot<'_> {
        SessionSnapshot {
            project_id: &self.project_id,
            name: &self.name,
            phase: self.phase.current(),
            phase_label: self.phase.current().label(),
            phase_description: self.phase.current().description(),
            variants: &self.variants,
            pending_question: self.pending_question.as_ref(),
            latest_build: self.latest_build.as_ref(),
            latest_export: self.latest_export.as_ref(),
            message_count: self.transcript.len(),
        }
    }
}

/// Serializable view of a session for API clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot<'a> {
    pub project_id: &'a str,
    pub name: &'a str,
    pub phase: Phase,
    pub phase_label: &'static str,
    pub phase_description: &'static str,
    #[serde(flatten)]
    pub variants: &'a VariantStore,
    pub pending_question: Option<&'a AskQuestion>,
    pub latest_build: Option<&'a BuildFullStack>,
    pub latest_export: Option<&'a PrepareExport>,
    pub message_count: usize,
}
