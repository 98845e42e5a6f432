mod driver;
mod providers;
mod system_prompt;
mod tools;

pub use driver::{
    CompletedTurn, ConversationDriver, DEFAULT_MAX_STEPS, FinishReason, LoggingObserver,
    StepObserver, StepSummary, TurnCollector, TurnEvent, TurnRequest, TurnStream, collect_turn,
};
pub use providers::{
    AnthropicProvider, LLMProvider, LLMResponse, Message, OpenAIProvider, Role, ToolCall,
    ToolSchema, Usage, create_provider,
};
pub use system_prompt::{SystemPromptParams, build_system_prompt, phase_guidance};
pub use tools::{
    AskQuestion, BuildFullStack, ExportFile, ExportFormat, Feature, FeatureKind, FeedbackAction,
    FocusArea, GenerateVariant, PrepareExport, ProcessFeedback, QuestionOption, SelectedElement,
    ToolError, ToolInvocation, ToolKind, ToolOutput, ToolSet, VariantId, extract_tool_detail,
};

use crate::session::Phase;

/// System prompt for a turn in the given phase, listing the tools offered.
pub fn system_prompt_for(tools: &ToolSet, phase: Phase, project_name: Option<&str>) -> String {
    let schemas = tools.schemas();
    build_system_prompt(SystemPromptParams {
        tool_names: schemas.iter().map(|s| s.name.as_str()).collect(),
        phase,
        project_name,
    })
}
