//! The fixed vocabulary of structured actions the model may invoke.
//!
//! Every tool is a typed parameter contract plus an identity echo: arguments
//! are validated by deserializing them into the parameter struct, and
//! execution returns the same data as a [`ToolOutput`] so it travels back
//! through the transcript as a well-typed tool result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use super::providers::{ToolCall, ToolSchema};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Malformed {tool} call: {reason}")]
    Malformed { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantId {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl VariantId {
    pub const ALL: [VariantId; 6] = [
        VariantId::A,
        VariantId::B,
        VariantId::C,
        VariantId::D,
        VariantId::E,
        VariantId::F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantId::A => "A",
            VariantId::B => "B",
            VariantId::C => "C",
            VariantId::D => "D",
            VariantId::E => "E",
            VariantId::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary design axis a variant explores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusArea {
    Layout,
    Hierarchy,
    Density,
    Interaction,
    Expression,
}

impl FocusArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusArea::Layout => "layout",
            FocusArea::Hierarchy => "hierarchy",
            FocusArea::Density => "density",
            FocusArea::Interaction => "interaction",
            FocusArea::Expression => "expression",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "layout" => Some(FocusArea::Layout),
            "hierarchy" => Some(FocusArea::Hierarchy),
            "density" => Some(FocusArea::Density),
            "interaction" => Some(FocusArea::Interaction),
            "expression" => Some(FocusArea::Expression),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Synthesize,
    Iterate,
    Approve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Zip,
    Github,
    Vercel,
}

/// Kind of a file emitted by `buildFullStack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Component,
    Api,
    Database,
    Util,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Component => "component",
            FeatureKind::Api => "api",
            FeatureKind::Database => "database",
            FeatureKind::Util => "util",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskQuestion {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default = "default_true")]
    pub allow_freeform: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVariant {
    pub id: VariantId,
    pub name: String,
    pub description: String,
    pub focus_area: FocusArea,
    pub code: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedElement {
    pub from_variant: String,
    pub element: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFeedback {
    pub action: FeedbackAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_elements: Option<Vec<SelectedElement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_variant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFullStack {
    pub approved_design: String,
    pub project_name: String,
    pub features: Vec<Feature>,
    pub dependencies: Vec<String>,
    pub setup_instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareExport {
    pub format: ExportFormat,
    pub project_name: String,
    pub files: Vec<ExportFile>,
}

fn default_true() -> bool {
    true
}

/// A validated tool call, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    AskQuestion(AskQuestion),
    GenerateVariant(GenerateVariant),
    ProcessFeedback(ProcessFeedback),
    BuildFullStack(BuildFullStack),
    PrepareExport(PrepareExport),
}

impl ToolInvocation {
    /// Echo the validated parameters back as a typed result.
    pub fn execute(self) -> ToolOutput {
        match self {
            ToolInvocation::AskQuestion(p) => ToolOutput::Question(p),
            ToolInvocation::GenerateVariant(p) => ToolOutput::Variant(p),
            ToolInvocation::ProcessFeedback(p) => ToolOutput::FeedbackProcessed(p),
            ToolInvocation::BuildFullStack(p) => ToolOutput::BuildComplete(p),
            ToolInvocation::PrepareExport(p) => ToolOutput::ExportReady(p),
        }
    }
}

/// Tool results as carried in the transcript, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    Question(AskQuestion),
    Variant(GenerateVariant),
    FeedbackProcessed(ProcessFeedback),
    BuildComplete(BuildFullStack),
    ExportReady(PrepareExport),
}

impl ToolOutput {
    pub fn type_name(&self) -> &'static str {
        match self {
            ToolOutput::Question(_) => "question",
            ToolOutput::Variant(_) => "variant",
            ToolOutput::FeedbackProcessed(_) => "feedback_processed",
            ToolOutput::BuildComplete(_) => "build_complete",
            ToolOutput::ExportReady(_) => "export_ready",
        }
    }

    /// Recover a result from a transcript tool message, if it holds one.
    pub fn from_message_content(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    AskQuestion,
    GenerateVariant,
    ProcessFeedback,
    BuildFullStack,
    PrepareExport,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::AskQuestion,
        ToolKind::GenerateVariant,
        ToolKind::ProcessFeedback,
        ToolKind::BuildFullStack,
        ToolKind::PrepareExport,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::AskQuestion => "askQuestion",
            ToolKind::GenerateVariant => "generateVariant",
            ToolKind::ProcessFeedback => "processFeedback",
            ToolKind::BuildFullStack => "buildFullStack",
            ToolKind::PrepareExport => "prepareExport",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Check the raw arguments against this tool's parameter contract.
    pub fn validate(&self, arguments: &str) -> Result<ToolInvocation, ToolError> {
        let name = self.name();
        Ok(match self {
            ToolKind::AskQuestion => ToolInvocation::AskQuestion(parse_args(name, arguments)?),
            ToolKind::GenerateVariant => {
                ToolInvocation::GenerateVariant(parse_args(name, arguments)?)
            }
            ToolKind::ProcessFeedback => {
                ToolInvocation::ProcessFeedback(parse_args(name, arguments)?)
            }
            ToolKind::BuildFullStack => ToolInvocation::BuildFullStack(parse_args(name, arguments)?),
            ToolKind::PrepareExport => ToolInvocation::PrepareExport(parse_args(name, arguments)?),
        })
    }

    pub fn schema(&self) -> ToolSchema {
        let (description, parameters) = match self {
            ToolKind::AskQuestion => (
                "Ask the user a quick question to understand their needs. Use this during the interview phase to gather context about the project.",
                json!({
                    "type": "object",
                    "properties": {
                        "question": {"type": "string", "description": "The question to ask the user"},
                        "options": {
                            "type": "array",
                            "description": "Optional predefined options for the user to choose from",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "label": {"type": "string", "description": "The display label for this option"},
                                    "value": {"type": "string", "description": "The value to use when this option is selected"}
                                },
                                "required": ["label", "value"]
                            }
                        },
                        "allowFreeform": {
                            "type": "boolean",
                            "default": true,
                            "description": "Whether to allow freeform text input in addition to options"
                        }
                    },
                    "required": ["question"]
                }),
            ),
            ToolKind::GenerateVariant => (
                "Generate a visual prototype variant. Each variant should explore a meaningfully different design direction.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "enum": ["A", "B", "C", "D", "E", "F"], "description": "Unique identifier for this variant"},
                        "name": {"type": "string", "description": "A short, descriptive name for this variant (e.g., \"Card-Based Layout\")"},
                        "description": {"type": "string", "description": "Brief description of what makes this variant unique"},
                        "focusArea": {
                            "type": "string",
                            "enum": ["layout", "hierarchy", "density", "interaction", "expression"],
                            "description": "The primary design axis this variant explores"
                        },
                        "code": {"type": "string", "description": "Complete React component code using Tailwind CSS. Must be a self-contained, renderable component."},
                        "rationale": {"type": "string", "description": "Explanation of why this variant is valuable and when it would be the best choice"}
                    },
                    "required": ["id", "name", "description", "focusArea", "code", "rationale"]
                }),
            ),
            ToolKind::ProcessFeedback => (
                "Process user feedback on variants and determine the next action. Use this after the user has provided feedback on the generated variants.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {
                            "type": "string",
                            "enum": ["synthesize", "iterate", "approve"],
                            "description": "synthesize: Combine elements from multiple variants into a new one. iterate: Make refinements based on specific feedback. approve: User is satisfied, ready to build."
                        },
                        "selectedElements": {
                            "type": "array",
                            "description": "Elements selected from variants to combine (for synthesize action)",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "fromVariant": {"type": "string", "description": "The variant ID this element is from (A, B, C, D, E)"},
                                    "element": {"type": "string", "description": "Description of the element being selected"},
                                    "reason": {"type": "string", "description": "Why this element was selected"}
                                },
                                "required": ["fromVariant", "element", "reason"]
                            }
                        },
                        "overallDirection": {"type": "string", "description": "High-level direction for the next iteration"},
                        "approvedVariantId": {"type": "string", "description": "The variant ID being approved (for approve action)"}
                    },
                    "required": ["action"]
                }),
            ),
            ToolKind::BuildFullStack => (
                "Generate the complete full-stack implementation after the design has been approved. This creates all necessary files for a production-ready application.",
                json!({
                    "type": "object",
                    "properties": {
                        "approvedDesign": {"type": "string", "description": "The approved variant code to base the implementation on"},
                        "projectName": {"type": "string", "description": "Name of the project"},
                        "features": {
                            "type": "array",
                            "description": "All files to generate for the full implementation",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string", "description": "Name of the feature/file"},
                                    "type": {"type": "string", "enum": ["component", "api", "database", "util"], "description": "Type of file"},
                                    "code": {"type": "string", "description": "The complete code for this file"},
                                    "path": {"type": "string", "description": "The file path relative to project root"}
                                },
                                "required": ["name", "type", "code", "path"]
                            }
                        },
                        "dependencies": {"type": "array", "items": {"type": "string"}, "description": "NPM dependencies required"},
                        "setupInstructions": {"type": "string", "description": "Instructions for setting up and running the project"}
                    },
                    "required": ["approvedDesign", "projectName", "features", "dependencies", "setupInstructions"]
                }),
            ),
            ToolKind::PrepareExport => (
                "Prepare the project for export in the specified format.",
                json!({
                    "type": "object",
                    "properties": {
                        "format": {"type": "string", "enum": ["zip", "github", "vercel"], "description": "Export format"},
                        "projectName": {"type": "string", "description": "Name of the project"},
                        "files": {
                            "type": "array",
                            "description": "All files to include in the export",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": {"type": "string", "description": "File path relative to project root"},
                                    "content": {"type": "string", "description": "File content"}
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["format", "projectName", "files"]
                }),
            ),
        };

        ToolSchema {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &str) -> Result<T, ToolError> {
    let value: Value = serde_json::from_str(arguments).map_err(|e| ToolError::Malformed {
        tool: tool.to_string(),
        reason: format!("arguments are not valid JSON: {}", e),
    })?;

    serde_json::from_value(value).map_err(|e| ToolError::Malformed {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// The tool vocabulary offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSet {
    kinds: Vec<ToolKind>,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self {
            kinds: ToolKind::ALL.to_vec(),
        }
    }
}

impl ToolSet {
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.kinds.iter().map(|k| k.schema()).collect()
    }

    /// Validate and run one tool call. A rejected call never reaches `execute`.
    pub fn invoke(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let kind = self
            .kinds
            .iter()
            .find(|k| k.name() == call.name)
            .ok_or_else(|| ToolError::Unknown(call.name.clone()))?;

        Ok(kind.validate(&call.arguments)?.execute())
    }
}

/// Short human-readable detail for a tool call, used in logs and the terminal UI.
pub fn extract_tool_detail(name: &str, arguments: &str) -> Option<String> {
    let args: Value = serde_json::from_str(arguments).ok()?;
    match ToolKind::from_name(name)? {
        ToolKind::AskQuestion => args["question"].as_str().map(|s| s.to_string()),
        ToolKind::GenerateVariant => Some(format!(
            "{} - {}",
            args["id"].as_str().unwrap_or("?"),
            args["name"].as_str().unwrap_or("unnamed")
        )),
        ToolKind::ProcessFeedback => args["action"].as_str().map(|s| s.to_string()),
        ToolKind::BuildFullStack => Some(format!(
            "{} ({} files)",
            args["projectName"].as_str().unwrap_or("project"),
            args["features"].as_array().map(|a| a.len()).unwrap_or(0)
        )),
        ToolKind::PrepareExport => args["format"].as_str().map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call-1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn variant_args(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Card grid",
            "description": "Cards in a responsive grid",
            "focusArea": "layout",
            "code": "export default function Pricing() { return <section /> }",
            "rationale": "Familiar and scannable"
        })
    }

    #[test]
    fn generate_variant_echoes_parameters() {
        let output = ToolSet::default()
            .invoke(&call("generateVariant", variant_args("C")))
            .unwrap();

        match output {
            ToolOutput::Variant(v) => {
                assert_eq!(v.id, VariantId::C);
                assert_eq!(v.focus_area, FocusArea::Layout);
                assert_eq!(v.name, "Card grid");
            }
            other => panic!("expected variant, got {:?}", other),
        }
    }

    #[test]
    fn missing_focus_area_is_malformed() {
        let mut args = variant_args("A");
        args.as_object_mut().unwrap().remove("focusArea");

        let err = ToolSet::default()
            .invoke(&call("generateVariant", args))
            .unwrap_err();
        match err {
            ToolError::Malformed { tool, reason } => {
                assert_eq!(tool, "generateVariant");
                assert!(reason.contains("focusArea"), "reason: {}", reason);
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_enum_values_are_rejected() {
        let tools = ToolSet::default();
        assert!(tools.invoke(&call("generateVariant", variant_args("G"))).is_err());
        assert!(
            tools
                .invoke(&call("processFeedback", json!({"action": "merge"})))
                .is_err()
        );
        assert!(
            tools
                .invoke(&call(
                    "prepareExport",
                    json!({"format": "tarball", "projectName": "x", "files": []})
                ))
                .is_err()
        );
    }

    #[test]
    fn non_json_arguments_are_malformed() {
        let bad = ToolCall {
            id: "x".to_string(),
            name: "askQuestion".to_string(),
            arguments: "{question: ".to_string(),
        };
        assert!(matches!(
            ToolSet::default().invoke(&bad),
            Err(ToolError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = ToolSet::default()
            .invoke(&call("deployToMars", json!({})))
            .unwrap_err();
        assert_eq!(err, ToolError::Unknown("deployToMars".to_string()));
    }

    #[test]
    fn ask_question_defaults_to_freeform() {
        let output = ToolSet::default()
            .invoke(&call("askQuestion", json!({"question": "Who is it for?"})))
            .unwrap();
        assert_eq!(
            output,
            ToolOutput::Question(AskQuestion {
                question: "Who is it for?".to_string(),
                options: None,
                allow_freeform: true,
            })
        );
    }

    #[test]
    fn output_wire_shape_is_tagged() {
        let output = ToolKind::ProcessFeedback
            .validate(r#"{"action":"approve","approvedVariantId":"C"}"#)
            .unwrap()
            .execute();

        let wire = serde_json::to_value(&output).unwrap();
        assert_eq!(wire["type"], "feedback_processed");
        assert_eq!(wire["action"], "approve");
        assert_eq!(wire["approvedVariantId"], "C");
        assert!(wire.get("selectedElements").is_none());

        let back = ToolOutput::from_message_content(&wire.to_string()).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn build_features_use_type_field() {
        let output = ToolKind::BuildFullStack
            .validate(
                &json!({
                    "approvedDesign": "code",
                    "projectName": "pricing",
                    "features": [{"name": "Page", "type": "component", "code": "x", "path": "app/page.tsx"}],
                    "dependencies": ["next"],
                    "setupInstructions": "npm i"
                })
                .to_string(),
            )
            .unwrap()
            .execute();

        match output {
            ToolOutput::BuildComplete(build) => {
                assert_eq!(build.features[0].kind, FeatureKind::Component);
                assert_eq!(build.features[0].path, "app/page.tsx");
            }
            other => panic!("expected build, got {:?}", other),
        }
    }

    #[test]
    fn schemas_cover_every_tool() {
        let schemas = ToolSet::default().schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "askQuestion",
                "generateVariant",
                "processFeedback",
                "buildFullStack",
                "prepareExport"
            ]
        );
        for schema in &schemas {
            assert_eq!(schema.parameters["type"], "object");
            assert!(schema.parameters["required"].is_array());
        }
    }

    #[test]
    fn tool_detail_for_variant() {
        let detail = extract_tool_detail("generateVariant", &variant_args("B").to_string());
        assert_eq!(detail.as_deref(), Some("B - Card grid"));
        assert!(extract_tool_detail("unknown", "{}").is_none());
    }

    #[test]
    fn variant_id_parse() {
        assert_eq!(VariantId::parse("c"), Some(VariantId::C));
        assert_eq!(VariantId::parse(" E "), Some(VariantId::E));
        assert_eq!(VariantId::parse("Z"), None);
    }
}
