use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::{Feature, FeatureKind, FocusArea, Message, Role, ToolCall, VariantId};
use crate::session::{FeedbackItem, Phase, Variant};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub phase: Phase,
    pub design_brief: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    /// Caller-chosen id; a fresh UUID when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub design_brief: Option<Value>,
}

impl NewProject {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub design_brief: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
    pub id: String,
    pub project_id: String,
    pub variant_id: VariantId,
    pub name: String,
    pub description: String,
    pub focus_area: FocusArea,
    pub code: String,
    pub rationale: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

impl VariantRecord {
    pub fn to_variant(&self) -> Variant {
        Variant {
            id: self.variant_id,
            name: self.name.clone(),
            description: self.description.clone(),
            focus_area: self.focus_area,
            code: self.code.clone(),
            rationale: self.rationale.clone(),
            is_approved: self.is_approved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub project_id: String,
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn to_message(&self) -> Message {
        let payload = self.tool_calls.as_ref();
        let tool_calls = payload
            .and_then(|v| v.get("toolCalls"))
            .and_then(|v| serde_json::from_value::<Vec<ToolCall>>(v.clone()).ok());
        let tool_call_id = payload
            .and_then(|v| v.get("toolCallId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Message {
            role: self.role,
            content: self.content.clone().unwrap_or_default(),
            tool_calls,
            tool_call_id,
        }
    }
}

/// The structured part of a message, stored alongside its text.
pub(crate) fn tool_payload(message: &Message) -> Option<Value> {
    if message.tool_calls.is_none() && message.tool_call_id.is_none() {
        return None;
    }
    Some(json!({
        "toolCalls": message.tool_calls,
        "toolCallId": message.tool_call_id,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Component,
    Api,
    Database,
    Util,
    Config,
}

impl FileType {
    pub const ALL: [FileType; 5] = [
        FileType::Component,
        FileType::Api,
        FileType::Database,
        FileType::Util,
        FileType::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Component => "component",
            FileType::Api => "api",
            FileType::Database => "database",
            FileType::Util => "util",
            FileType::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl From<FeatureKind> for FileType {
    fn from(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Component => FileType::Component,
            FeatureKind::Api => FileType::Api,
            FeatureKind::Database => FileType::Database,
            FeatureKind::Util => FileType::Util,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub id: String,
    pub project_id: String,
    pub path: String,
    pub content: String,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGeneratedFile {
    pub path: String,
    pub content: String,
    pub file_type: FileType,
}

impl From<&Feature> for NewGeneratedFile {
    fn from(feature: &Feature) -> Self {
        Self {
            path: feature.path.clone(),
            content: feature.code.clone(),
            file_type: feature.kind.into(),
        }
    }
}

fn text_column<T>(row: &Row, idx: usize, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{}'", raw).into(),
        )
    })
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

pub(crate) const PROJECT_COLUMNS: &str =
    "id, user_id, name, description, phase, design_brief, created_at, updated_at";

pub(crate) fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        phase: text_column(row, 4, Phase::parse)?,
        design_brief: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(crate) const VARIANT_COLUMNS: &str = "id, project_id, variant_id, name, description, focus_area, code, rationale, is_approved, created_at";

pub(crate) fn variant_from_row(row: &Row) -> rusqlite::Result<VariantRecord> {
    Ok(VariantRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        variant_id: text_column(row, 2, VariantId::parse)?,
        name: row.get(3)?,
        description: row.get(4)?,
        focus_area: text_column(row, 5, FocusArea::parse)?,
        code: row.get(6)?,
        rationale: row.get(7)?,
        is_approved: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub(crate) const FEEDBACK_COLUMNS: &str = "id, variant_id, comment, element_selector, created_at";

pub(crate) fn feedback_from_row(row: &Row) -> rusqlite::Result<FeedbackItem> {
    Ok(FeedbackItem {
        id: row.get(0)?,
        variant_id: row.get(1)?,
        comment: row.get(2)?,
        element_selector: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, project_id, role, content, tool_calls, created_at";

pub(crate) fn message_from_row(row: &Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        role: text_column(row, 2, parse_role)?,
        content: row.get(3)?,
        tool_calls: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) const FILE_COLUMNS: &str = "id, project_id, path, content, file_type, created_at";

pub(crate) fn file_from_row(row: &Row) -> rusqlite::Result<GeneratedFile> {
    Ok(GeneratedFile {
        id: row.get(0)?,
        project_id: row.get(1)?,
        path: row.get(2)?,
        content: row.get(3)?,
        file_type: text_column(row, 4, FileType::parse)?,
        created_at: row.get(5)?,
    })
}
