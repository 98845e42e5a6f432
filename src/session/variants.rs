//! Ordered design variants for one project, with the selection cursor,
//! single-approval bookkeeping and per-variant feedback notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{FocusArea, GenerateVariant, VariantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: VariantId,
    pub name: String,
    pub description: String,
    pub focus_area: FocusArea,
    pub code: String,
    pub rationale: String,
    #[serde(default)]
    pub is_approved: bool,
}

impl From<GenerateVariant> for Variant {
    fn from(v: GenerateVariant) -> Self {
        Self {
            id: v.id,
            name: v.name,
            description: v.description,
            focus_area: v.focus_area,
            code: v.code,
            rationale: v.rationale,
            is_approved: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub id: String,
    pub variant_id: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_selector: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackItem {
    pub fn new(variant_id: &str, comment: &str, element_selector: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            variant_id: variant_id.to_string(),
            comment: comment.to_string(),
            element_selector: element_selector.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantStore {
    variants: Vec<Variant>,
    selected_variant_id: Option<String>,
    approved_variant_id: Option<String>,
    feedback: Vec<FeedbackItem>,
}

impl VariantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows. The approved id is derived from the flags.
    pub fn restore(variants: Vec<Variant>, feedback: Vec<FeedbackItem>) -> Self {
        let approved_variant_id = variants
            .iter()
            .find(|v| v.is_approved)
            .map(|v| v.id.to_string());
        let selected_variant_id = approved_variant_id
            .clone()
            .or_else(|| variants.first().map(|v| v.id.to_string()));

        Self {
            variants,
            selected_variant_id,
            approved_variant_id,
            feedback,
        }
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn get(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id.as_str() == id)
    }

    pub fn selected_variant_id(&self) -> Option<&str> {
        self.selected_variant_id.as_deref()
    }

    pub fn selected(&self) -> Option<&Variant> {
        self.selected_variant_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn approved_variant_id(&self) -> Option<&str> {
        self.approved_variant_id.as_deref()
    }

    pub fn approved(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_approved)
    }

    pub fn feedback(&self) -> &[FeedbackItem] {
        &self.feedback
    }

    pub fn feedback_for(&self, variant_id: &str) -> impl Iterator<Item = &FeedbackItem> {
        self.feedback.iter().filter(move |f| f.variant_id == variant_id)
    }

    /// Replace the whole list. Selection moves to the first variant and any
    /// previous approval is dropped along with the old batch.
    pub fn replace_all(&mut self, variants: Vec<Variant>) {
        self.selected_variant_id = variants.first().map(|v| v.id.to_string());
        self.approved_variant_id = None;
        self.variants = variants
            .into_iter()
            .map(|v| Variant {
                is_approved: false,
                ..v
            })
            .collect();
    }

    pub fn append(&mut self, variant: Variant) {
        self.variants.push(Variant {
            is_approved: false,
            ..variant
        });
    }

    /// Move the cursor. The id is not checked against the list.
    pub fn select(&mut self, id: &str) {
        self.selected_variant_id = Some(id.to_string());
    }

    /// Mark `id` as the single approved variant.
    ///
    /// An id that is not in the list is still recorded; no flag is set then.
    pub fn approve(&mut self, id: &str) {
        self.approved_variant_id = Some(id.to_string());
        for variant in &mut self.variants {
            variant.is_approved = variant.id.as_str() == id;
        }
    }

    pub fn add_feedback(
        &mut self,
        variant_id: &str,
        comment: &str,
        element_selector: Option<&str>,
    ) -> &FeedbackItem {
        self.feedback
            .push(FeedbackItem::new(variant_id, comment, element_selector));
        &self.feedback[self.feedback.len() - 1]
    }

    pub fn push_feedback(&mut self, item: FeedbackItem) {
        self.feedback.push(item);
    }

    pub fn remove_feedback(&mut self, id: &str) -> Option<FeedbackItem> {
        let pos = self.feedback.iter().position(|f| f.id == id)?;
        Some(self.feedback.remove(pos))
    }

    pub fn clear_feedback(&mut self) {
        self.feedback.clear();
    }

    pub fn take_feedback(&mut self) -> Vec<FeedbackItem> {
        std::mem::take(&mut self.feedback)
    }
}
