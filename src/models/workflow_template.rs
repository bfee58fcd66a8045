use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::workflow::{Action, Trigger, WorkflowDefinition};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    pub usage_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl WorkflowTemplate {
    /// Blueprint for a new workflow, with fresh trigger/action ids.
    pub fn blueprint(&self, name: String, description: Option<String>) -> WorkflowDefinition {
        WorkflowDefinition {
            name,
            description: description.or_else(|| self.description.clone()),
            triggers: self.triggers.clone(),
            actions: self.actions.clone(),
        }
        .with_fresh_ids()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_category() -> String {
    "general".to_string()
}

impl NewWorkflowTemplate {
    /// Tags trimmed, lowercased and deduplicated, in first-seen order.
    pub fn normalized_tags(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for tag in &self.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !out.contains(&tag) {
                out.push(tag);
            }
        }
        out
    }
}
