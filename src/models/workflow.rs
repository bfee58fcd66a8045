use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Schedule,
    Event,
    Webhook,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Event => "event",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

impl Trigger {
    /// Event name this trigger listens for, if it is an event trigger.
    pub fn event_name(&self) -> Option<&str> {
        if self.trigger_type != TriggerType::Event {
            return None;
        }
        self.config
            .get("event")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Http,
    Delay,
    Log,
    Set,
    Condition,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Delay => "delay",
            Self::Log => "log",
            Self::Set => "set",
            Self::Condition => "condition",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub runs_total: i64,
    pub runs_success: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    pub stats: WorkflowStats,
    pub template_id: Option<Uuid>,
    #[serde(skip_serializing, default = "Uuid::new_v4")]
    pub webhook_salt: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Workflow {
    pub fn enabled_triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter(|t| t.enabled)
    }

    pub fn schedule_trigger(&self) -> Option<&Trigger> {
        self.enabled_triggers()
            .find(|t| t.trigger_type == TriggerType::Schedule)
    }

    pub fn has_trigger(&self, kind: TriggerType) -> bool {
        self.enabled_triggers().any(|t| t.trigger_type == kind)
    }

    pub fn listens_for_event(&self, event: &str) -> bool {
        let wanted = event.trim();
        self.enabled_triggers()
            .filter_map(Trigger::event_name)
            .any(|name| name.eq_ignore_ascii_case(wanted))
    }

    pub fn definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            triggers: self.triggers.clone(),
            actions: self.actions.clone(),
        }
    }
}

/// User-editable part of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl WorkflowDefinition {
    /// Copy with fresh trigger and action ids, used when cloning a workflow or
    /// a template blueprint.
    pub fn with_fresh_ids(mut self) -> Self {
        for trigger in &mut self.triggers {
            trigger.id = Uuid::new_v4();
        }
        for action in &mut self.actions {
            action.id = Uuid::new_v4();
        }
        self
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateWorkflow {
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub definition: WorkflowDefinition,
    pub is_active: bool,
    pub template_id: Option<Uuid>,
}
