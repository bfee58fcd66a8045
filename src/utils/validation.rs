use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::models::workflow::{Action, ActionType, Trigger, TriggerType, Workflow};
use crate::utils::schedule::parse_schedule_config;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,
    #[error("duplicate trigger id {0}")]
    DuplicateTriggerId(Uuid),
    #[error("duplicate action id {0}")]
    DuplicateActionId(Uuid),
    #[error("action names must be unique: `{0}`")]
    DuplicateActionName(String),
    #[error("action {0} must have a name")]
    EmptyActionName(Uuid),
    #[error("schedule trigger {id}: {reason}")]
    InvalidSchedule { id: Uuid, reason: String },
    #[error("event trigger {0} needs an `event` name")]
    MissingEventName(Uuid),
    #[error("action `{name}`: {reason}")]
    InvalidAction { name: String, reason: String },
    #[error("workflow needs at least one enabled trigger to be active")]
    NoEnabledTrigger,
    #[error("workflow needs at least one enabled action to be active")]
    NoEnabledAction,
}

/// Checks a workflow definition, returning every violation found.
pub fn validate_definition(
    name: &str,
    triggers: &[Trigger],
    actions: &[Action],
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    let mut trigger_ids = HashSet::new();
    for trigger in triggers {
        if !trigger_ids.insert(trigger.id) {
            errors.push(ValidationError::DuplicateTriggerId(trigger.id));
        }
        if let Err(err) = validate_trigger(trigger) {
            errors.push(err);
        }
    }

    let mut action_ids = HashSet::new();
    let mut action_names = HashSet::new();
    for action in actions {
        if !action_ids.insert(action.id) {
            errors.push(ValidationError::DuplicateActionId(action.id));
        }
        let action_name = action.name.trim();
        if action_name.is_empty() {
            errors.push(ValidationError::EmptyActionName(action.id));
        } else if !action_names.insert(action_name.to_lowercase()) {
            // names double as templating keys
            errors.push(ValidationError::DuplicateActionName(action_name.to_string()));
        }
        if let Err(err) = validate_action(action) {
            errors.push(err);
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_trigger(trigger: &Trigger) -> Result<(), ValidationError> {
    match trigger.trigger_type {
        TriggerType::Schedule => parse_schedule_config(&trigger.config)
            .and_then(|cfg| cfg.validate())
            .map_err(|e| ValidationError::InvalidSchedule {
                id: trigger.id,
                reason: e.to_string(),
            }),
        TriggerType::Event => trigger
            .event_name()
            .map(|_| ())
            .ok_or(ValidationError::MissingEventName(trigger.id)),
        TriggerType::Webhook | TriggerType::Manual => Ok(()),
    }
}

fn validate_action(action: &Action) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidAction {
        name: action.name.clone(),
        reason: reason.to_string(),
    };
    let str_field = |key: &str| {
        action
            .config
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    };

    match action.action_type {
        ActionType::Http => {
            if str_field("url").is_none() {
                return Err(invalid("http action needs a `url`"));
            }
        }
        ActionType::Condition => {
            if action.config.get("left").is_none() {
                return Err(invalid("condition needs a `left` operand"));
            }
        }
        ActionType::Set => {
            if !action.config.get("values").is_some_and(|v| v.is_object()) {
                return Err(invalid("set action needs a `values` object"));
            }
        }
        ActionType::Delay | ActionType::Log => {}
    }
    Ok(())
}

/// A workflow may only be active, or start a run, with at least one enabled
/// trigger and one enabled action.
pub fn validate_activation(workflow: &Workflow) -> Result<(), Vec<ValidationError>> {
    validate_activatable(&workflow.triggers, &workflow.actions)
}

/// Activation check on a definition that has not been stored yet.
pub fn validate_activatable(
    triggers: &[Trigger],
    actions: &[Action],
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if !triggers.iter().any(|t| t.enabled) {
        errors.push(ValidationError::NoEnabledTrigger);
    }
    if !actions.iter().any(|a| a.enabled) {
        errors.push(ValidationError::NoEnabledAction);
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
