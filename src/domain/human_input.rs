//! Human input form entity.
//!
//! A form is created when a human-input node is first reached and the run
//! pauses. It moves out of `waiting` exactly once: to `submitted` through an
//! external action, or to `expired` through a sweep. Both end states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Output key holding the id of the action the user chose.
pub const ACTION_ID_OUTPUT: &str = "__action_id";
/// Output key holding the rendered form content.
pub const RENDERED_CONTENT_OUTPUT: &str = "__rendered_content";
/// Edge handle followed when a form expires.
pub const TIMEOUT_HANDLE: &str = "__timeout";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("form '{form_id}' is {status:?}, expected waiting")]
    NotWaiting { form_id: String, status: FormStatus },
    #[error("form '{0}' was already submitted")]
    AlreadySubmitted(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("invalid form input: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Waiting,
    Submitted,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormInputType {
    #[default]
    #[serde(alias = "text-input")]
    TextInput,
    Paragraph,
    Number,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormInput {
    #[serde(alias = "output_variable_name")]
    pub variable: String,
    #[serde(default, rename = "type")]
    pub input_type: FormInputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Regex the string value must match.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAction {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// What the form asks for. Stored on the form record so that a resumed run
/// validates against the definition the user actually saw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormDefinition {
    #[serde(default)]
    pub inputs: Vec<FormInput>,
    #[serde(default)]
    pub user_actions: Vec<UserAction>,
    #[serde(default)]
    pub form_content: String,
}

impl FormDefinition {
    /// Compile every input pattern once, so a bad regex is caught before a
    /// form using it is ever shown.
    pub fn validate_patterns(&self) -> Result<(), FormError> {
        for input in &self.inputs {
            if let Some(pat) = &input.pattern {
                compile_pattern(input, pat)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub data: HashMap<String, Value>,
    pub action: String,
    #[serde(default)]
    pub user: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInputForm {
    pub id: String,
    pub workflow_run_id: String,
    pub node_id: String,
    pub form_definition: FormDefinition,
    pub rendered_content: String,
    pub status: FormStatus,
    #[serde(default)]
    pub submission: Option<FormSubmission>,
    #[serde(default)]
    pub web_app_token: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Arguments for [`HumanInputFormRepository::create_form`](crate::domain::repository::HumanInputFormRepository::create_form).
#[derive(Debug, Clone)]
pub struct NewHumanInputForm {
    pub id: String,
    pub workflow_run_id: String,
    pub node_id: String,
    pub form_definition: FormDefinition,
    pub rendered_content: String,
    pub web_app_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl HumanInputForm {
    pub fn new(params: NewHumanInputForm) -> Self {
        Self {
            id: params.id,
            workflow_run_id: params.workflow_run_id,
            node_id: params.node_id,
            form_definition: params.form_definition,
            rendered_content: params.rendered_content,
            status: FormStatus::Waiting,
            submission: None,
            web_app_token: params.web_app_token,
            created_at: params.created_at,
            expires_at: params.expires_at,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == FormStatus::Waiting
    }

    /// Waiting, but past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_waiting() && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Record a user submission. Missing optional fields fall back to their defaults.
    pub fn submit(
        &mut self,
        data: HashMap<String, Value>,
        action: &str,
        user: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), FormError> {
        if self.status != FormStatus::Waiting {
            return Err(FormError::NotWaiting {
                form_id: self.id.clone(),
                status: self.status,
            });
        }
        if !self
            .form_definition
            .user_actions
            .iter()
            .any(|a| a.id == action)
        {
            return Err(FormError::UnknownAction(action.to_string()));
        }
        let data = validate_form_input(&self.form_definition.inputs, data)?;

        self.submission = Some(FormSubmission {
            data,
            action: action.to_string(),
            user,
            submitted_at: now,
        });
        self.status = FormStatus::Submitted;
        Ok(())
    }

    pub fn expire(&mut self) -> Result<(), FormError> {
        match self.status {
            FormStatus::Waiting => {
                self.status = FormStatus::Expired;
                Ok(())
            }
            FormStatus::Submitted => Err(FormError::AlreadySubmitted(self.id.clone())),
            FormStatus::Expired => Err(FormError::NotWaiting {
                form_id: self.id.clone(),
                status: self.status,
            }),
        }
    }
}

/// Check submitted data against the form inputs and fill in defaults.
/// Keys that are not declared inputs are dropped.
pub fn validate_form_input(
    inputs: &[FormInput],
    mut data: HashMap<String, Value>,
) -> Result<HashMap<String, Value>, FormError> {
    let declared: HashSet<&str> = inputs.iter().map(|i| i.variable.as_str()).collect();
    data.retain(|k, _| declared.contains(k.as_str()));

    for input in inputs {
        let value = match data.get(&input.variable) {
            Some(v) if !v.is_null() => v.clone(),
            _ => match &input.default {
                Some(default) => default.clone(),
                None if input.required => {
                    return Err(FormError::Validation(format!(
                        "required field is missing: {}",
                        input.variable
                    )))
                }
                None => continue,
            },
        };
        validate_field_type(input, &value)?;
        validate_field_rules(input, &value)?;
        data.insert(input.variable.clone(), value);
    }
    Ok(data)
}

fn validate_field_type(input: &FormInput, value: &Value) -> Result<(), FormError> {
    let valid = match input.input_type {
        FormInputType::TextInput | FormInputType::Paragraph | FormInputType::Select => {
            value.is_string()
        }
        FormInputType::Number => value.is_number(),
        FormInputType::Checkbox => value.is_boolean(),
    };
    if valid {
        Ok(())
    } else {
        Err(FormError::Validation(format!(
            "invalid type for field: {}",
            input.variable
        )))
    }
}

fn validate_field_rules(input: &FormInput, value: &Value) -> Result<(), FormError> {
    let Some(s) = value.as_str() else {
        return Ok(());
    };
    if input.input_type == FormInputType::Select
        && !input.options.is_empty()
        && !input.options.iter().any(|o| o == s)
    {
        return Err(FormError::Validation(format!(
            "field '{}' has value outside options",
            input.variable
        )));
    }
    if let Some(pat) = &input.pattern {
        if !compile_pattern(input, pat)?.is_match(s) {
            return Err(FormError::Validation(format!(
                "field '{}' does not match pattern",
                input.variable
            )));
        }
    }
    Ok(())
}

fn compile_pattern(input: &FormInput, pat: &str) -> Result<regex::Regex, FormError> {
    regex::Regex::new(pat).map_err(|e| {
        FormError::Validation(format!("invalid regex in field '{}': {}", input.variable, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> FormDefinition {
        serde_json::from_value(json!({
            "inputs": [
                {"variable": "comment", "type": "paragraph", "required": true},
                {"variable": "code", "type": "text-input", "pattern": "^[A-Z]{3}$"},
                {"variable": "priority", "type": "number", "default": 1}
            ],
            "user_actions": [{"id": "continue", "title": "Continue"}, {"id": "reject"}],
            "form_content": "Review {{#start.topic#}}"
        }))
        .unwrap()
    }

    fn form() -> HumanInputForm {
        HumanInputForm::new(NewHumanInputForm {
            id: "form-1".into(),
            workflow_run_id: "run-1".into(),
            node_id: "hi".into(),
            form_definition: definition(),
            rendered_content: "Review rust".into(),
            web_app_token: None,
            created_at: Utc::now(),
            expires_at: None,
        })
    }

    fn data(v: Value) -> HashMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_submit_fills_defaults_and_is_final() {
        let mut form = form();
        form.submit(data(json!({"comment": "ok", "extra": 1})), "continue", Some("u1".into()), Utc::now())
            .unwrap();
        assert_eq!(form.status, FormStatus::Submitted);
        let submission = form.submission.as_ref().unwrap();
        assert_eq!(submission.action, "continue");
        assert_eq!(submission.data["priority"], json!(1));
        assert!(!submission.data.contains_key("extra"));

        let again = form.submit(data(json!({"comment": "x"})), "continue", None, Utc::now());
        assert!(matches!(again, Err(FormError::NotWaiting { .. })));
        assert_eq!(form.expire(), Err(FormError::AlreadySubmitted("form-1".into())));
    }

    #[test]
    fn test_submit_validation_errors() {
        let mut form = form();
        assert!(matches!(
            form.submit(data(json!({"comment": "ok"})), "approve", None, Utc::now()),
            Err(FormError::UnknownAction(a)) if a == "approve"
        ));
        assert!(matches!(
            form.submit(HashMap::new(), "continue", None, Utc::now()),
            Err(FormError::Validation(msg)) if msg.contains("comment")
        ));
        assert!(matches!(
            form.submit(data(json!({"comment": "ok", "code": "abc"})), "continue", None, Utc::now()),
            Err(FormError::Validation(msg)) if msg.contains("pattern")
        ));
        assert!(form.is_waiting());
    }

    #[test]
    fn test_validate_patterns() {
        assert!(definition().validate_patterns().is_ok());
        let mut broken = definition();
        broken.inputs[1].pattern = Some("([A-Z".into());
        assert!(matches!(
            broken.validate_patterns(),
            Err(FormError::Validation(msg)) if msg.contains("'code'")
        ));
    }

    #[test]
    fn test_expire_transitions() {
        let mut form = form();
        form.expire().unwrap();
        assert_eq!(form.status, FormStatus::Expired);
        assert!(form.expire().is_err());
        assert!(form
            .submit(data(json!({"comment": "late"})), "continue", None, Utc::now())
            .is_err());
    }

    #[test]
    fn test_overdue() {
        let mut form = form();
        let now = Utc::now();
        assert!(!form.is_overdue(now));
        form.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(form.is_overdue(now));
    }
}
