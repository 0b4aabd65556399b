//! Human input node: pauses the run until a form is submitted.

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::variable_pool::{Segment, Selector};
use crate::domain::human_input::{
    FormDefinition, FormInput, FormStatus, HumanInputForm, NewHumanInputForm, UserAction,
    ACTION_ID_OUTPUT, RENDERED_CONTENT_OUTPUT, TIMEOUT_HANDLE,
};
use crate::domain::repository::{HumanInputFormRepository, RepositoryError};
use crate::dsl::schema::{BaseNodeData, NodeRunResult};
use crate::error::{NodeError, NodeResult};
use crate::nodes::executor::{Node, NodeKind, NodeRunContext};
use crate::nodes::parse_config;
use crate::template::{extract_selectors, render_template};

#[derive(Debug, Clone, Deserialize)]
struct HumanInputNodeConfig {
    #[serde(default)]
    inputs: Vec<FormInput>,
    #[serde(default)]
    user_actions: Vec<UserAction>,
    #[serde(default)]
    form_content: String,
    #[serde(default)]
    expire_after_secs: Option<u64>,
}

/// The first visit creates a waiting form and returns a paused result. When
/// the run is resumed, the node reads the form back and routes by the
/// submitted action.
pub struct HumanInputNode {
    id: String,
    base: BaseNodeData,
    form_definition: FormDefinition,
    expire_after: Option<TimeDelta>,
}

impl HumanInputNode {
    pub fn init_node_data(id: &str, base: BaseNodeData, data: &Value) -> NodeResult<Self> {
        let cfg: HumanInputNodeConfig = parse_config(data)?;
        if cfg.user_actions.is_empty() {
            return Err(NodeError::ConfigError(
                "human-input node needs at least one user action".to_string(),
            ));
        }
        let form_definition = FormDefinition {
            inputs: cfg.inputs,
            user_actions: cfg.user_actions,
            form_content: cfg.form_content,
        };
        form_definition
            .validate_patterns()
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let expire_after = cfg.expire_after_secs.map(expiry_delta).transpose()?;
        Ok(Self {
            id: id.to_string(),
            base,
            form_definition,
            expire_after,
        })
    }

    async fn create_form(
        &self,
        repo: &Arc<dyn HumanInputFormRepository>,
        ctx: &NodeRunContext,
    ) -> NodeResult<NodeRunResult> {
        let runtime = &ctx.services.runtime;
        let rendered = render_template(&self.form_definition.form_content, &ctx.pool, false)?;
        let now = runtime.time_provider.now();
        let expires_at = match self.expire_after {
            Some(delta) => Some(now.checked_add_signed(delta).ok_or_else(|| {
                NodeError::ExecutionError(format!(
                    "form expiry for node '{}' is out of range",
                    self.id
                ))
            })?),
            None => None,
        };
        let form_id = runtime.id_generator.next_id();

        let form = repo
            .create_form(NewHumanInputForm {
                id: form_id,
                workflow_run_id: ctx.execution_id.clone(),
                node_id: self.id.clone(),
                form_definition: self.form_definition.clone(),
                rendered_content: rendered,
                web_app_token: Some(runtime.id_generator.next_id()),
                created_at: now,
                expires_at,
            })
            .await
            .map_err(repository_error)?;

        info!(node_id = %self.id, form_id = %form.id, "human input form created, pausing");
        Ok(NodeRunResult::paused(form.id))
    }

    fn submitted_result(&self, form: HumanInputForm) -> NodeResult<NodeRunResult> {
        let submission = form.submission.ok_or_else(|| {
            NodeError::ExecutionError(format!("form '{}' is submitted without data", form.id))
        })?;

        let mut outputs: HashMap<String, Segment> = submission
            .data
            .iter()
            .map(|(k, v)| (k.clone(), Segment::from_value(v)))
            .collect();
        outputs.insert(
            ACTION_ID_OUTPUT.to_string(),
            Segment::String(submission.action.clone()),
        );
        outputs.insert(
            RENDERED_CONTENT_OUTPUT.to_string(),
            Segment::String(form.rendered_content),
        );

        Ok(NodeRunResult::succeeded(outputs)
            .with_inputs(submission.data)
            .with_handle(submission.action))
    }
}

fn expiry_delta(secs: u64) -> NodeResult<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| {
            NodeError::ConfigError(format!("expire_after_secs out of range: {}", secs))
        })
}

fn repository_error(e: RepositoryError) -> NodeError {
    NodeError::RepositoryError(e.to_string())
}

#[async_trait]
impl Node for HumanInputNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HumanInput
    }

    fn base(&self) -> &BaseNodeData {
        &self.base
    }

    fn output_names(&self) -> Option<Vec<String>> {
        let mut names: Vec<String> = self
            .form_definition
            .inputs
            .iter()
            .map(|i| i.variable.clone())
            .collect();
        names.push(ACTION_ID_OUTPUT.to_string());
        names.push(RENDERED_CONTENT_OUTPUT.to_string());
        Some(names)
    }

    fn variable_selectors(&self) -> Vec<Selector> {
        extract_selectors(&self.form_definition.form_content)
    }

    async fn run(&self, ctx: &NodeRunContext) -> NodeResult<NodeRunResult> {
        let repo = ctx.services.form_repository.as_ref().ok_or_else(|| {
            NodeError::ConfigError("no human input form repository configured".to_string())
        })?;

        let Some(form_id) = ctx.pending_form_id.as_deref() else {
            return self.create_form(repo, ctx).await;
        };

        let mut form = repo
            .get_form(form_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| NodeError::HumanInputFormMissing {
                node_id: self.id.clone(),
                form_id: form_id.to_string(),
            })?;

        if form.is_overdue(ctx.services.runtime.time_provider.now()) {
            form.expire()
                .map_err(|e| NodeError::ExecutionError(e.to_string()))?;
            repo.save_form(&form).await.map_err(repository_error)?;
        }

        match form.status {
            FormStatus::Waiting => Ok(NodeRunResult::paused(form.id)),
            FormStatus::Submitted => self.submitted_result(form),
            FormStatus::Expired if ctx.has_outgoing_handle(TIMEOUT_HANDLE) => {
                let mut outputs = HashMap::new();
                outputs.insert(
                    RENDERED_CONTENT_OUTPUT.to_string(),
                    Segment::String(form.rendered_content),
                );
                Ok(NodeRunResult::succeeded(outputs).with_handle(TIMEOUT_HANDLE))
            }
            FormStatus::Expired => Err(NodeError::ExecutionError(format!(
                "human input form '{}' expired",
                form.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime_context::{FakeIdGenerator, FakeTimeProvider, RuntimeContext};
    use crate::core::variable_pool::VariablePool;
    use crate::dsl::schema::WorkflowNodeExecutionStatus;
    use crate::infrastructure::InMemoryHumanInputFormRepository;
    use crate::nodes::executor::NodeServices;
    use crate::nodes::test_support::run_context_with;
    use serde_json::json;

    fn node(expire_after_secs: Option<u64>) -> HumanInputNode {
        let base = serde_json::from_value(json!({"type": "human-input"})).unwrap();
        HumanInputNode::init_node_data(
            "review",
            base,
            &json!({
                "inputs": [{"variable": "comment", "type": "paragraph", "required": true}],
                "user_actions": [{"id": "approve", "title": "Approve"}, {"id": "reject"}],
                "form_content": "Review: {{#start.doc#}}",
                "expire_after_secs": expire_after_secs,
            }),
        )
        .unwrap()
    }

    fn services(repo: Arc<InMemoryHumanInputFormRepository>, now: i64) -> NodeServices {
        NodeServices {
            runtime: RuntimeContext::new(
                Arc::new(FakeTimeProvider::new(now)),
                Arc::new(FakeIdGenerator::new("form")),
            ),
            form_repository: Some(repo),
            ..Default::default()
        }
    }

    fn pool() -> VariablePool {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "doc"), "draft").unwrap();
        pool
    }

    #[tokio::test]
    async fn test_first_run_creates_waiting_form_and_pauses() {
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let ctx = run_context_with(pool(), services(repo.clone(), 1_000));
        let result = node(None).run(&ctx).await.unwrap();

        assert_eq!(result.status, WorkflowNodeExecutionStatus::Paused);
        let form_id = result.paused_form_id().unwrap().to_string();
        let form = repo.get_form(&form_id).await.unwrap().unwrap();
        assert_eq!(form.status, FormStatus::Waiting);
        assert_eq!(form.rendered_content, "Review: draft");
        assert_eq!(form.workflow_run_id, "exec-1");
    }

    #[tokio::test]
    async fn test_resume_routes_by_submitted_action() {
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let node = node(None);
        let first = node
            .run(&run_context_with(pool(), services(repo.clone(), 1_000)))
            .await
            .unwrap();
        let form_id = first.paused_form_id().unwrap().to_string();

        let mut form = repo.get_form(&form_id).await.unwrap().unwrap();
        form.submit(
            HashMap::from([("comment".to_string(), json!("ok"))]),
            "approve",
            None,
            chrono::Utc::now(),
        )
        .unwrap();
        repo.save_form(&form).await.unwrap();

        let mut ctx = run_context_with(pool(), services(repo.clone(), 1_000));
        ctx.pending_form_id = Some(form_id);
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.status, WorkflowNodeExecutionStatus::Succeeded);
        assert_eq!(result.edge_source_handle, "approve");
        assert_eq!(result.outputs["comment"], Segment::from("ok"));
        assert_eq!(result.outputs[ACTION_ID_OUTPUT], Segment::from("approve"));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_resume_with_missing_form_is_distinct_error() {
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let mut ctx = run_context_with(pool(), services(repo, 1_000));
        ctx.pending_form_id = Some("gone".into());
        let err = node(None).run(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::HumanInputFormMissing { form_id, .. } if form_id == "gone"));
    }

    #[tokio::test]
    async fn test_resume_while_waiting_pauses_again() {
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let node = node(None);
        let first = node
            .run(&run_context_with(pool(), services(repo.clone(), 1_000)))
            .await
            .unwrap();
        let form_id = first.paused_form_id().unwrap().to_string();

        let mut ctx = run_context_with(pool(), services(repo.clone(), 1_000));
        ctx.pending_form_id = Some(form_id.clone());
        let again = node.run(&ctx).await.unwrap();
        assert_eq!(again.paused_form_id(), Some(form_id.as_str()));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_form_takes_timeout_handle_or_fails() {
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let node = node(Some(60));
        let first = node
            .run(&run_context_with(pool(), services(repo.clone(), 1_000)))
            .await
            .unwrap();
        let form_id = first.paused_form_id().unwrap().to_string();

        let mut ctx = run_context_with(pool(), services(repo.clone(), 2_000));
        ctx.pending_form_id = Some(form_id.clone());
        let err = node.run(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::ExecutionError(_)));
        assert_eq!(
            repo.get_form(&form_id).await.unwrap().unwrap().status,
            FormStatus::Expired
        );

        ctx.outgoing_handles = vec!["approve".into(), TIMEOUT_HANDLE.into()];
        let result = node.run(&ctx).await.unwrap();
        assert_eq!(result.edge_source_handle, TIMEOUT_HANDLE);
    }

    #[test]
    fn test_requires_user_actions() {
        let base = serde_json::from_value(json!({"type": "human-input"})).unwrap();
        assert!(HumanInputNode::init_node_data("hi", base, &json!({"inputs": []})).is_err());
    }

    #[test]
    fn test_out_of_range_expiry_is_config_error() {
        for secs in [1_000_000_000_000_000_u64, u64::MAX] {
            let base = serde_json::from_value(json!({"type": "human-input"})).unwrap();
            let result = HumanInputNode::init_node_data(
                "hi",
                base,
                &json!({"user_actions": [{"id": "ok"}], "expire_after_secs": secs}),
            );
            assert!(matches!(result, Err(NodeError::ConfigError(_))), "secs = {}", secs);
        }
    }

    #[tokio::test]
    async fn test_expiry_past_the_calendar_end_fails_the_node() {
        let base = serde_json::from_value(json!({"type": "human-input"})).unwrap();
        // Fits in a TimeDelta but not on top of the current time.
        let node = HumanInputNode::init_node_data(
            "hi",
            base,
            &json!({"user_actions": [{"id": "ok"}], "expire_after_secs": 9_000_000_000_000_u64}),
        )
        .unwrap();
        let repo = Arc::new(InMemoryHumanInputFormRepository::new());
        let err = node
            .run(&run_context_with(pool(), services(repo.clone(), 1_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ExecutionError(_)));
        assert_eq!(repo.len().await, 0);
    }

    #[test]
    fn test_invalid_input_pattern_is_config_error() {
        let base = serde_json::from_value(json!({"type": "human-input"})).unwrap();
        let result = HumanInputNode::init_node_data(
            "hi",
            base,
            &json!({
                "inputs": [{"variable": "code", "pattern": "("}],
                "user_actions": [{"id": "ok"}]
            }),
        );
        assert!(matches!(result, Err(NodeError::ConfigError(msg)) if msg.contains("code")));
    }
}
