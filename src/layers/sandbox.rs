use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{GraphEngineLayer, LayerContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::sandbox::{SandboxManager, SandboxProviderService, VirtualEnvironment};

/// Provisions one sandbox per run and releases it when the run ends.
///
/// The environment is registered in the [`SandboxManager`] under the
/// execution id so code nodes can find it. Release happens at most once,
/// even when `on_graph_end` is called again.
pub struct SandboxLayer {
    provider: Arc<dyn SandboxProviderService>,
    manager: Arc<SandboxManager>,
    environments: HashMap<String, String>,
    active: Mutex<Option<(String, Arc<dyn VirtualEnvironment>)>>,
}

impl SandboxLayer {
    pub fn new(provider: Arc<dyn SandboxProviderService>, manager: Arc<SandboxManager>) -> Self {
        Self {
            provider,
            manager,
            environments: HashMap::new(),
            active: Mutex::new(None),
        }
    }

    /// Environment variables handed to the provider.
    pub fn with_environments(mut self, environments: HashMap<String, String>) -> Self {
        self.environments = environments;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

#[async_trait]
impl GraphEngineLayer for SandboxLayer {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn on_graph_start(&self, ctx: &LayerContext) -> WorkflowResult<()> {
        let env = self
            .provider
            .create_sandbox(&ctx.init_params.tenant_id, &self.environments)
            .await
            .map_err(WorkflowError::SandboxInit)?;
        info!(
            execution_id = %ctx.execution_id,
            sandbox_id = %env.metadata().id,
            "sandbox provisioned"
        );
        if let Some(stale) = self.manager.register(&ctx.execution_id, Arc::clone(&env)) {
            warn!(
                execution_id = %ctx.execution_id,
                sandbox_id = %stale.metadata().id,
                "releasing a sandbox left registered for this execution"
            );
            if let Err(e) = stale.release_environment().await {
                warn!(execution_id = %ctx.execution_id, error = %e, "stale sandbox release failed");
            }
        }
        *self.active.lock() = Some((ctx.execution_id.clone(), env));
        Ok(())
    }

    async fn on_graph_end(
        &self,
        _ctx: &LayerContext,
        _error: Option<&WorkflowError>,
    ) -> WorkflowResult<()> {
        let Some((execution_id, env)) = self.active.lock().take() else {
            debug!("sandbox already released");
            return Ok(());
        };
        if let Err(e) = env.release_environment().await {
            warn!(execution_id = %execution_id, error = %e, "sandbox release failed");
        }
        self.manager.unregister(&execution_id);
        info!(execution_id = %execution_id, "sandbox released");
        Ok(())
    }
}
