// ActionQueueMessage: a queue message whose body names an action mapped to a
// local executable.

use crate::error::ActionError;
use crate::message::{QueueMessage, RawMessage};
use crate::process_invoker::ProcessInvoker;

use agent_common::{ActionMapping, ActionResult, TraceWriter};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fields of the message body the agent needs. Everything else is passed
/// through untouched to the executable via `-payload`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub alert: Option<AlertRef>,
    #[serde(default)]
    pub entity: Option<EntityRef>,
    #[serde(default, rename = "mappedActionV2")]
    pub mapped_action: Option<MappedActionRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRef {
    #[serde(default)]
    pub alert_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityRef {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappedActionRef {
    #[serde(default)]
    pub name: String,
}

impl ActionPayload {
    /// The mapped action name when the control plane sent one, else the raw action.
    pub fn action_name(&self) -> &str {
        self.mapped_action
            .as_ref()
            .map(|m| m.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(self.action.as_str())
    }

    fn result_template(&self) -> ActionResult {
        ActionResult {
            alert_id: self
                .alert
                .as_ref()
                .map(|a| a.alert_id.clone())
                .unwrap_or_default(),
            entity_id: self
                .entity
                .as_ref()
                .map(|e| e.id.clone())
                .unwrap_or_default(),
            entity_type: self
                .entity
                .as_ref()
                .map(|e| e.entity_type.clone())
                .unwrap_or_default(),
            action: self.action_name().to_string(),
            action_type: self.action_type.clone(),
            is_successful: false,
            failure_message: String::new(),
        }
    }
}

/// Context shared by every action message built from one configuration.
#[derive(Clone)]
pub struct ActionContext {
    pub mappings: Arc<HashMap<String, ActionMapping>>,
    /// Root of the cloned runbook repository, for `git`-sourced mappings.
    pub repository_root: Option<PathBuf>,
    pub api_key: String,
    pub base_url: String,
    pub trace: Arc<dyn TraceWriter>,
}

/// A raw message that runs its mapped executable when processed.
pub struct ActionQueueMessage {
    message: RawMessage,
    context: ActionContext,
}

impl ActionQueueMessage {
    pub fn new(message: RawMessage, context: ActionContext) -> Self {
        Self { message, context }
    }

    fn resolve_executable(&self, mapping: &ActionMapping) -> PathBuf {
        match (&self.context.repository_root, mapping.is_repository_sourced()) {
            (Some(root), true) => root.join(&mapping.filepath),
            _ => PathBuf::from(&mapping.filepath),
        }
    }

    /// Git-sourced actions run from the repository root.
    fn working_directory(&self, mapping: &ActionMapping) -> Option<&Path> {
        self.context
            .repository_root
            .as_deref()
            .filter(|_| mapping.is_repository_sourced())
    }

    fn arguments(&self, mapping: &ActionMapping) -> Vec<String> {
        let mut args = mapping.args.clone();
        args.extend([
            "-payload".to_string(),
            self.message.body.clone(),
            "-apiKey".to_string(),
            self.context.api_key.clone(),
            "-baseUrl".to_string(),
            self.context.base_url.clone(),
        ]);
        args
    }
}

#[async_trait]
impl QueueMessage for ActionQueueMessage {
    fn message(&self) -> &RawMessage {
        &self.message
    }

    async fn process(&self) -> Result<ActionResult, ActionError> {
        let payload: ActionPayload = serde_json::from_str(&self.message.body)?;
        let action = payload.action_name();

        let mapping = self
            .context
            .mappings
            .get(action)
            .ok_or_else(|| ActionError::NoMapping(action.to_string()))?;

        let executable = self.resolve_executable(mapping);
        let file = executable.to_string_lossy().into_owned();

        self.context.trace.info(&format!(
            "Running action '{}' of message[{}] with '{}'",
            action, self.message.message_id, file
        ));

        let invoker = ProcessInvoker::new(self.context.trace.clone());
        let output = invoker
            .execute(
                self.working_directory(mapping),
                &file,
                &self.arguments(mapping),
                &mapping.env,
            )
            .await
            .map_err(|e| ActionError::Execution {
                file: file.clone(),
                reason: format!("{:#}", e),
            })?;

        let result = payload.result_template();
        if output.success() {
            return Ok(ActionResult {
                is_successful: true,
                ..result
            });
        }

        let failure = if output.stderr.is_empty() {
            format!("Process exited with code {}", output.exit_code)
        } else {
            output.stderr.join("\n")
        };
        Ok(result.with_failure(failure))
    }
}
