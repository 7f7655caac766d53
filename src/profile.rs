//! Profile: an immutable snapshot of a resolved profile, dispatching
//! `call-tool`/`get-prompt` with exported-name -> original-name rewrite.
//! Built fresh per resolve, per request, rather than a single flat cache
//! shared process-wide.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult, ListPromptsResult,
    ListToolsResult, Prompt, Tool,
};

use crate::error::GatewayError;
use crate::registry::ConnectorRegistry;
use crate::resolver::ResolvedProfile;

/// Binds a resolved profile to the live connector registry for dispatch.
///
/// Owns an `Arc` rather than borrowing the registry so a `Profile` can be
/// moved into the per-request `GatewayServerHandler`, which must be
/// `'static` to satisfy `rmcp::ServerHandler`.
pub struct Profile {
    resolved: ResolvedProfile,
    registry: Arc<ConnectorRegistry>,
}

impl Profile {
    pub fn new(resolved: ResolvedProfile, registry: Arc<ConnectorRegistry>) -> Self {
        Self { resolved, registry }
    }

    pub fn name(&self) -> &str {
        &self.resolved.name
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.resolved
            .tools
            .iter()
            .map(|(_, entry)| entry.descriptor.clone())
            .collect()
    }

    pub fn list_tools_result(&self) -> ListToolsResult {
        ListToolsResult::with_all_items(self.list_tools())
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.resolved
            .prompts
            .iter()
            .map(|(_, entry)| entry.descriptor.clone())
            .collect()
    }

    pub fn list_prompts_result(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self.list_prompts(),
            next_cursor: None,
        }
    }

    pub async fn call_tool(
        &self,
        params: CallToolRequestParam,
    ) -> Result<CallToolResult, GatewayError> {
        let exported_name = params.name.to_string();
        let entry = self.resolved.tool(&exported_name).ok_or_else(|| {
            GatewayError::MethodNotFound(format!("unknown tool: {exported_name}"))
        })?;

        let connector = self
            .registry
            .get(&entry.connector_id)
            .map_err(|error| GatewayError::Internal(error.to_string()))?;

        let upstream_params = CallToolRequestParam {
            name: entry.original_name.clone().into(),
            arguments: params.arguments,
        };

        connector
            .call_tool(upstream_params)
            .await
            .map_err(|error| classify_connector_error(&error))
    }

    pub async fn get_prompt(
        &self,
        params: GetPromptRequestParam,
    ) -> Result<GetPromptResult, GatewayError> {
        let exported_name = params.name.clone();
        let entry = self.resolved.prompt(&exported_name).ok_or_else(|| {
            GatewayError::MethodNotFound(format!("unknown prompt: {exported_name}"))
        })?;

        let connector = self
            .registry
            .get(&entry.connector_id)
            .map_err(|error| GatewayError::Internal(error.to_string()))?;

        let upstream_params = GetPromptRequestParam {
            name: entry.original_name.clone(),
            arguments: params.arguments,
        };

        connector
            .get_prompt(upstream_params)
            .await
            .map_err(|error| classify_connector_error(&error))
    }
}

/// A connector that has been disposed fails every subsequent call with an
/// "is disposed" message; that case gets its own error kind rather than
/// folding into a generic internal error.
fn classify_connector_error(error: &anyhow::Error) -> GatewayError {
    let message = error.to_string();
    if message.contains("is disposed") {
        GatewayError::Disposed(message)
    } else {
        GatewayError::Internal(message)
    }
}
