//! Per-request Server Factory: for each inbound HTTP request, a fresh
//! `ServerHandler` bound to that request's resolved `Profile`, dispatching
//! through an already-resolved, immutable profile instead of fanning out
//! across every registered upstream on every call.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};

use crate::profile::Profile;

/// One instance per inbound request. Cheap to clone: the factory closure
/// handed to `StreamableHttpService` is called once per session and just
/// clones the `Arc`.
#[derive(Clone)]
pub struct GatewayServerHandler {
    profile: Arc<Profile>,
}

impl GatewayServerHandler {
    pub fn new(profile: Arc<Profile>) -> Self {
        Self { profile }
    }
}

impl ServerHandler for GatewayServerHandler {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = "mcp-gateway".to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.capabilities = ServerCapabilities::builder()
            .enable_tools()
            .enable_prompts()
            .build();
        info
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(self.profile.list_tools_result())
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(self.profile.list_prompts_result())
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.profile
            .call_tool(request)
            .await
            .map_err(McpError::from)
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.profile
            .get_prompt(request)
            .await
            .map_err(McpError::from)
    }
}
