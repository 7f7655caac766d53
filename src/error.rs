//! Gateway error kinds (invalid-request / method-not-found / internal-error /
//! disposed) and their mapping onto MCP error codes and the pre-transport
//! JSON-RPC error envelope.

use rmcp::ErrorData as McpError;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    MethodNotFound(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Disposed(String),
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::Internal(_) => -32603,
            Self::Disposed(_) => -32001,
        }
    }

    /// The pre-transport JSON-RPC error envelope shape.
    pub fn to_json_rpc_body(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
            "id": Value::Null,
        })
    }
}

impl From<GatewayError> for McpError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidRequest(msg) => McpError::invalid_request(msg, None),
            GatewayError::MethodNotFound(msg) => McpError::method_not_found(msg, None),
            GatewayError::Internal(msg) => McpError::internal_error(msg, None),
            GatewayError::Disposed(msg) => McpError::internal_error(msg, None),
        }
    }
}
