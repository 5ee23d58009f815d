//! MCP Protocol Types
//!
//! JSON-RPC 2.0 framing and the capability records the gateway aggregates.
//! The wire shape matches the SSE + HTTP-POST transport: requests travel as
//! JSON POST bodies, responses and notifications arrive as `message` events
//! on the SSE stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// JSON-RPC 2.0 Types
// =============================================================================

/// JSON-RPC request ID - string, number, or null.
///
/// Hashable so it can key a transport's pending-request table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    String(String),
    Number(i64),
    Null,
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::String(s) => write!(f, "{}", s),
            JsonRpcId::Number(n) => write!(f, "{}", n),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

/// JSON-RPC 2.0 request (or notification, when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request carrying an id.
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    // Standard JSON-RPC error codes
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self {
            code: Self::PARSE_ERROR,
            message: msg.into(),
            data: None,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_REQUEST,
            message: msg.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: msg.into(),
            data: None,
        }
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: msg.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Any inbound JSON-RPC message, classified by shape.
///
/// Classification is a small parser rather than an untagged serde enum: a
/// payload with `method` and `id` is a request, `method` alone is a
/// notification, anything else must parse as a response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcRequest),
}

impl JsonRpcMessage {
    /// Parse a raw JSON payload into a classified message.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(data)?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("method").is_some() {
            let request: JsonRpcRequest = serde_json::from_value(value)?;
            if request.id.is_some() {
                Ok(JsonRpcMessage::Request(request))
            } else {
                Ok(JsonRpcMessage::Notification(request))
            }
        } else {
            let response: JsonRpcResponse = serde_json::from_value(value)?;
            Ok(JsonRpcMessage::Response(response))
        }
    }

    /// The message's correlation id, if any.
    pub fn id(&self) -> Option<&JsonRpcId> {
        match self {
            JsonRpcMessage::Request(r) | JsonRpcMessage::Notification(r) => r.id.as_ref(),
            JsonRpcMessage::Response(r) => r.id.as_ref(),
        }
    }

    /// True for requests that expect a correlated response.
    pub fn expects_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }
}

// =============================================================================
// SSE Handshake
// =============================================================================

/// Payload of the `endpoint` event, the first event on every SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointEvent {
    pub endpoint: String,
    pub session_id: String,
}

// =============================================================================
// Capability Records
// =============================================================================

/// A tool exposed by an upstream, with source attribution.
///
/// `source` is attached during discovery; upstream `tools/list` payloads do
/// not carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Argument descriptor inside a prompt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template exposed by an upstream, with source attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// A resource exposed by an upstream, with source attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The capability kinds an upstream can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl CapabilityKind {
    /// Wire name of the list method for this kind.
    pub fn list_method(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools/list",
            CapabilityKind::Prompt => "prompts/list",
            CapabilityKind::Resource => "resources/list",
        }
    }

    /// Property the list result carries its records under.
    pub fn list_property(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools",
            CapabilityKind::Prompt => "prompts",
            CapabilityKind::Resource => "resources",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::Tool => write!(f, "tool"),
            CapabilityKind::Prompt => write!(f, "prompt"),
            CapabilityKind::Resource => write!(f, "resource"),
        }
    }
}

// =============================================================================
// MCP Request Params
// =============================================================================

/// tools/call request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// prompts/get request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// resources/get request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGetParams {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/list",
            "params": {}
        }"#;

        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, Some(JsonRpcId::Number(1)));
    }

    #[test]
    fn test_message_classification() {
        let request =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#).unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(_)));

        let notification =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(matches!(notification, JsonRpcMessage::Notification(_)));

        let response =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":1,"result":{"echo":"hi"}}"#).unwrap();
        assert!(matches!(response, JsonRpcMessage::Response(_)));

        let error = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match error {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND)
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_id_is_hashable_across_forms() {
        use std::collections::HashMap;

        let mut pending: HashMap<JsonRpcId, &str> = HashMap::new();
        pending.insert(JsonRpcId::Number(7), "seven");
        pending.insert(JsonRpcId::String("7".to_string()), "seven-string");

        // String and numeric ids are distinct keys.
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.remove(&JsonRpcId::Number(7)), Some("seven"));
    }

    #[test]
    fn test_response_helpers() {
        let ok = JsonRpcResponse::success(Some(JsonRpcId::Number(1)), serde_json::json!({}));
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let err = JsonRpcResponse::error(
            Some(JsonRpcId::Number(1)),
            JsonRpcError::method_not_found("tools/fly"),
        );
        assert_eq!(err.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_endpoint_event_payload() {
        let ev: EndpointEvent =
            serde_json::from_str(r#"{"endpoint":"/message","sessionId":"abc123"}"#).unwrap();
        assert_eq!(ev.endpoint, "/message");
        assert_eq!(ev.session_id, "abc123");
    }

    #[test]
    fn test_tool_record_normalization_shape() {
        // Upstream payloads omit `source`; discovery fills it in later.
        let tool: ToolRecord = serde_json::from_str(
            r#"{"name":"echo","description":"Echo text","inputSchema":{"type":"object"}}"#,
        )
        .unwrap();
        assert!(tool.source.is_empty());
        assert_eq!(tool.name, "echo");
        assert!(tool.input_schema.is_object());
    }
}
