//! Generic MCP HTTP surface shared by every server.
//!
//! A server describes its catalog (resources, tools, prompts) and implements
//! the three lookups; [`router`] turns it into the standard route set:
//!
//! ```text
//! GET  /                  server info
//! GET  /health
//! GET  /resources         GET /resources/*uri
//! GET  /tools             POST /tools/:name
//! GET  /prompts           POST /prompts/:name
//! ```

mod router;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{Error, Result};

pub use router::router;

pub const JSON_MIME: &str = "application/json";

/// Resource descriptor.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    pub fn json(uri: &str, name: &str, description: &str) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        }
    }
}

/// Tool descriptor.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
}

/// Prompt descriptor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    pub fn new(name: &str, description: &str, arguments: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            arguments: arguments
                .iter()
                .map(|(name, description)| PromptArgument {
                    name: name.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        }
    }
}

/// An MCP server.
///
/// Lookups for names outside the catalog return [`crate::Error::NotFound`],
/// which the router maps to 404. Tool calls report their own failures as
/// `{"success": false, "error": ...}` values.
#[async_trait]
pub trait McpServer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn resources(&self) -> Vec<Resource>;

    fn tools(&self) -> Vec<Tool>;

    fn prompts(&self) -> Vec<Prompt>;

    async fn read_resource(&self, uri: &str) -> Result<Value>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value>;
}

/// Resource body: the value rendered as pretty JSON text.
pub fn resource_contents<T: Serialize + ?Sized>(uri: &str, value: &T) -> Result<Value> {
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": JSON_MIME,
            "text": serde_json::to_string_pretty(value)?,
        }]
    }))
}

/// Prompt body: a single user message.
pub fn prompt_messages(text: impl Into<String>) -> Value {
    json!({
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text.into() }
        }]
    })
}

/// Decode tool or prompt arguments into their typed form.
pub fn arguments<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))
}

/// Failed tool result.
pub fn tool_failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_wire_names() {
        let resource = serde_json::to_value(Resource::json("task-queue", "Task Queue", "Open tasks")).unwrap();
        assert_eq!(resource["mimeType"], "application/json");

        let tool = serde_json::to_value(Tool::new("assign_task", "Assign", json!({"type": "object"}))).unwrap();
        assert_eq!(tool["inputSchema"]["type"], "object");

        let prompt = serde_json::to_value(Prompt::new("code-review", "Review", &[("diff", "Code diff")])).unwrap();
        assert_eq!(prompt["arguments"][0]["name"], "diff");
    }

    #[test]
    fn test_resource_contents_is_pretty_json() {
        let body = resource_contents("webhooks", &json!([{"id": 1}])).unwrap();
        let text = body["contents"][0]["text"].as_str().unwrap();
        assert!(text.contains('\n'));
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!([{"id": 1}]));
        assert_eq!(body["contents"][0]["uri"], "webhooks");
    }

    #[test]
    fn test_arguments_reports_missing_fields() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            task_id: String,
        }

        let args: Args = arguments(json!({"task_id": "t-1"})).unwrap();
        assert_eq!(args.task_id, "t-1");

        let err = arguments::<Args>(json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("task_id"));
    }

    #[test]
    fn test_prompt_and_failure_shapes() {
        let prompt = prompt_messages("hello");
        assert_eq!(prompt["messages"][0]["role"], "user");
        assert_eq!(prompt["messages"][0]["content"]["text"], "hello");

        assert_eq!(
            tool_failure("Project not connected to GitHub"),
            json!({"success": false, "error": "Project not connected to GitHub"})
        );
    }
}
