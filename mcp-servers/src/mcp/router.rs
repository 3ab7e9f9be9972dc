use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::McpServer;
use crate::Error;

type SharedServer = Arc<dyn McpServer>;

/// Build the MCP routes for `server`.
pub fn router(server: SharedServer) -> Router {
    info!(
        server = %server.name(),
        resources = server.resources().len(),
        tools = server.tools().len(),
        prompts = server.prompts().len(),
        "mcp_routes_registered"
    );

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/resources", get(list_resources))
        .route("/resources/*uri", get(read_resource))
        .route("/tools", get(list_tools))
        .route("/tools/:name", post(call_tool))
        .route("/prompts", get(list_prompts))
        .route("/prompts/:name", post(get_prompt))
        .with_state(server)
}

fn error_response(e: Error) -> Response {
    let status = match &e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "mcp_request_failed");
    }
    (status, Json(json!({ "detail": e.to_string() }))).into_response()
}

async fn root(State(server): State<SharedServer>) -> Json<Value> {
    Json(json!({
        "name": server.name(),
        "version": server.version(),
        "status": "running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn list_resources(State(server): State<SharedServer>) -> Json<Value> {
    Json(json!({ "resources": server.resources() }))
}

async fn read_resource(State(server): State<SharedServer>, Path(uri): Path<String>) -> Response {
    debug!(uri = %uri, "mcp_resource_read");
    match server.read_resource(&uri).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_tools(State(server): State<SharedServer>) -> Json<Value> {
    Json(json!({ "tools": server.tools() }))
}

async fn call_tool(
    State(server): State<SharedServer>,
    Path(name): Path<String>,
    arguments: Option<Json<Value>>,
) -> Response {
    let arguments = arguments.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    info!(server = %server.name(), tool = %name, "mcp_tool_called");
    match server.call_tool(&name, arguments).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_prompts(State(server): State<SharedServer>) -> Json<Value> {
    Json(json!({ "prompts": server.prompts() }))
}

async fn get_prompt(
    State(server): State<SharedServer>,
    Path(name): Path<String>,
    arguments: Option<Json<Value>>,
) -> Response {
    let arguments = arguments.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    match server.get_prompt(&name, arguments).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{prompt_messages, resource_contents, tool_failure, Prompt, Resource, Tool};
    use crate::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoServer;

    #[async_trait]
    impl McpServer for EchoServer {
        fn name(&self) -> &str {
            "echo"
        }

        fn resources(&self) -> Vec<Resource> {
            vec![Resource::json("things/all", "Things", "Every thing")]
        }

        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("echo", "Echo arguments", json!({"type": "object"}))]
        }

        fn prompts(&self) -> Vec<Prompt> {
            vec![Prompt::new("greet", "Greeting", &[])]
        }

        async fn read_resource(&self, uri: &str) -> Result<Value> {
            match uri {
                "things/all" => resource_contents(uri, &json!(["a"])),
                _ => Err(Error::NotFound(format!("Resource '{}'", uri))),
            }
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
            match name {
                "echo" if arguments.get("fail").is_some() => Ok(tool_failure("asked to fail")),
                "echo" => Ok(json!({"success": true, "arguments": arguments})),
                _ => Err(Error::NotFound(format!("Tool '{}'", name))),
            }
        }

        async fn get_prompt(&self, name: &str, _arguments: Value) -> Result<Value> {
            match name {
                "greet" => Ok(prompt_messages("hi")),
                _ => Err(Error::NotFound(format!("Prompt '{}'", name))),
            }
        }
    }

    fn app() -> Router {
        router(Arc::new(EchoServer))
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, body) = send(get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "echo");
        assert_eq!(body["status"], "running");

        let (_, body) = send(get_request("/health")).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_catalog_listings() {
        let (_, body) = send(get_request("/tools")).await;
        assert_eq!(body["tools"][0]["name"], "echo");
        let (_, body) = send(get_request("/resources")).await;
        assert_eq!(body["resources"][0]["uri"], "things/all");
        let (_, body) = send(get_request("/prompts")).await;
        assert_eq!(body["prompts"][0]["name"], "greet");
    }

    #[tokio::test]
    async fn test_resource_uri_may_contain_slashes() {
        let (status, body) = send(get_request("/resources/things/all")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contents"][0]["uri"], "things/all");

        let (status, body) = send(get_request("/resources/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Resource 'missing' not found");
    }

    #[tokio::test]
    async fn test_tool_calls() {
        let (status, body) = send(post_json("/tools/echo", json!({"x": 1}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["arguments"]["x"], 1);

        let (status, body) = send(post_json("/tools/echo", json!({"fail": true}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);

        let (status, body) = send(post_json("/tools/nope", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Tool 'nope' not found");
    }

    #[tokio::test]
    async fn test_tool_call_without_body_uses_empty_arguments() {
        let request = Request::builder()
            .method("POST")
            .uri("/tools/echo")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_prompts() {
        let (status, body) = send(post_json("/prompts/greet", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["content"]["text"], "hi");

        let (status, _) = send(post_json("/prompts/unknown", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
