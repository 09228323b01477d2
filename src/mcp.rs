//! MCP (Model Context Protocol) server implementation.
//!
//! Exposes image editing as tools that AI agents can call.

use crate::image::gemini::{api_key_from_env, API_KEY_ENV_VARS};
use crate::image::{GeminiEditor, GeminiModel, ImageEditor};
use crate::session::{EditSession, EditStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for a single edit, retries included.
const EDIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum input images per edit.
const MAX_INPUT_IMAGES: usize = 14;

/// Decodes a base64 image that may be imperfectly formatted.
///
/// Agents frequently send base64 with a data URI prefix, missing padding or
/// embedded newlines. Returns the bytes and the MIME type named by a data URI
/// prefix, if there was one.
fn decode_image_input(input: &str) -> Result<(Vec<u8>, Option<String>), base64::DecodeError> {
    use base64::Engine;

    let (mime, b64) = match input.find(";base64,") {
        Some(pos) => {
            let mime = input[..pos].trim().trim_start_matches("data:").to_string();
            (Some(mime).filter(|m| !m.is_empty()), &input[pos + 8..])
        }
        None => (None, input),
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let data = match base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        Ok(data) => data,
        Err(_) => base64::engine::general_purpose::STANDARD_NO_PAD.decode(&cleaned)?,
    };
    Ok((data, mime))
}

/// Validates that an output path is safe to write to.
///
/// Rejects paths containing `..` components.
fn validate_output_path(path: &str) -> std::result::Result<(), String> {
    let path = std::path::Path::new(path);
    for component in path.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err("Path must not contain '..' components".into());
        }
    }
    Ok(())
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Wraps a JSON payload as MCP text content.
    fn text_content(id: Value, payload: &Value) -> Self {
        let content = json!([{
            "type": "text",
            "text": serde_json::to_string_pretty(payload).unwrap_or_default()
        }]);
        Self::success(id, json!({ "content": content }))
    }
}

/// MCP tool definition.
#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// Edit image tool parameters.
#[derive(Debug, Clone, Deserialize)]
struct EditImageParams {
    instruction: String,
    /// Base64 images or data URIs, sent in order.
    input_images: Vec<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
}

/// MCP server for image editing.
pub struct McpServer {
    initialized: bool,
    default_model: GeminiModel,
    editor: Option<Arc<dyn ImageEditor>>,
}

impl McpServer {
    /// Creates a server that builds a Gemini editor per call.
    pub fn new() -> Self {
        Self {
            initialized: false,
            default_model: GeminiModel::default(),
            editor: None,
        }
    }

    /// Sets the model used when a call does not name one.
    pub fn with_default_model(mut self, model: GeminiModel) -> Self {
        self.default_model = model;
        self
    }

    /// Routes every edit through the given editor instead of Gemini.
    pub fn with_editor(mut self, editor: Arc<dyn ImageEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Run the MCP server, reading from stdin and writing to stdout.
    pub async fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(resp) = self.handle_message(&line).await {
                let json = serde_json::to_string(&resp).unwrap_or_else(|e| {
                    json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32603, "message": e.to_string()}}).to_string()
                });
                writeln!(stdout, "{}", json)?;
                stdout.flush()?;
            }
        }

        tracing::info!("stdin closed, MCP server exiting");
        Ok(())
    }

    async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                -32600,
                "Invalid JSON-RPC version",
            ));
        }

        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id, &request.params)),
            "initialized" | "notifications/initialized" => None,
            "tools/list" => Some(self.handle_tools_list(id)),
            "tools/call" => Some(self.handle_tools_call(id, &request.params).await),
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            _ => Some(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&mut self, id: Value, params: &Value) -> JsonRpcResponse {
        self.initialized = true;

        if let Some(client_info) = params.get("clientInfo") {
            tracing::info!(
                client = client_info
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                version = client_info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                "MCP client connected"
            );
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "nanoedit",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let model_names: Vec<&str> = GeminiModel::ALL
            .iter()
            .flat_map(|m| [m.alias(), m.as_str()])
            .collect();

        let tools = vec![
            Tool {
                name: "list_models",
                description: "List the Gemini image models available for editing and whether an API key is configured",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            Tool {
                name: "edit_image",
                description:
                    "Edit one or more images with a natural-language instruction using Gemini. Returns the edited image, or the model's explanation when it declines to produce one.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "instruction": {
                            "type": "string",
                            "description": "Description of the desired edit"
                        },
                        "input_images": {
                            "type": "array",
                            "minItems": 1,
                            "maxItems": MAX_INPUT_IMAGES,
                            "items": { "type": "string" },
                            "description": "Base64-encoded input images. Accepts raw base64 or data URIs (e.g. data:image/png;base64,...)."
                        },
                        "output_path": {
                            "type": "string",
                            "description": "Path to save the edited image (optional, returns base64 if not provided)"
                        },
                        "model": {
                            "type": "string",
                            "enum": model_names,
                            "description": "Model variant (default: nano-banana)"
                        },
                        "seed": {
                            "type": "integer",
                            "description": "Seed for more repeatable output"
                        }
                    },
                    "required": ["instruction", "input_images"]
                }),
            },
        ];

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match tool_name {
            "list_models" => self.list_models(id),
            "edit_image" => self.edit_image(id, arguments).await,
            _ => JsonRpcResponse::error(id, -32602, format!("Unknown tool: {}", tool_name)),
        }
    }

    fn list_models(&self, id: Value) -> JsonRpcResponse {
        let models: Vec<Value> = GeminiModel::ALL
            .iter()
            .map(|m| {
                json!({
                    "alias": m.alias(),
                    "model": m.as_str(),
                    "default": *m == self.default_model,
                })
            })
            .collect();

        let payload = json!({
            "provider": "gemini",
            "api_key_env": API_KEY_ENV_VARS,
            "api_key_set": self.editor.is_some() || api_key_from_env().is_some(),
            "models": models,
        });

        JsonRpcResponse::text_content(id, &payload)
    }

    async fn edit_image(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: EditImageParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };

        if let Some(path) = &params.output_path {
            if let Err(msg) = validate_output_path(path) {
                return JsonRpcResponse::error(id, -32602, msg);
            }
        }

        if params.input_images.len() > MAX_INPUT_IMAGES {
            return JsonRpcResponse::error(
                id,
                -32602,
                format!("At most {} input images are supported", MAX_INPUT_IMAGES),
            );
        }

        let model = match params.model.as_deref() {
            None => self.default_model,
            Some(name) => match GeminiModel::from_name(name) {
                Some(m) => m,
                None => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!("Unknown Gemini model: {}", name),
                    );
                }
            },
        };

        let mut session = EditSession::new();
        if let Some(seed) = params.seed {
            session = session.with_seed(seed);
        }
        session.set_instruction(params.instruction.as_str());

        // Undecodable or non-image inputs are skipped, not fatal.
        let mut skipped = Vec::new();
        for (i, input) in params.input_images.iter().enumerate() {
            let name = format!("input_images[{}]", i);
            match decode_image_input(input) {
                Ok((data, mime)) => {
                    if let Err(e) = session.upload_bytes(name, data, mime.as_deref()) {
                        skipped.push(e.to_string());
                    }
                }
                Err(e) => skipped.push(format!("{}: invalid base64: {}", name, e)),
            }
        }

        // Fail fast on incomplete input before touching the network
        if let Err(e) = session.build_request() {
            let mut message = e.to_string();
            if !skipped.is_empty() {
                message = format!("{} ({})", message, skipped.join("; "));
            }
            return JsonRpcResponse::error(id, -32602, message);
        }

        let editor: Arc<dyn ImageEditor> = match &self.editor {
            Some(editor) => Arc::clone(editor),
            None => {
                if api_key_from_env().is_none() {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!(
                            "gemini requires {} environment variable to be set",
                            API_KEY_ENV_VARS.join(" or ")
                        ),
                    );
                }
                match GeminiEditor::builder().model(model).build() {
                    Ok(editor) => Arc::new(editor),
                    Err(e) => return JsonRpcResponse::error(id, -32603, e.to_string()),
                }
            }
        };

        let status =
            match tokio::time::timeout(EDIT_TIMEOUT, session.generate(editor.as_ref())).await {
                Ok(status) => status.clone(),
                Err(_) => {
                    return JsonRpcResponse::error(
                        id,
                        -32603,
                        format!("timed out after {}s", EDIT_TIMEOUT.as_secs()),
                    );
                }
            };

        let image = match (status, session.take_result()) {
            (EditStatus::Success, Some(image)) => image,
            (EditStatus::Error(msg), _) => return JsonRpcResponse::error(id, -32603, msg),
            (other, _) => {
                return JsonRpcResponse::error(id, -32603, format!("unexpected state: {}", other));
            }
        };

        let output = match &params.output_path {
            Some(path) => {
                if let Err(e) = image.save(path) {
                    return JsonRpcResponse::error(id, -32603, format!("Failed to save: {}", e));
                }
                json!({
                    "saved_to": path,
                    "size_bytes": image.size()
                })
            }
            None => json!({
                "base64": image.to_base64(),
                "mime_type": image.format.mime_type(),
                "size_bytes": image.size()
            }),
        };

        let payload = json!({
            "success": true,
            "format": image.format.extension(),
            "model": image.metadata.model,
            "duration_ms": image.metadata.duration_ms,
            "text": image.metadata.text,
            "output": output,
            "skipped": if skipped.is_empty() { None } else { Some(skipped) },
        });

        JsonRpcResponse::text_content(id, &payload)
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NanoEditError, Result};
    use crate::image::{EditMetadata, EditRequest, EditedImage, ImageFormat};
    use async_trait::async_trait;

    const PNG_BASE64: &str = "iVBORw0KGgoAAAAA";

    struct FixedEditor {
        explanation: Option<&'static str>,
    }

    #[async_trait]
    impl ImageEditor for FixedEditor {
        async fn edit(&self, request: &EditRequest) -> Result<EditedImage> {
            if let Some(text) = self.explanation {
                return Err(NanoEditError::NoImage {
                    explanation: Some(text.to_string()),
                });
            }
            Ok(EditedImage::new(
                request.images[0].data.clone(),
                ImageFormat::Png,
                EditMetadata {
                    model: Some("fixed".into()),
                    duration_ms: Some(1),
                    text: Some(format!("{} image(s)", request.images.len())),
                },
            ))
        }

        fn name(&self) -> &str {
            "fixed"
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn make_server() -> McpServer {
        McpServer::new().with_editor(Arc::new(FixedEditor { explanation: None }))
    }

    fn tool_payload(resp: JsonRpcResponse) -> Value {
        assert!(resp.error.is_none(), "unexpected error: {:?}", resp.error);
        let result = resp.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap().to_string();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let mut server = make_server();
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"clientInfo":{"name":"test","version":"1"}}}"#)
            .await
            .unwrap();

        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "nanoedit");
        assert!(server.initialized);
    }

    #[tokio::test]
    async fn test_ping_and_notifications() {
        let mut server = make_server();
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .await
            .unwrap();
        assert!(resp.error.is_none());

        assert!(server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let mut server = make_server();

        let resp = server.handle_message("not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32700);

        let resp = server
            .handle_message(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32600);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[test]
    fn test_tools_list() {
        let server = make_server();
        let result = server.handle_tools_list(json!(1)).result.unwrap();
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["list_models", "edit_image"]);
    }

    #[test]
    fn test_list_models() {
        let server = make_server().with_default_model(GeminiModel::ProImage);
        let payload = tool_payload(server.list_models(json!(1)));

        assert_eq!(payload["api_key_set"], true);
        let models = payload["models"].as_array().unwrap();
        assert_eq!(models.len(), GeminiModel::ALL.len());
        let default: Vec<&str> = models
            .iter()
            .filter(|m| m["default"] == true)
            .map(|m| m["alias"].as_str().unwrap())
            .collect();
        assert_eq!(default, vec!["nano-banana-pro"]);
    }

    #[tokio::test]
    async fn test_edit_image_returns_base64() {
        let server = make_server();
        let resp = server
            .handle_tools_call(
                json!(3),
                &json!({
                    "name": "edit_image",
                    "arguments": {
                        "instruction": "add a rainbow",
                        "input_images": [format!("data:image/png;base64,{}", PNG_BASE64), PNG_BASE64]
                    }
                }),
            )
            .await;

        let payload = tool_payload(resp);
        assert_eq!(payload["success"], true);
        assert_eq!(payload["output"]["base64"], PNG_BASE64);
        assert_eq!(payload["output"]["mime_type"], "image/png");
        assert_eq!(payload["text"], "2 image(s)");
        assert!(payload["skipped"].is_null());
    }

    #[tokio::test]
    async fn test_edit_image_skips_bad_inputs() {
        let server = make_server();
        let resp = server
            .edit_image(
                json!(4),
                json!({
                    "instruction": "add a rainbow",
                    "input_images": [PNG_BASE64, "%%%", "aGVsbG8gd29ybGQhISE="]
                }),
            )
            .await;

        let payload = tool_payload(resp);
        assert_eq!(payload["text"], "1 image(s)");
        assert_eq!(payload["skipped"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_edit_image_saves_to_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.png");
        let server = make_server();
        let resp = server
            .edit_image(
                json!(5),
                json!({
                    "instruction": "sharpen",
                    "input_images": [PNG_BASE64],
                    "output_path": out.to_str().unwrap()
                }),
            )
            .await;

        let payload = tool_payload(resp);
        assert_eq!(payload["output"]["size_bytes"], 12);
        assert_eq!(std::fs::read(&out).unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_edit_image_validation_errors() {
        let server = make_server();

        let resp = server
            .edit_image(json!(6), json!({"instruction": "x", "input_images": []}))
            .await;
        assert_eq!(
            resp.error.unwrap().message,
            "Please upload at least one image."
        );

        let resp = server
            .edit_image(json!(7), json!({"instruction": " ", "input_images": [PNG_BASE64]}))
            .await;
        assert_eq!(
            resp.error.unwrap().message,
            "Please enter an editing instruction."
        );

        let resp = server
            .edit_image(
                json!(8),
                json!({"instruction": "x", "input_images": [PNG_BASE64], "model": "dall-e-3"}),
            )
            .await;
        assert!(resp.error.unwrap().message.contains("Unknown Gemini model"));

        let resp = server
            .edit_image(
                json!(9),
                json!({"instruction": "x", "input_images": [PNG_BASE64], "output_path": "../escape.png"}),
            )
            .await;
        assert_eq!(resp.error.unwrap().code, -32602);

        let resp = server.edit_image(json!(10), json!({"prompt": "x"})).await;
        assert!(resp.error.unwrap().message.starts_with("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_edit_image_surfaces_model_explanation() {
        let server = McpServer::new().with_editor(Arc::new(FixedEditor {
            explanation: Some("I can't identify people."),
        }));
        let resp = server
            .edit_image(
                json!(11),
                json!({"instruction": "who is this", "input_images": [PNG_BASE64]}),
            )
            .await;

        let err = resp.error.unwrap();
        assert_eq!(err.code, -32603);
        assert_eq!(
            err.message,
            "the model did not return an image: I can't identify people."
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let server = make_server();
        let resp = server
            .handle_tools_call(json!(12), &json!({"name": "generate_video"}))
            .await;
        assert!(resp.error.unwrap().message.contains("Unknown tool"));
    }

    #[test]
    fn test_decode_image_input_variants() {
        let (data, mime) = decode_image_input(PNG_BASE64).unwrap();
        assert_eq!(data.len(), 12);
        assert_eq!(mime, None);

        let (_, mime) =
            decode_image_input(&format!("data:image/png;base64,{}", PNG_BASE64)).unwrap();
        assert_eq!(mime.as_deref(), Some("image/png"));

        let (data, _) = decode_image_input("aGVs\nbG8").unwrap();
        assert_eq!(data, b"hello");

        assert!(decode_image_input("!!!").is_err());
    }

    #[test]
    fn test_validate_output_path() {
        assert!(validate_output_path("../etc/passwd").is_err());
        assert!(validate_output_path("out/../../x.png").is_err());
        assert!(validate_output_path("out/edited.png").is_ok());
        assert!(validate_output_path("/tmp/edited.png").is_ok());
    }
}
