use serde_json::{Value, json};

use crate::ops::{Dispatcher, OperationRequest};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mcp-build";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;

/// Handle one JSON-RPC message. Returns `None` for notifications.
pub async fn handle_message(dispatcher: &Dispatcher, message: &Value) -> Option<Value> {
    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return (!id.is_null()).then(|| error_response(&id, INVALID_REQUEST, "Missing method"));
    };

    tracing::debug!(method, "received JSON-RPC message");

    match method {
        "initialize" => Some(response(
            &id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
        )),

        // No response needed
        m if m.starts_with("notifications/") => None,

        "ping" => Some(response(&id, json!({}))),

        "tools/list" => Some(response(&id, json!({ "tools": tool_definitions() }))),

        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            let (text, is_error) = call_tool(dispatcher, name, &arguments).await;

            Some(response(
                &id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": is_error,
                }),
            ))
        }

        _ => {
            if id.is_null() {
                None
            } else {
                Some(error_response(
                    &id,
                    METHOD_NOT_FOUND,
                    &format!("Unknown method: {}", method),
                ))
            }
        }
    }
}

/// Run a tool and render the result as text. Failures become `Error: ...`.
pub async fn call_tool(dispatcher: &Dispatcher, name: &str, arguments: &Value) -> (String, bool) {
    let request = match OperationRequest::from_tool_call(name, arguments) {
        Ok(request) => request,
        Err(e) => return (format!("Error: {}", e), true),
    };

    match dispatcher.dispatch(&request).await {
        Ok(text) => (text, false),
        Err(e) => {
            tracing::error!(tool = name, error = %e, "tool call failed");
            (format!("Error: {}", e), true)
        }
    }
}

fn response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// MCP tool definition helper
fn tool_def(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

fn repo_property() -> Value {
    json!({
        "type": "string",
        "description": "Repository name (see the list tool)"
    })
}

/// Return all tool definitions
pub fn tool_definitions() -> Vec<Value> {
    vec![
        tool_def(
            "list",
            "List available repositories discovered in the repository directory",
            json!({}),
            &[],
        ),
        tool_def(
            "make",
            "Run make with the specified arguments in the root of a repository.",
            json!({
                "args": {
                    "type": "string",
                    "description": "Arguments to pass to make (e.g., 'clean', 'all', 'test')"
                },
                "repo": repo_property(),
            }),
            &["repo"],
        ),
        tool_def(
            "git",
            "Run git commands in a repository. Limited to: status, log, checkout, \
             pull, branch, diff, fetch, reset, show",
            json!({
                "args": {
                    "type": "string",
                    "description": "Git command and arguments (e.g., 'status', 'checkout main')"
                },
                "repo": repo_property(),
            }),
            &["repo", "args"],
        ),
        tool_def(
            "ls",
            "List files and directories in a repository. Paths must stay inside the repository.",
            json!({
                "args": {
                    "type": "string",
                    "description": "Arguments to pass to ls (e.g., '-la', '-lh build/')"
                },
                "repo": repo_property(),
            }),
            &["repo"],
        ),
        tool_def(
            "read_file",
            "Read a file from a repository, optionally limited to a line range.",
            json!({
                "path": {
                    "type": "string",
                    "description": "File path relative to the repository root, or an absolute path inside it"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based, inclusive)",
                    "minimum": 1
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (1-based, inclusive)",
                    "minimum": 1
                },
                "repo": repo_property(),
            }),
            &["repo", "path"],
        ),
        tool_def(
            "env",
            "Show environment information including environment variables and versions \
             of key build tools (gcc, g++, python, make, cmake, etc.)",
            json!({
                "repo": repo_property(),
            }),
            &["repo"],
        ),
    ]
}
