//! HTTP request tool.
//!
//! Issues one request and reports status, headers and body. A 4xx/5xx
//! status is a failure whose output still carries the body.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{ToolContext, ToolDefinition, parse_input, timeout_from_secs, truncate_chars};
use crate::core::events::{ToolOutput, codes};
use crate::providers::shared::USER_AGENT;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_CHARS: usize = 50_000;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "http_request".to_string(),
        description: "Send an HTTP request (GET, POST, PUT, DELETE, PATCH, HEAD) to an http or \
            https URL. Returns the status line and body; 4xx/5xx responses are reported as \
            failures with the body kept. A body that is valid JSON is sent as \
            application/json."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"],
                    "description": "HTTP method (default: GET)"
                },
                "url": {
                    "type": "string",
                    "description": "Absolute http:// or https:// URL"
                },
                "headers": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Extra request headers"
                },
                "body": {
                    "type": "string",
                    "description": "Request body for POST, PUT and PATCH"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["url"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct HttpInput {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout: Option<f64>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn parse_method(raw: &str) -> Option<Method> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        "PATCH" => Some(Method::PATCH),
        "HEAD" => Some(Method::HEAD),
        _ => None,
    }
}

pub async fn execute(input: Value, _ctx: ToolContext) -> ToolOutput {
    let input: HttpInput = match parse_input(&input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    let Some(method) = parse_method(&input.method) else {
        return ToolOutput::failure(
            codes::INVALID_INPUT,
            format!("Unsupported HTTP method: {}", input.method),
        );
    };

    let url = match url::Url::parse(input.url.trim()) {
        Ok(u) => u,
        Err(e) => {
            return ToolOutput::failure(
                codes::INVALID_INPUT,
                format!("Invalid URL '{}': {e}", input.url),
            );
        }
    };
    if !matches!(url.scheme(), "http" | "https") {
        return ToolOutput::failure(
            codes::INVALID_INPUT,
            format!("Only http and https URLs are supported, got '{}'", url.scheme()),
        );
    }

    let headers = match build_headers(&input.headers) {
        Ok(h) => h,
        Err(out) => return out,
    };

    let timeout = timeout_from_secs(input.timeout, DEFAULT_TIMEOUT);

    let client = match reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .no_proxy()
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return ToolOutput::failure(
                codes::REQUEST_ERROR,
                format!("Failed to build HTTP client: {e}"),
            );
        }
    };

    let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
    let has_content_type = headers.contains_key(CONTENT_TYPE);
    let mut request = client.request(method.clone(), url.clone()).headers(headers);

    if sends_body && let Some(body) = input.body {
        let (text, is_json) = match body {
            Value::String(s) => {
                let is_json = serde_json::from_str::<Value>(&s).is_ok();
                (s, is_json)
            }
            Value::Null => (String::new(), false),
            other => (other.to_string(), true),
        };
        if is_json && !has_content_type {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        request = request.body(text);
    }

    tracing::debug!(%method, %url, "sending http_request");
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return request_failure(&e, timeout),
    };

    let status = response.status().as_u16();
    let mut header_map = Map::new();
    for (name, value) in response.headers() {
        header_map.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }

    let body = match response.text().await {
        Ok(t) => t,
        Err(e) => return request_failure(&e, timeout),
    };
    let body = match truncate_chars(&body, MAX_BODY_CHARS) {
        Some(head) => format!("{head}\n... (truncated)"),
        None => body,
    };

    let text = format!("HTTP {status}\n\n{body}");
    let output = if status < 400 {
        ToolOutput::success(text)
    } else {
        ToolOutput::failure(codes::HTTP_STATUS, format!("HTTP {status}")).with_output(text)
    };
    output
        .with_metadata("status_code", status)
        .with_metadata("headers", header_map)
}

fn build_headers(raw: &BTreeMap<String, String>) -> Result<HeaderMap, ToolOutput> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
            ToolOutput::failure(codes::INVALID_INPUT, format!("Invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ToolOutput::failure(
                codes::INVALID_INPUT,
                format!("Invalid value for header '{name}': {e}"),
            )
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn request_failure(e: &reqwest::Error, timeout: Duration) -> ToolOutput {
    if e.is_timeout() {
        ToolOutput::failure(
            codes::TIMEOUT,
            format!("Request timed out after {} seconds", timeout.as_secs_f64()),
        )
    } else {
        ToolOutput::failure(codes::REQUEST_ERROR, format!("Request failed: {e}"))
    }
}
