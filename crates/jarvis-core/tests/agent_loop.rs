//! Integration tests for the model/tool loop against a mock endpoint.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fixtures::{can_bind_localhost, sse_response, text_sse, tool_calls_sse};
use jarvis_core::config::{Config, ProviderConfig};
use jarvis_core::core::agent::{
    AgentEventRx, AgentOptions, ROUND_LIMIT_NOTICE, create_event_channel, run_turn,
};
use jarvis_core::core::events::{AgentEvent, ErrorKind, StopReason, ToolOutput};
use jarvis_core::providers::{ChatMessage, ProviderError, ProviderErrorKind, Role};
use jarvis_core::tools::{Tool, ToolDefinition, ToolLayer, ToolRegistry};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    Config {
        max_rounds: 4,
        provider: ProviderConfig {
            base_url: server.uri(),
            api_key: Some("test-key".to_string()),
        },
        ..Config::default()
    }
}

fn options(home: &TempDir, registry: ToolRegistry) -> AgentOptions {
    AgentOptions::new(home.path().to_path_buf())
        .with_home(home.path().to_path_buf())
        .with_registry(registry)
}

/// `sleepy` waits `sleep_ms`, then returns `label`; `echo` returns its input.
fn test_registry() -> ToolRegistry {
    let def = |name: &str| ToolDefinition {
        name: name.to_string(),
        description: format!("{name} test tool"),
        input_schema: json!({"type": "object"}),
    };

    let mut registry = ToolRegistry::new();
    registry
        .register(Tool::new(def("sleepy"), ToolLayer::Custom, |input, _ctx| async move {
            let millis = input["sleep_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            ToolOutput::success(input["label"].as_str().unwrap_or_default())
        }))
        .unwrap();
    registry
        .register(Tool::new(def("echo"), ToolLayer::Custom, |input, _ctx| async move {
            ToolOutput::success(input.to_string())
        }))
        .unwrap();
    registry
}

/// Responds with `first` to the first request and `rest` afterwards,
/// recording every request body.
fn scripted(
    first: String,
    rest: String,
    bodies: Arc<Mutex<Vec<Value>>>,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    let count = AtomicUsize::new(0);
    move |req: &Request| {
        if let Ok(body) = serde_json::from_slice::<Value>(&req.body) {
            bodies.lock().unwrap().push(body);
        }
        if count.fetch_add(1, Ordering::SeqCst) == 0 {
            sse_response(&first)
        } else {
            sse_response(&rest)
        }
    }
}

fn drain(mut rx: AgentEventRx) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push((*ev).clone());
    }
    events
}

#[tokio::test]
async fn test_plain_reply_takes_one_round() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let bodies = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(scripted(
            text_sse("Hello there"),
            text_sse("unused"),
            Arc::clone(&bodies),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (tx, rx) = create_event_channel();
    let outcome = run_turn(
        vec![ChatMessage::user("hi")],
        &config_for(&server),
        &options(&home, ToolRegistry::builtins()),
        tx,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.stop, StopReason::Completed);
    assert_eq!(outcome.final_text, "Hello there");
    assert_eq!(outcome.messages.len(), 2);
    assert_eq!(outcome.messages[1].role, Role::Assistant);
    assert_eq!(outcome.messages[1].text(), "Hello there");

    let events = drain(rx);
    assert!(matches!(events.first(), Some(AgentEvent::TurnStarted)));
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::AssistantDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello there");
    assert!(events.contains(&AgentEvent::UsageUpdate {
        input_tokens: 12,
        output_tokens: 3
    }));
    assert!(matches!(
        events.last(),
        Some(AgentEvent::TurnCompleted { stop: StopReason::Completed, .. })
    ));

    let body = bodies.lock().unwrap()[0].clone();
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["messages"][0]["role"], json!("system"));
    assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
    let tool_names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["function"]["name"].as_str())
        .collect();
    assert!(tool_names.contains(&"shell_exec"));
    assert!(tool_names.contains(&"create_mcp"));
}

#[tokio::test]
async fn test_round_limit_stops_endless_tool_calls() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let always_tool = tool_calls_sse(&[("call_loop", "echo", r#"{"n":1}"#)]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&always_tool))
        .expect(3)
        .mount(&server)
        .await;

    let config = Config {
        max_rounds: 3,
        ..config_for(&server)
    };
    let (tx, rx) = create_event_channel();
    let outcome = run_turn(
        vec![ChatMessage::user("loop forever")],
        &config,
        &options(&home, test_registry()),
        tx,
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::RoundLimitExceeded);
    assert_eq!(outcome.rounds, 3);
    assert!(outcome.final_text.ends_with(ROUND_LIMIT_NOTICE));
    // user + 3 x (assistant with calls, tool result)
    assert_eq!(outcome.messages.len(), 7);
    assert_eq!(outcome.messages[6].role, Role::Tool);

    let events = drain(rx);
    let rounds: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::RoundStarted { round } => Some(*round),
            _ => None,
        })
        .collect();
    assert_eq!(rounds, vec![1, 2, 3]);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::TurnCompleted { stop: StopReason::RoundLimitExceeded, .. })
    ));
}

#[tokio::test]
async fn test_tool_results_follow_request_order() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let first = tool_calls_sse(&[
        ("call_a", "sleepy", r#"{"label":"A","sleep_ms":200}"#),
        ("call_b", "sleepy", r#"{"label":"B","sleep_ms":10}"#),
        ("call_c", "sleepy", r#"{"label":"C","sleep_ms":80}"#),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(scripted(first, text_sse("All done."), Arc::clone(&bodies)))
        .expect(2)
        .mount(&server)
        .await;

    let (tx, rx) = create_event_channel();
    let outcome = run_turn(
        vec![ChatMessage::user("run three")],
        &config_for(&server),
        &options(&home, test_registry()),
        tx,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.final_text, "All done.");

    let results: Vec<(&str, &str)> = outcome
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.as_deref().unwrap(), m.text()))
        .collect();
    assert_eq!(results, vec![("call_a", "A"), ("call_b", "B"), ("call_c", "C")]);

    // The second request carries the calls and their results in order.
    let second = bodies.lock().unwrap()[1].clone();
    let messages = second["messages"].as_array().unwrap();
    let assistant = &messages[messages.len() - 4];
    assert_eq!(assistant["role"], json!("assistant"));
    assert_eq!(assistant["tool_calls"][0]["id"], json!("call_a"));
    assert_eq!(assistant["tool_calls"][2]["function"]["name"], json!("sleepy"));
    let sent: Vec<&str> = messages[messages.len() - 3..]
        .iter()
        .filter_map(|m| m["tool_call_id"].as_str())
        .collect();
    assert_eq!(sent, vec!["call_a", "call_b", "call_c"]);

    let completed: Vec<String> = drain(rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::ToolCompleted { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["call_b", "call_c", "call_a"]);
}

#[tokio::test]
async fn test_malformed_arguments_run_with_empty_object() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let bodies = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(scripted(
            tool_calls_sse(&[("call_bad", "echo", r#"{"text": "unterminated"#)]),
            text_sse("ok"),
            Arc::clone(&bodies),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let (tx, rx) = create_event_channel();
    let outcome = run_turn(
        vec![ChatMessage::user("go")],
        &config_for(&server),
        &options(&home, test_registry()),
        tx,
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::Completed);
    let tool_message = outcome
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_message.text(), "{}");

    let started_input = drain(rx).into_iter().find_map(|e| match e {
        AgentEvent::ToolStarted { input, .. } => Some(input),
        _ => None,
    });
    assert_eq!(started_input, Some(json!({})));
}

#[tokio::test]
async fn test_http_error_is_reported_without_retry() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_string(r#"{"error":{"message":"model overloaded"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (tx, rx) = create_event_channel();
    let err = run_turn(
        vec![ChatMessage::user("hi")],
        &config_for(&server),
        &options(&home, ToolRegistry::new()),
        tx,
    )
    .await
    .unwrap_err();

    let provider_err = err.downcast_ref::<ProviderError>().unwrap();
    assert_eq!(provider_err.kind, ProviderErrorKind::HttpStatus);
    assert_eq!(provider_err.message, "HTTP 503: model overloaded");

    let events = drain(rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Error { kind: ErrorKind::HttpStatus, details: Some(body), .. }
            if body.contains("model overloaded")
    )));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::TurnCompleted { .. })));
}

#[tokio::test]
async fn test_in_stream_error_aborts_turn() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let body = "data: {\"error\":{\"type\":\"rate_limit\",\"message\":\"slow down\"}}\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let (tx, _rx) = create_event_channel();
    let err = run_turn(
        vec![ChatMessage::user("hi")],
        &config_for(&server),
        &options(&home, ToolRegistry::new()),
        tx,
    )
    .await
    .unwrap_err();

    let provider_err = err.downcast_ref::<ProviderError>().unwrap();
    assert_eq!(provider_err.kind, ProviderErrorKind::ApiError);
    assert_eq!(provider_err.message, "rate_limit: slow down");
}

#[tokio::test]
async fn test_created_skill_is_listed_in_next_system_prompt() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let create = tool_calls_sse(&[(
        "call_skill",
        "create_skill",
        r#"{"name":"weekly-report","description":"Summarise the week","instructions":"Read notes."}"#,
    )]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(scripted(create, text_sse("Saved."), Arc::clone(&bodies)))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let opts = options(&home, ToolRegistry::builtins());

    let (tx, _rx) = create_event_channel();
    let outcome = run_turn(vec![ChatMessage::user("make a skill")], &config, &opts, tx)
        .await
        .unwrap();
    assert!(home.path().join("skills/weekly-report/SKILL.md").is_file());

    let system_of = |body: &Value| body["messages"][0]["content"].as_str().unwrap().to_string();
    let first_system = system_of(&bodies.lock().unwrap()[0]);
    assert!(!first_system.contains("weekly-report"));

    let mut messages = outcome.messages;
    messages.push(ChatMessage::user("what skills do you have?"));
    let (tx, _rx) = create_event_channel();
    run_turn(messages, &config, &opts, tx).await.unwrap();

    let last_system = system_of(bodies.lock().unwrap().last().unwrap());
    assert!(last_system.contains("- weekly-report: Summarise the week"));
}
