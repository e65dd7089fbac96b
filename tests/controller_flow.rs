//! Controller command dispatch, exercised without any network traffic.

use async_trait::async_trait;
use deepchat::config::{ModelConfig, Settings};
use deepchat::controller::ChatController;
use deepchat::error::ChatError;
use deepchat::history::Role;
use deepchat::script::ScriptStore;
use deepchat::session::SessionStore;
use deepchat::tools::{ToolFunction, ToolRegistry};
use deepchat::ui::{HostSurface, UiQueue, UiTask};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

struct FakeHost;

impl HostSurface for FakeHost {
    fn read_active_buffer(&self) -> Option<(String, String)> {
        Some(("notes.md".to_string(), "fn main() {}".to_string()))
    }
}

struct Echo;

#[async_trait]
impl ToolFunction for Echo {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes the 'text' argument"
    }
    async fn invoke(&self, args: &HashMap<String, String>) -> Result<String, ChatError> {
        args.get("text")
            .cloned()
            .ok_or_else(|| ChatError::Tool("missing 'text'".into()))
    }
}

struct Harness {
    controller: ChatController,
    rx: UnboundedReceiver<UiTask>,
    dir: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.dir).ok();
    }
}

fn offline_settings() -> Settings {
    let mut settings = Settings::default();
    settings.models.insert(
        "offline".to_string(),
        ModelConfig {
            name: "offline-model".to_string(),
            url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
            api_key: "sk-test".to_string(),
            description: "never contacted".to_string(),
            max_tokens: 16,
            temperature: 0.0,
            stream: false,
            extra: HashMap::new(),
        },
    );
    settings
}

fn streaming_settings(url: String) -> Settings {
    let mut settings = Settings::default();
    settings.default_model = Some("wire".to_string());
    settings.models.insert(
        "wire".to_string(),
        ModelConfig {
            name: "wire-model".to_string(),
            url,
            api_key: "sk-test".to_string(),
            description: String::new(),
            max_tokens: 16,
            temperature: 0.0,
            stream: true,
            extra: HashMap::new(),
        },
    );
    settings
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(offline_settings())
    }

    fn with_settings(settings: Settings) -> Self {
        let dir = std::env::temp_dir().join(format!("deepchat-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let store = SessionStore::new(dir.join("sessions")).unwrap();
        let scripts = ScriptStore::new(dir.join("scripts")).unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let (ui, rx) = UiQueue::new();
        let controller = ChatController::new(
            settings,
            dir.join("settings.json"),
            store,
            scripts,
            registry,
            ui,
            Box::new(FakeHost),
        )
        .unwrap();
        Harness { controller, rx, dir }
    }

    /// All output text enqueued so far, concatenated.
    fn drain_output(&mut self) -> String {
        let mut out = String::new();
        while let Ok(task) = self.rx.try_recv() {
            if let UiTask::AppendOutput(text) = task {
                out.push_str(&text);
            }
        }
        out
    }
}

#[tokio::test]
async fn unknown_command_reports_without_erroring() {
    let mut h = Harness::new();
    h.controller.handle_input("/frobnicate").await;
    let out = h.drain_output();
    assert!(out.contains("Unknown command: /frobnicate"), "got: {}", out);
}

#[tokio::test]
async fn selecting_a_missing_model_is_reported() {
    let mut h = Harness::new();
    h.controller.handle_input("/model:ghost").await;
    let out = h.drain_output();
    assert!(out.contains("Model 'ghost' not found"), "got: {}", out);
    assert_eq!(h.controller.active_model(), None);
}

#[tokio::test]
async fn selecting_a_known_model_persists_the_choice() {
    let mut h = Harness::new();
    h.controller.handle_input("/model:offline").await;
    let out = h.drain_output();
    assert!(out.contains("[Model set to: offline]"), "got: {}", out);
    assert_eq!(h.controller.active_model(), Some("offline"));

    let saved: Settings =
        serde_json::from_str(&fs::read_to_string(h.dir.join("settings.json")).unwrap()).unwrap();
    assert_eq!(saved.last_active_model.as_deref(), Some("offline"));
}

#[tokio::test]
async fn attaching_a_file_adds_a_system_message() {
    let mut h = Harness::new();
    let before = h.controller.history().len();
    h.controller.handle_input("/file").await;
    let out = h.drain_output();
    assert!(out.contains("[Attached file: notes.md]"), "got: {}", out);

    let messages = h.controller.history().messages();
    assert_eq!(messages.len(), before + 1);
    let attached = messages.last().unwrap();
    assert_eq!(attached.role, Role::System);
    assert!(attached.content.contains("notes.md"));
    assert!(attached.content.contains("fn main() {}"));
}

#[tokio::test]
async fn save_clear_load_round_trip() {
    let mut h = Harness::new();
    h.controller.handle_input("/file").await;
    let messages_before = h.controller.history().len();

    h.controller.handle_input("/save:My Notes").await;
    let out = h.drain_output();
    assert!(out.contains("[Session saved: my-notes]"), "got: {}", out);

    h.controller.handle_input("/clear").await;
    assert_eq!(h.controller.history().len(), 1);

    h.controller.handle_input("/load:my-notes").await;
    let out = h.drain_output();
    assert!(out.contains("[Session loaded: my-notes"), "got: {}", out);
    assert_eq!(h.controller.history().len(), messages_before);

    h.controller.handle_input("/sessions").await;
    let out = h.drain_output();
    assert!(out.contains("- my-notes"), "got: {}", out);

    h.controller.handle_input("/delete:my-notes").await;
    h.controller.handle_input("/delete:my-notes").await;
    let out = h.drain_output();
    assert!(out.contains("[Session deleted: my-notes]"), "got: {}", out);
    assert!(out.contains("[Session 'my-notes' not found]"), "got: {}", out);
}

#[tokio::test]
async fn loading_a_missing_session_is_reported() {
    let mut h = Harness::new();
    h.controller.handle_input("/load:nowhere").await;
    let out = h.drain_output();
    assert!(out.contains("[Session 'nowhere' not found]"), "got: {}", out);
}

#[tokio::test]
async fn script_with_input_function_and_condition_runs_to_completion() {
    let mut h = Harness::new();
    let script = serde_json::json!({
        "name": "demo",
        "description": "input, echo, branch",
        "steps": [
            { "type": "input", "prompt": "Which language?", "store_as": "lang" },
            {
                "type": "function",
                "function": "echo",
                "args": { "text": "{{lang}}" },
                "store_as": "echoed"
            },
            {
                "type": "condition",
                "test": "echoed == 'rust'",
                "if_true": [
                    { "type": "function", "function": "echo", "args": { "text": "borrow checker" } }
                ],
                "if_false": [
                    { "type": "function", "function": "echo", "args": { "text": "garbage collector" } }
                ]
            }
        ]
    });
    fs::write(
        h.dir.join("scripts").join("demo.script.json"),
        serde_json::to_string_pretty(&script).unwrap(),
    )
    .unwrap();

    h.controller.handle_input("/script:demo").await;
    let out = h.drain_output();
    assert!(out.contains("[Starting script: demo]"), "got: {}", out);
    assert!(out.contains("[Input required: Which language?]"), "got: {}", out);

    // Plain text is routed to the waiting script, not sent to the model.
    h.controller.handle_input("rust").await;
    let out = h.drain_output();
    assert!(out.contains("rust"), "got: {}", out);
    assert!(out.contains("borrow checker"), "got: {}", out);
    assert!(!out.contains("garbage collector"), "got: {}", out);
    assert!(out.contains("[Script completed]"), "got: {}", out);
}

#[tokio::test]
async fn continue_without_a_paused_script_is_reported() {
    let mut h = Harness::new();
    h.controller.handle_input("/continue").await;
    let out = h.drain_output();
    assert!(out.contains("[No script paused]"), "got: {}", out);
}

#[tokio::test]
async fn running_a_missing_script_degrades_to_an_error_message() {
    let mut h = Harness::new();
    h.controller.handle_input("/script:ghost").await;
    let out = h.drain_output();
    assert!(out.contains("[Error]"), "got: {}", out);
}

/// One-shot HTTP server that reads a full request and answers with the given
/// status line and body.
async fn spawn_error_server(status_line: &'static str, body: &'static str) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 16384];
            let mut read = 0;
            let mut body_until = usize::MAX;
            loop {
                if read >= body_until || read == buf.len() {
                    break;
                }
                match socket.read(&mut buf[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
                if body_until == usize::MAX {
                    let head = String::from_utf8_lossy(&buf[..read]).into_owned();
                    if let Some(end) = head.find("\r\n\r\n") {
                        let content_length = head.lines().find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .and_then(|v| v.trim().parse::<usize>().ok())
                        });
                        body_until = end + 4 + content_length.unwrap_or(0);
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    addr
}

#[tokio::test]
async fn streaming_connect_failure_reports_and_returns_to_input() {
    // Nothing listens on port 1; the connect error is retried and then
    // surfaced. The timeout guards against the dispatch hanging on the
    // reply poller.
    let mut h = Harness::with_settings(streaming_settings(
        "http://127.0.0.1:1/v1/chat/completions".to_string(),
    ));
    timeout(Duration::from_secs(25), h.controller.handle_input("hello"))
        .await
        .expect("input handling must return after a failed streaming request");

    let out = h.drain_output();
    assert!(out.contains("[Error]"), "got: {}", out);
    assert!(out.contains("network error after 3 attempt"), "got: {}", out);
}

#[tokio::test]
async fn streaming_http_error_status_is_terminal_and_visible() {
    let addr = spawn_error_server("500 Internal Server Error", "upstream exploded").await;
    let mut h = Harness::with_settings(streaming_settings(format!(
        "http://{}/v1/chat/completions",
        addr
    )));
    // Status errors are terminal, never retried, so this stays fast.
    timeout(Duration::from_secs(10), h.controller.handle_input("hello"))
        .await
        .expect("input handling must return after an HTTP error status");

    let out = h.drain_output();
    assert!(out.contains("API error 500"), "got: {}", out);
    assert!(out.contains("upstream exploded"), "got: {}", out);
}

#[tokio::test]
async fn resume_toggle_flips_and_persists() {
    let mut h = Harness::new();
    h.controller.handle_input("/resume").await;
    let out = h.drain_output();
    assert!(out.contains("[Auto-resume is now on]"), "got: {}", out);

    let saved: Settings =
        serde_json::from_str(&fs::read_to_string(h.dir.join("settings.json")).unwrap()).unwrap();
    assert!(saved.auto_resume);
}
