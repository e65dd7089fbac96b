//! Request dispatch with transport-level retries.

use crate::config::ModelConfig;
use crate::error::ChatError;
use crate::history::{Message, Role};
use crate::stream::{extract_content, spawn_watchdog, SharedReply, StreamAssembler};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_RETRIES: u32 = 3;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const NO_REPLY_FALLBACK: &str = "No reply from the API.";

pub struct ChatClient {
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new() -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Non-streaming request: one JSON document, extracted through the same
    /// shape-priority pipeline as the streaming path.
    pub async fn send(
        &self,
        config: &ModelConfig,
        messages: &[Message],
    ) -> Result<String, ChatError> {
        let body = build_request_body(config, messages, false);
        let response = self.post_with_retry(config, &body).await?;
        let document: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Network { source: e, attempts: 1 })?;
        Ok(extract_content(&document).unwrap_or_else(|| NO_REPLY_FALLBACK.to_string()))
    }

    /// Streaming request: feeds the response body through the assembler into
    /// `reply`, guarded by the watchdog. The stopping flag is checked before
    /// each read; setting it finalizes as if the stream ended normally.
    /// Returns the complete reply text.
    pub async fn send_streaming(
        &self,
        config: &ModelConfig,
        messages: &[Message],
        reply: SharedReply,
    ) -> Result<String, ChatError> {
        let body = build_request_body(config, messages, true);
        // Finalize even when the request dies before the body opens, so the
        // UI poller watching this reply always terminates.
        let response = match self.post_with_retry(config, &body).await {
            Ok(response) => response,
            Err(e) => {
                reply.try_finalize();
                return Err(e);
            }
        };

        let watchdog = spawn_watchdog(reply.clone());
        let mut assembler = StreamAssembler::new(reply.clone());
        let mut stream = response.bytes_stream();

        let result = loop {
            if reply.is_stopping() {
                info!("stream cancelled by caller");
                break Ok(());
            }
            match stream.next().await {
                Some(Ok(chunk)) => assembler.push_chunk(&chunk),
                Some(Err(e)) => break Err(ChatError::Network { source: e, attempts: 1 }),
                None => break Ok(()),
            }
        };

        assembler.finish();
        // The watchdog notices the finalized flag on its next tick.
        drop(watchdog);

        result.map(|_| reply.snapshot())
    }

    async fn post_with_retry(
        &self,
        config: &ModelConfig,
        body: &Value,
    ) -> Result<reqwest::Response, ChatError> {
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self
                .http
                .post(&config.url)
                .bearer_auth(&config.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if is_transport_error(&e) && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_secs(u64::from(attempt) * 2);
                    warn!(
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "transient network failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(ChatError::Network { source: e, attempts: attempt }),
            }
        };

        // Application-level HTTP errors are terminal, never retried.
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }
        debug!(status = %status, url = %config.url, "request accepted");
        Ok(response)
    }
}

fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

/// Builds the outbound body: `{model, messages, max_tokens, temperature,
/// stream}` plus any configured extra fields. Wire messages carry only role
/// and content; local ids and labels stay local.
pub fn build_request_body(config: &ModelConfig, messages: &[Message], stream: bool) -> Value {
    let wire_messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            })
        })
        .collect();

    let mut body = json!({
        "model": config.name,
        "messages": wire_messages,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "stream": stream,
    });

    if let Some(map) = body.as_object_mut() {
        for (key, value) in &config.extra {
            map.insert(key.clone(), value.clone());
        }
        // The reasoner endpoint rejects a temperature field.
        if config.name == "deepseek-reasoner" {
            map.remove("temperature");
        }
    }
    body
}
