use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::sse::SseParser;
use super::{
    ChatTurn, CompletionOptions, Delta, DeltaStream, EngineError, EngineHandle, EngineLoader,
    LoadProgress, ProgressFn,
};

/// Loader for an OpenAI-compatible server on the local machine.
///
/// "Loading" a model here means checking that the server is reachable and
/// serves the requested model; the weights live in the server process.
pub struct HttpEngineLoader {
    client: Client,
    base_url: String,
}

impl HttpEngineLoader {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:8080/v1`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

#[async_trait]
impl EngineLoader for HttpEngineLoader {
    async fn load(
        &self,
        model_id: &str,
        on_progress: ProgressFn,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        on_progress(LoadProgress::new(0.0, format!("Connecting to {}", self.base_url)));

        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Load(format!(
                "model list request returned {}",
                response.status()
            )));
        }
        let models: ModelList = response.json().await?;
        on_progress(LoadProgress::new(
            0.5,
            format!("Server lists {} model(s)", models.data.len()),
        ));

        if !models.data.iter().any(|m| m.id == model_id) {
            return Err(EngineError::ModelNotFound(model_id.to_string()));
        }

        info!("Model {} available at {}", model_id, self.base_url);
        on_progress(LoadProgress::new(1.0, format!("{} ready", model_id)));

        Ok(Box::new(HttpEngine {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            model: model_id.to_string(),
        }))
    }
}

/// Engine handle backed by a remote `/chat/completions` endpoint.
pub struct HttpEngine {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[async_trait]
impl EngineHandle for HttpEngine {
    async fn unload(&self) -> Result<(), EngineError> {
        // The server owns the weights; dropping the handle is all we can do.
        debug!("Released HTTP engine handle for {}", self.model);
        Ok(())
    }

    async fn complete(
        &self,
        history: Vec<ChatTurn>,
        options: CompletionOptions,
    ) -> Result<DeltaStream, EngineError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &history,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: options.stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Request(format!("{}: {}", status, text)));
        }

        Ok(Box::pin(delta_stream(response)))
    }
}

/// Turns an SSE completion response into a stream of deltas.
fn delta_stream(
    response: reqwest::Response,
) -> impl futures::Stream<Item = Result<Delta, EngineError>> + Send {
    stream! {
        let mut bytes = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        let mut done = false;

        while !done {
            match bytes.next().await {
                Some(Ok(chunk)) => events.extend(parser.push(&chunk)),
                Some(Err(e)) => {
                    yield Err(EngineError::Http(e));
                    return;
                }
                None => {
                    events.extend(parser.finish());
                    done = true;
                }
            }

            for event in events.drain(..) {
                if event.is_done() {
                    return;
                }
                match parse_delta(&event.data) {
                    Ok(Some(text)) => {
                        yield Ok(Delta::new(text));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    }
}

/// Extracts `choices[0].delta.content` from a streamed chunk.
///
/// Returns `Ok(None)` for chunks without text (role headers, finish
/// reasons) and an error for server-reported failures.
fn parse_delta(data: &str) -> Result<Option<String>, EngineError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| EngineError::Stream(format!("malformed chunk {:?}: {}", data, e)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(EngineError::Stream(message));
    }

    let content = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str);

    match content {
        Some(text) if !text.is_empty() => Ok(Some(text.to_string())),
        Some(_) => Ok(None),
        None => {
            if value.get("choices").is_none() {
                warn!("Ignoring chunk without choices: {}", data);
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_content() {
        let chunk = r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_delta(chunk).unwrap().as_deref(), Some("Hel"));
    }

    #[test]
    fn test_parse_delta_without_content() {
        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only).unwrap(), None);

        let finished = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_delta(finished).unwrap(), None);
    }

    #[test]
    fn test_parse_delta_server_error() {
        let chunk = r#"{"error":{"message":"context overflow"}}"#;
        match parse_delta(chunk) {
            Err(EngineError::Stream(msg)) => assert_eq!(msg, "context overflow"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_delta_malformed() {
        assert!(matches!(parse_delta("not json"), Err(EngineError::Stream(_))));
    }
}
