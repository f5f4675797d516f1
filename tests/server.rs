use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use lmchat::chat::GenerationConfig;
use lmchat::engine::sse::SseParser;
use lmchat::server::router;
use lmchat::session::{CatalogEntry, MemoryPreferences, ModelCatalog};
use lmchat::test_utils::{ScriptedLoader, Step};
use lmchat::ChatRuntime;

fn catalog() -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::new(vec![
        CatalogEntry {
            id: "llama-3.2-1b-instruct".into(),
            name: "Llama 3.2 1B".into(),
            size: "0.6GB".into(),
            file: None,
        },
        CatalogEntry {
            id: "qwen2.5-0.5b-instruct".into(),
            name: "Qwen2.5 0.5B".into(),
            size: "0.4GB".into(),
            file: None,
        },
    ]))
}

async fn spawn_server(loader: &ScriptedLoader) -> String {
    let runtime = ChatRuntime::new(
        Arc::new(loader.clone()),
        Arc::new(MemoryPreferences::new()),
        GenerationConfig::default(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(runtime, catalog());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn wait_for_reply(client: &reqwest::Client, base: &str) -> Value {
    for _ in 0..200 {
        let body: Value = client
            .get(format!("{}/api/v1/messages", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["data"]["is_running"] == false {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reply never finished");
}

#[tokio::test]
async fn test_health_and_catalog() {
    let base = spawn_server(&ScriptedLoader::new()).await;
    let client = reqwest::Client::new();

    let health = client.get(&base).send().await.unwrap().text().await.unwrap();
    assert_eq!(health, "lmchat is running!");

    let models: Value = client
        .get(format!("{}/api/v1/models", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["status"], "success");
    assert_eq!(models["data"][0]["id"], "llama-3.2-1b-instruct");
    assert_eq!(models["data"][1]["size"], "0.4GB");
}

#[tokio::test]
async fn test_initialize_and_chat_over_http() {
    let loader = ScriptedLoader::new();
    loader.push_text_reply(&["He", "llo!"]);
    let base = spawn_server(&loader).await;
    let client = reqwest::Client::new();

    // Sending before a model is loaded is a conflict.
    let early = client
        .post(format!("{}/api/v1/messages", base))
        .json(&json!({ "text": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(early.status(), reqwest::StatusCode::CONFLICT);

    let unknown = client
        .post(format!("{}/api/v1/session/initialize", base))
        .json(&json!({ "model": "gpt-9" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

    let init: Value = client
        .post(format!("{}/api/v1/session/initialize", base))
        .json(&json!({ "model": "qwen2.5-0.5b-instruct" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(init["data"]["phase"], "ready");
    assert_eq!(init["data"]["loaded_model"], "qwen2.5-0.5b-instruct");

    let empty = client
        .post(format!("{}/api/v1/messages", base))
        .json(&json!({ "text": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), reqwest::StatusCode::BAD_REQUEST);

    let accepted = client
        .post(format!("{}/api/v1/messages", base))
        .json(&json!({ "text": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);
    let accepted: Value = accepted.json().await.unwrap();
    let message_id = accepted["data"]["message_id"].as_str().unwrap().to_string();

    let thread = wait_for_reply(&client, &base).await;
    let messages = thread["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["id"], message_id.as_str());
    assert_eq!(messages[1]["content"][0]["text"], "Hello!");
    assert_eq!(thread["data"]["transcript"][1]["status"]["state"], "complete");

    let cleared = client
        .delete(format!("{}/api/v1/messages", base))
        .send()
        .await
        .unwrap();
    assert!(cleared.status().is_success());

    let reset: Value = client
        .post(format!("{}/api/v1/session/reset", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["data"]["phase"], "idle");
    assert_eq!(reset["data"]["engine_loaded"], false);
}

#[tokio::test]
async fn test_failed_reply_reports_status_and_partial_text() {
    let loader = ScriptedLoader::new();
    loader.push_reply(vec![
        Step::Delta("Par".into()),
        Step::Fail("connection reset".into()),
    ]);
    let base = spawn_server(&loader).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/v1/session/initialize", base))
        .json(&json!({ "model": "llama-3.2-1b-instruct" }))
        .send()
        .await
        .unwrap();
    let accepted = client
        .post(format!("{}/api/v1/messages", base))
        .json(&json!({ "text": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);

    let body = wait_for_reply(&client, &base).await;
    let reply = &body["data"]["transcript"][1];
    assert_eq!(reply["role"], "assistant");
    assert_eq!(reply["content"], "Par");
    assert_eq!(reply["status"]["state"], "failed");
    assert!(reply["status"]["error"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
    assert_eq!(body["data"]["transcript"][0]["status"]["state"], "complete");
}

#[tokio::test]
async fn test_select_requires_idle_session() {
    let base = spawn_server(&ScriptedLoader::new()).await;
    let client = reqwest::Client::new();

    let selected: Value = client
        .post(format!("{}/api/v1/session/select", base))
        .json(&json!({ "model": "llama-3.2-1b-instruct" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(selected["data"]["phase"], "idle");
    assert_eq!(selected["data"]["selected_model"], "llama-3.2-1b-instruct");

    client
        .post(format!("{}/api/v1/session/initialize", base))
        .json(&json!({ "model": "llama-3.2-1b-instruct" }))
        .send()
        .await
        .unwrap();

    let rejected = client
        .post(format!("{}/api/v1/session/select", base))
        .json(&json!({ "model": "qwen2.5-0.5b-instruct" }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::CONFLICT);
}

/// Reads until the next `state` event and returns its payload.
async fn next_state<S, B>(bytes: &mut S, parser: &mut SseParser) -> Value
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), bytes.next())
            .await
            .expect("event stream stalled")
            .unwrap()
            .unwrap();
        if let Some(event) = parser
            .push(chunk.as_ref())
            .into_iter()
            .filter(|e| e.event.as_deref() == Some("state"))
            .last()
        {
            return serde_json::from_str(&event.data).unwrap();
        }
    }
}

#[tokio::test]
async fn test_event_stream_publishes_state_changes() {
    let base = spawn_server(&ScriptedLoader::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/events", base))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let mut bytes = Box::pin(response.bytes_stream());
    let mut parser = SseParser::new();

    let initial = next_state(&mut bytes, &mut parser).await;
    assert_eq!(initial["session"]["phase"], "idle");
    assert_eq!(initial["is_running"], false);
    assert_eq!(initial["transcript"], json!([]));

    client
        .post(format!("{}/api/v1/session/initialize", base))
        .json(&json!({ "model": "llama-3.2-1b-instruct" }))
        .send()
        .await
        .unwrap();

    let mut phase = String::new();
    for _ in 0..10 {
        let state = next_state(&mut bytes, &mut parser).await;
        phase = state["session"]["phase"].as_str().unwrap().to_string();
        if phase == "ready" {
            break;
        }
    }
    assert_eq!(phase, "ready");
}
