use std::sync::{Arc, Mutex};

use lmchat::chat::{GenerationConfig, MessageStatus};
use lmchat::engine::Role;
use lmchat::session::{FilePreferences, MemoryPreferences, Phase, SessionSnapshot};
use lmchat::test_utils::ScriptedLoader;
use lmchat::{ChatRuntime, Error};

fn runtime(loader: &ScriptedLoader) -> ChatRuntime {
    ChatRuntime::new(
        Arc::new(loader.clone()),
        Arc::new(MemoryPreferences::new()),
        GenerationConfig::default(),
    )
}

#[tokio::test]
async fn test_load_then_chat_end_to_end() {
    let loader = ScriptedLoader::new().with_progress(vec![0.0, 0.3, 1.0]);
    loader.push_text_reply(&["He", "llo!"]);
    let runtime = runtime(&loader);

    let sessions: Arc<Mutex<Vec<SessionSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let observed = runtime.clone();
        let sessions = Arc::clone(&sessions);
        let replies = Arc::clone(&replies);
        runtime.subscribe(move || {
            sessions.lock().unwrap().push(observed.session());
            if let Some(last) = observed.messages().last() {
                if last.role == Role::Assistant {
                    replies.lock().unwrap().push(last.content.clone());
                }
            }
        })
    };

    runtime.initialize("llama-3.2-1b-instruct").await.unwrap();

    let mut progress: Vec<f32> = sessions
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.phase == Phase::Initializing)
        .map(|s| s.progress)
        .collect();
    progress.dedup();
    assert_eq!(progress, vec![0.0, 0.3, 1.0]);
    assert!(runtime.session().is_ready());

    runtime.send("Hi").await.unwrap();

    let messages = runtime.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hi");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello!");
    assert_eq!(messages[1].status, MessageStatus::Complete);

    let mut seen = replies.lock().unwrap().clone();
    seen.dedup();
    assert_eq!(seen, vec!["", "He", "Hello!"]);

    let thread = runtime.thread();
    assert!(!thread.is_running);
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(thread.messages[1].id, messages[1].id);
}

#[tokio::test]
async fn test_repeated_initialize_and_reset() {
    let loader = ScriptedLoader::new();
    let runtime = runtime(&loader);

    runtime.initialize("model-A").await.unwrap();
    runtime.initialize("model-A").await.unwrap();
    assert_eq!(loader.loads(), 1);

    runtime.reset().await;
    runtime.reset().await;
    let session = runtime.session();
    assert_eq!(session.phase, Phase::Idle);
    assert!(!session.engine_loaded);
    assert_eq!(loader.unloads(), 1);

    assert!(matches!(runtime.send("hello").await, Err(Error::EngineNotReady)));
}

#[tokio::test]
async fn test_selection_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    let loader = ScriptedLoader::new();

    let first = ChatRuntime::new(
        Arc::new(loader.clone()),
        Arc::new(FilePreferences::new(&path)),
        GenerationConfig::default(),
    );
    first.initialize("qwen2.5-0.5b-instruct").await.unwrap();
    first.shutdown().await;

    let second = ChatRuntime::new(
        Arc::new(loader.clone()),
        Arc::new(FilePreferences::new(&path)),
        GenerationConfig::default(),
    );
    let session = second.session();
    assert_eq!(session.phase, Phase::Idle);
    assert_eq!(session.selected_model.as_deref(), Some("qwen2.5-0.5b-instruct"));

    second.reset().await;
    let third = ChatRuntime::new(
        Arc::new(loader),
        Arc::new(FilePreferences::new(&path)),
        GenerationConfig::default(),
    );
    assert!(third.session().selected_model.is_none());
}

#[tokio::test]
async fn test_switching_models_keeps_conversation() {
    let loader = ScriptedLoader::new();
    loader.push_text_reply(&["from A"]);
    loader.push_text_reply(&["from B"]);
    let runtime = runtime(&loader);

    runtime.initialize("model-A").await.unwrap();
    runtime.send("one").await.unwrap();
    runtime.initialize("model-B").await.unwrap();
    runtime.send("two").await.unwrap();

    assert_eq!(
        loader.events(),
        vec![
            "load:model-A",
            "complete:model-A",
            "unload:model-A",
            "load:model-B",
            "complete:model-B",
        ]
    );
    let contents: Vec<String> = runtime.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["one", "from A", "two", "from B"]);

    // The second request carries the whole transcript.
    let requests = loader.requests();
    assert_eq!(requests[1].0.len(), 4);
}
