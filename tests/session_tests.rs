// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use quill::config::SettingsSnapshot;
use quill::engine::mock::{MockEngine, MockStep};
use quill::engine::EngineCatalog;
use quill::pool::InstancePool;
use quill::progress::{CancelToken, ProgressStatus};
use quill::registry::ProviderRegistry;
use quill::session::{ChatSessionManager, NoopSendObserver, SendObserver, SessionState};
use quill::QuillError;

fn manager_with(engines: Vec<MockEngine>) -> ChatSessionManager {
    let mut catalog = EngineCatalog::new(ProviderRegistry::builtin());
    for engine in engines {
        catalog.register_engine(Arc::new(engine));
    }
    ChatSessionManager::new(
        Arc::new(catalog),
        Arc::new(InstancePool::new()),
        SettingsSnapshot::new(),
    )
}

struct ChunkCollector {
    chunks: Vec<String>,
}

impl SendObserver for ChunkCollector {
    fn on_text_delta(&mut self, text: &str) {
        self.chunks.push(text.to_string());
    }
}

#[tokio::test]
async fn test_streamed_chunks_arrive_in_order() {
    let mut manager = manager_with(vec![MockEngine::local("webllm").with_script(vec![
        MockStep::Text("one ".to_string()),
        MockStep::Text("two ".to_string()),
        MockStep::Text("three".to_string()),
    ])]);

    let mut collector = ChunkCollector { chunks: vec![] };
    let text = manager
        .send("count", &mut collector, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(collector.chunks, vec!["one ", "two ", "three"]);
    assert_eq!(text, "one two three");
}

#[tokio::test]
async fn test_refresh_stability_construction_count_stays_at_one() {
    let engine = Arc::new(MockEngine::local("wllama"));
    let mut catalog = EngineCatalog::new(ProviderRegistry::builtin());
    catalog.register_engine(Arc::new(MockEngine::local("webllm").unsupported("no GPU")));
    catalog.register_engine(engine.clone());
    let mut manager = ChatSessionManager::new(
        Arc::new(catalog),
        Arc::new(InstancePool::new()),
        SettingsSnapshot::new(),
    );

    // Auto-select lands on wllama after skipping webllm
    for _ in 0..5 {
        manager
            .send("hi", &mut NoopSendObserver, &CancelToken::new())
            .await
            .unwrap();
    }

    assert_eq!(engine.counters().constructions(), 1);
    assert_eq!(manager.active().unwrap().provider, "wllama");
}

#[tokio::test]
async fn test_pending_model_hint_does_not_break_stickiness() {
    let engine = Arc::new(MockEngine::local("webllm"));
    let mut catalog = EngineCatalog::new(ProviderRegistry::builtin());
    catalog.register_engine(engine.clone());
    let mut manager = ChatSessionManager::new(
        Arc::new(catalog),
        Arc::new(InstancePool::new()),
        SettingsSnapshot::new(),
    );

    // Model hint that the engine does not list: auto-select still commits
    // to the engine default and later sends stay put.
    manager.set_model("some-foreign-model-id").await.unwrap();
    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(manager.active().unwrap().model, "webllm-default");

    manager
        .send("again", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(engine.counters().constructions(), 1);
}

#[tokio::test]
async fn test_explicit_set_model_triggers_exactly_one_reconstruction() {
    let engine = Arc::new(MockEngine::local("webllm"));
    let mut catalog = EngineCatalog::new(ProviderRegistry::builtin());
    catalog.register_engine(engine.clone());
    let mut manager = ChatSessionManager::new(
        Arc::new(catalog),
        Arc::new(InstancePool::new()),
        SettingsSnapshot::new(),
    );

    manager
        .set_provider("webllm", Some("model-a"), None)
        .await
        .unwrap();
    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();

    manager.set_model("model-b").await.unwrap();
    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();

    // One rebuild for the override, none for the following send
    assert_eq!(engine.counters().constructions(), 2);
}

#[tokio::test]
async fn test_cancel_mid_download_leaves_no_partial_commit() {
    let mut manager = manager_with(vec![MockEngine::local("webllm").with_download_steps(vec![
        (Some(0.2), "downloading 20%"),
        (Some(0.5), "downloading 50%"),
        (Some(0.8), "downloading 80%"),
    ])]);

    let statuses: Arc<Mutex<Vec<ProgressStatus>>> = Arc::new(Mutex::new(vec![]));
    let cancelled_once = Arc::new(AtomicBool::new(false));
    {
        let progress = manager.progress().clone();
        let statuses = statuses.clone();
        let cancelled_once = cancelled_once.clone();
        manager.progress().subscribe(Arc::new(move |report| {
            statuses.lock().unwrap().push(report.status);
            if report.message.contains("downloading 50%")
                && !cancelled_once.swap(true, Ordering::SeqCst)
            {
                progress.request_cancel();
            }
        }));
    }

    let cancel = CancelToken::new();
    let err = manager
        .send("hi", &mut NoopSendObserver, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    // No half-applied Active state, and the pool holds nothing
    assert_eq!(manager.state(), SessionState::NoSession);
    assert!(manager.factory().pool().is_empty().await);
    assert!(statuses
        .lock()
        .unwrap()
        .contains(&ProgressStatus::Cancelled));

    // A subsequent uncancelled send succeeds normally
    let text = manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(text, "mock response");
    assert_eq!(manager.state(), SessionState::Active);
}

#[tokio::test]
async fn test_explicit_openai_without_credential() {
    let mut manager = manager_with(vec![MockEngine::remote("openai")]);
    manager.set_provider("openai", None, None).await.unwrap();

    let err = manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap_err();

    match &err {
        QuillError::CredentialMissing { provider, guidance } => {
            assert_eq!(provider, "openai");
            assert!(guidance.contains("OPENAI_API_KEY"));
        }
        other => panic!("expected CredentialMissing, got {other:?}"),
    }

    // Active remains unset afterward
    assert_ne!(manager.state(), SessionState::Active);
    let status = manager.status().await;
    assert!(!status.contains("Session: active"));
}

#[tokio::test]
async fn test_single_supported_local_failing_construction_aggregates() {
    let mut manager = manager_with(vec![
        MockEngine::local("webllm").unsupported("WebGPU unavailable"),
        MockEngine::local("wllama").fail_construction("wasm memory limit"),
    ]);

    let err = manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap_err();

    match &err {
        QuillError::AllProvidersFailed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[1].provider, "wllama");
            assert!(attempts[1].reason.contains("wasm memory limit"));
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("credentialed provider"));
}

#[tokio::test]
async fn test_tool_pack_idempotent_reenable() {
    let mut manager = manager_with(vec![MockEngine::local("webllm")]);

    let first = manager.enable_tool_pack("clock").unwrap();
    assert!(first.contains("Enabled"));

    let second = manager.enable_tool_pack("clock").unwrap();
    assert!(second.contains("already enabled"));

    assert_eq!(manager.enabled_tool_packs(), vec!["clock".to_string()]);
}

#[tokio::test]
async fn test_unknown_tool_pack_is_descriptive() {
    let mut manager = manager_with(vec![]);
    let err = manager.enable_tool_pack("spreadsheet").unwrap_err();
    assert!(matches!(err, QuillError::UnknownToolPack(_)));
    assert!(err.to_string().contains("spreadsheet"));
}

#[tokio::test]
async fn test_construction_progress_reaches_subscriber() {
    let mut manager = manager_with(vec![MockEngine::local("webllm").with_download_steps(vec![
        (Some(0.5), "fetching weights"),
        (Some(1.0), "fetching weights"),
    ])]);

    let messages: Arc<Mutex<Vec<(String, ProgressStatus)>>> = Arc::new(Mutex::new(vec![]));
    let sink_messages = messages.clone();
    manager.progress().subscribe(Arc::new(move |report| {
        sink_messages
            .lock()
            .unwrap()
            .push((report.message, report.status));
    }));

    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();

    let messages = messages.lock().unwrap();
    // Duplicate "fetching weights" collapsed; terminal report delivered
    let fetch_count = messages
        .iter()
        .filter(|(m, _)| m == "fetching weights")
        .count();
    assert_eq!(fetch_count, 1);
    assert_eq!(
        messages.last().unwrap(),
        &("Session ready".to_string(), ProgressStatus::Complete)
    );
}

#[tokio::test]
async fn test_shared_pool_across_managers() {
    let pool = Arc::new(InstancePool::new());
    let engine = Arc::new(MockEngine::local("webllm"));
    let mut catalog = EngineCatalog::new(ProviderRegistry::builtin());
    catalog.register_engine(engine.clone());
    let catalog = Arc::new(catalog);

    let mut first =
        ChatSessionManager::new(catalog.clone(), pool.clone(), SettingsSnapshot::new());
    let mut second =
        ChatSessionManager::new(catalog.clone(), pool.clone(), SettingsSnapshot::new());

    first
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    second
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();

    // Both sessions share one loaded instance
    assert_eq!(engine.counters().constructions(), 1);
    assert_eq!(pool.status().await[0].ref_count, 2);

    // Releasing one keeps the instance alive for the other
    first.shutdown().await;
    assert!(pool.contains("webllm-default").await);
    assert_eq!(engine.counters().closes(), 0);

    second.shutdown().await;
    assert!(pool.is_empty().await);
    assert_eq!(engine.counters().closes(), 1);
}

#[tokio::test]
async fn test_update_settings_is_explicit() {
    let mut manager = manager_with(vec![MockEngine::remote("openai").with_response("ok")]);

    let mut settings = SettingsSnapshot::new();
    settings.default_provider = Some("openai".to_string());
    settings.set_credential("OPENAI_API_KEY", "sk-x");
    manager.update_settings(settings);

    manager
        .send("hi", &mut NoopSendObserver, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(manager.active().unwrap().provider, "openai");
}
