// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;

use quill::engine::mock::MockEngine;
use quill::engine::{CapabilityProvider, ModelHandle};
use quill::pool::InstancePool;
use quill::Result;

async fn build(engine: &MockEngine) -> Result<Arc<dyn ModelHandle>> {
    engine.create_handle("shared-model", None).await
}

#[tokio::test]
async fn test_entry_exists_iff_acquires_exceed_releases() {
    let pool = InstancePool::new();
    let engine = MockEngine::local("webllm");

    // Mixed sequence of acquires and releases; the entry must exist exactly
    // while acquires outnumber releases.
    pool.acquire("shared-model", || build(&engine)).await.unwrap();
    assert!(pool.contains("shared-model").await);

    pool.acquire("shared-model", || build(&engine)).await.unwrap();
    pool.release("shared-model").await;
    assert!(pool.contains("shared-model").await);

    pool.release("shared-model").await;
    assert!(!pool.contains("shared-model").await);

    // Teardown happened exactly once
    assert_eq!(engine.counters().closes(), 1);
    assert_eq!(engine.counters().constructions(), 1);
}

#[tokio::test]
async fn test_excess_releases_never_underflow() {
    let pool = InstancePool::new();
    let engine = MockEngine::local("webllm");

    pool.acquire("shared-model", || build(&engine)).await.unwrap();
    pool.release("shared-model").await;
    pool.release("shared-model").await;
    pool.release("shared-model").await;

    // A fresh acquire after the noise behaves like a first acquire
    pool.acquire("shared-model", || build(&engine)).await.unwrap();
    assert!(pool.contains("shared-model").await);
    assert_eq!(pool.status().await[0].ref_count, 1);
    assert_eq!(engine.counters().closes(), 1);
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_construction() {
    let pool = Arc::new(InstancePool::new());
    let engine = Arc::new(MockEngine::local("webllm"));

    let mut handles = vec![];
    for _ in 0..8 {
        let pool = pool.clone();
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            pool.acquire("shared-model", || async move {
                engine.create_handle("shared-model", None).await
            })
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.counters().constructions(), 1);
    assert_eq!(pool.status().await[0].ref_count, 8);

    for _ in 0..8 {
        pool.release("shared-model").await;
    }
    assert!(pool.is_empty().await);
    assert_eq!(engine.counters().closes(), 1);
}

#[tokio::test]
async fn test_status_reports_every_entry() {
    let pool = InstancePool::new();
    let engine = MockEngine::local("webllm");

    pool.acquire("model-a", || build(&engine)).await.unwrap();
    pool.acquire("model-b", || build(&engine)).await.unwrap();
    pool.acquire("model-b", || build(&engine)).await.unwrap();

    let mut status = pool.status().await;
    status.sort_by(|a, b| a.model_id.cmp(&b.model_id));

    assert_eq!(status.len(), 2);
    assert_eq!(status[0].model_id, "model-a");
    assert_eq!(status[0].ref_count, 1);
    assert_eq!(status[1].model_id, "model-b");
    assert_eq!(status[1].ref_count, 2);
}
