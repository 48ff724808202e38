//! Retrieval ordering, scoping, and floor behavior.

mod common;

use common::MockEmbedder;
use studyrag::ingest::{ingest_document, ChunkingOptions};
use studyrag::search::search_chunks;
use studyrag::store::SqliteStore;

async fn seed_document(
    store: &SqliteStore,
    embedder: &MockEmbedder,
    workspace_id: &str,
    title: &str,
    content: &str,
) {
    ingest_document(
        store,
        embedder,
        workspace_id,
        "user-1",
        content,
        Some(title),
        ChunkingOptions::default(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_results_are_ordered_by_descending_similarity() {
    common::setup_tracing();
    let store = common::memory_store().await;
    let embedder = MockEmbedder::new(vec![0.0, 0.0])
        .with_vector("mitochondria are the powerhouse", vec![1.0, 0.0])
        .with_vector("ribosomes synthesize proteins", vec![0.9, 0.1])
        .with_vector("the krebs cycle", vec![0.0, 1.0])
        .with_vector("what is a mitochondrion?", vec![1.0, 0.0]);

    let workspace = store.create_workspace("user-1", "Biology", true).await.unwrap();
    seed_document(&store, &embedder, &workspace.id, "Cells", "mitochondria are the powerhouse").await;
    seed_document(&store, &embedder, &workspace.id, "Proteins", "ribosomes synthesize proteins").await;
    seed_document(&store, &embedder, &workspace.id, "Metabolism", "the krebs cycle").await;

    let matches = search_chunks(
        &store,
        &embedder,
        "what is a mitochondrion?",
        &workspace.id,
        10,
        None,
    )
    .await
    .unwrap();

    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].document.title, "Cells");
    assert_eq!(matches[1].document.title, "Proteins");
    assert_eq!(matches[2].document.title, "Metabolism");
    for window in matches.windows(2) {
        assert!(window[0].similarity >= window[1].similarity);
    }
}

#[tokio::test]
async fn test_k_truncates_the_result_list() {
    common::setup_tracing();
    let store = common::memory_store().await;
    let embedder = MockEmbedder::new(vec![1.0, 0.0]);

    let workspace = store.create_workspace("user-1", "Biology", true).await.unwrap();
    for i in 0..5 {
        seed_document(
            &store,
            &embedder,
            &workspace.id,
            &format!("Doc {i}"),
            &format!("note number {i}"),
        )
        .await;
    }

    let matches = search_chunks(&store, &embedder, "anything", &workspace.id, 2, None)
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
}

#[tokio::test]
async fn test_search_is_scoped_to_the_workspace() {
    common::setup_tracing();
    let store = common::memory_store().await;
    let embedder = MockEmbedder::new(vec![1.0, 0.0]);

    let biology = store.create_workspace("user-1", "Biology", true).await.unwrap();
    let history = store.create_workspace("user-1", "History", true).await.unwrap();
    seed_document(&store, &embedder, &biology.id, "Cells", "all about cells").await;
    seed_document(&store, &embedder, &history.id, "Rome", "all about rome").await;

    let matches = search_chunks(&store, &embedder, "cells", &biology.id, 10, None)
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].document.title, "Cells");
    assert!(matches.iter().all(|m| m.chunk.workspace_id == biology.id));
}

#[tokio::test]
async fn test_similarity_floor_filters_weak_matches() {
    common::setup_tracing();
    let store = common::memory_store().await;
    let embedder = MockEmbedder::new(vec![0.0, 0.0])
        .with_vector("strong match", vec![1.0, 0.0])
        .with_vector("unrelated text", vec![0.0, 1.0])
        .with_vector("the query", vec![1.0, 0.0]);

    let workspace = store.create_workspace("user-1", "Biology", true).await.unwrap();
    seed_document(&store, &embedder, &workspace.id, "Strong", "strong match").await;
    seed_document(&store, &embedder, &workspace.id, "Weak", "unrelated text").await;

    let unfiltered = search_chunks(&store, &embedder, "the query", &workspace.id, 10, None)
        .await
        .unwrap();
    assert_eq!(unfiltered.len(), 2);

    let filtered = search_chunks(
        &store,
        &embedder,
        "the query",
        &workspace.id,
        10,
        Some(0.5),
    )
    .await
    .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].document.title, "Strong");
}

#[tokio::test]
async fn test_empty_workspace_returns_no_matches() {
    common::setup_tracing();
    let store = common::memory_store().await;
    let embedder = MockEmbedder::new(vec![1.0]);

    let workspace = store.create_workspace("user-1", "Empty", true).await.unwrap();
    let matches = search_chunks(&store, &embedder, "anything", &workspace.id, 10, None)
        .await
        .unwrap();
    assert!(matches.is_empty());
}
