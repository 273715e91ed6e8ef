//! Integration tests for semantic search
//!
//! Covers the chunk-to-entity ranking pipeline end to end: round trips
//! through the indexing pipeline, max-aggregation across chunks, the
//! empty-query fallback, stale vector handling and role-scoped person
//! search.

use anyhow::Result;
use async_trait::async_trait;
use mercato_core::db::DatabaseService;
use mercato_core::index::VectorIndex;
use mercato_core::models::{
    Entity, EntityFilter, EntityKind, EntityPayload, EntityStatus, EntityUpdate, PersonLink,
    PersonRole,
};
use mercato_core::services::{EntityService, SearchService};
use mercato_embed_engine::{EmbedError, HashingEmbedder, TextEmbedder};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

struct TestEnv {
    service: Arc<EntityService>,
    search: SearchService,
    db: Arc<DatabaseService>,
    index: Arc<VectorIndex>,
    _tmp: TempDir,
}

/// Test helper: full stack over a fresh temp database with the offline
/// hashing embedder.
async fn create_test_env() -> Result<TestEnv> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();

    let tmp = TempDir::new()?;
    let db = Arc::new(DatabaseService::open(tmp.path().join("test.db")).await?);
    let embedder = Arc::new(HashingEmbedder::new(128));
    let index = Arc::new(VectorIndex::new(db.clone(), embedder));
    let service = Arc::new(EntityService::new(db.clone(), index.clone()));
    let search = SearchService::new(service.clone());
    Ok(TestEnv {
        service,
        search,
        db,
        index,
        _tmp: tmp,
    })
}

fn entity_with_description(kind: EntityKind, title: &str, description: &str) -> Entity {
    let payload = EntityPayload {
        description: Some(description.to_string()),
        ..Default::default()
    };
    Entity::new(kind, title, payload)
}

// =========================================================================
// Round trip
// =========================================================================

#[tokio::test]
async fn test_round_trip_query_finds_indexed_entity() -> Result<()> {
    let env = create_test_env().await?;

    let plumbing = env
        .service
        .create_entity(
            entity_with_description(
                EntityKind::Service,
                "Selvam Plumbing",
                "Pipe repair and installation",
            )
            .with_value(500.0),
        )
        .await?;
    env.service
        .create_entity(entity_with_description(
            EntityKind::Food,
            "Annapoorna Tiffins",
            "Idli dosa and filter coffee",
        ))
        .await?;
    env.service
        .create_entity(entity_with_description(
            EntityKind::Education,
            "Violin Lessons",
            "Carnatic violin classes for beginners",
        ))
        .await?;

    let results = env
        .search
        .search("pipe repair", &EntityFilter::default(), 10)
        .await?;

    assert!(!results.is_empty());
    assert_eq!(results[0].id, plumbing.id, "best match should rank first");
    let similarity = results[0].similarity.expect("search attaches similarity");
    assert!(similarity > 0.0);

    // Ranking is strictly non-increasing
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    Ok(())
}

// =========================================================================
// Empty query vs empty result
// =========================================================================

#[tokio::test]
async fn test_empty_query_falls_back_to_listing() -> Result<()> {
    let env = create_test_env().await?;

    for title in ["First", "Second", "Third"] {
        env.service
            .create_entity(entity_with_description(EntityKind::Product, title, "stock"))
            .await?;
    }

    let listed = env
        .service
        .list_entities(&EntityFilter::default(), Some(2))
        .await?;
    let searched = env.search.search("", &EntityFilter::default(), 2).await?;

    let listed_ids: Vec<&str> = listed.iter().map(|e| e.id.as_str()).collect();
    let searched_ids: Vec<&str> = searched.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(listed_ids, searched_ids);
    assert!(searched.iter().all(|e| e.similarity.is_none()));

    // Whitespace-only queries take the same path
    let blank = env.search.search("   ", &EntityFilter::default(), 2).await?;
    assert_eq!(blank.len(), 2);
    assert!(blank.iter().all(|e| e.similarity.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_zero_index_hits_is_empty_not_fallback() -> Result<()> {
    let env = create_test_env().await?;

    let entity = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Product,
            "Widget",
            "A widget",
        ))
        .await?;
    // Simulate an entity whose vectors were never written
    env.index.delete_for_entity(&entity.id).await?;

    let results = env
        .search
        .search("widget", &EntityFilter::default(), 10)
        .await?;
    assert!(results.is_empty(), "no index records means no results");

    // ...while the no-query path still lists the entity
    let fallback = env.search.search("", &EntityFilter::default(), 10).await?;
    assert_eq!(fallback.len(), 1);
    Ok(())
}

// =========================================================================
// Aggregation
// =========================================================================

/// Embedder returning pre-programmed vectors per exact input text.
/// Lets tests pin chunk-level similarities precisely.
struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

#[async_trait]
impl TextEmbedder for StubEmbedder {
    async fn embed_document(&self, text: &str) -> mercato_embed_engine::Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedError::Unavailable(format!("no stub vector for '{}'", text)))
    }

    async fn embed_query(&self, text: &str) -> mercato_embed_engine::Result<Vec<f32>> {
        self.embed_document(text).await
    }

    async fn embed_bytes(&self, _bytes: &[u8]) -> mercato_embed_engine::Result<Vec<f32>> {
        Err(EmbedError::Unavailable("no byte stubs".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[tokio::test]
async fn test_entity_similarity_is_max_over_chunks() -> Result<()> {
    let tmp = TempDir::new()?;
    let db = Arc::new(DatabaseService::open(tmp.path().join("test.db")).await?);

    // Unit vectors whose first component IS the cosine against [1, 0]
    let mut vectors = HashMap::new();
    vectors.insert("q".to_string(), vec![1.0, 0.0]);
    let stub = Arc::new(StubEmbedder {
        vectors,
        dimension: 2,
    });
    let index = Arc::new(VectorIndex::new(db.clone(), stub));
    let service = Arc::new(EntityService::new(db.clone(), index.clone()));
    let search = SearchService::new(service.clone());

    // Entities created through raw SQL so the indexing pipeline (which
    // would call the stub with unknown chunk text) stays out of the way.
    let conn = db.connect_with_timeout().await?;
    for id in ["multi", "single"] {
        conn.execute(
            "INSERT INTO entities (id, kind, title, status) VALUES (?, 'service', ?, 'active')",
            (id, id),
        )
        .await?;
    }

    fn unit(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    // Chunk similarities 0.2 / 0.9 / 0.4 -> entity similarity must be 0.9
    for (i, cos) in [0.2, 0.9, 0.4].iter().enumerate() {
        index
            .add(
                &unit(*cos),
                json!({"entity_id": "multi", "chunk_index": i}),
                "chunk",
            )
            .await?;
    }
    index
        .add(&unit(0.5), json!({"entity_id": "single"}), "chunk")
        .await?;

    let results = search.search("q", &EntityFilter::default(), 10).await?;
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].id, "multi");
    let similarity = results[0].similarity.expect("similarity attached");
    assert!(
        (similarity - 0.9).abs() < 1e-5,
        "expected max-aggregation 0.9, got {}",
        similarity
    );

    assert_eq!(results[1].id, "single");
    let similarity = results[1].similarity.expect("similarity attached");
    assert!((similarity - 0.5).abs() < 1e-5);
    Ok(())
}

// =========================================================================
// Idempotent re-index
// =========================================================================

#[tokio::test]
async fn test_reindex_with_unchanged_text_keeps_vector_count() -> Result<()> {
    let env = create_test_env().await?;

    let entity = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Tailoring",
            "Blouse stitching and alterations, same day service",
        ))
        .await?;
    let baseline = env.index.len().await?;
    assert!(baseline > 0);

    // A non-text edit leaves the index untouched
    env.service
        .update_entity(
            &entity.id,
            EntityUpdate {
                value: Some(199.0),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(env.index.len().await?, baseline);

    // Re-writing the identical title is also a no-op edit
    env.service
        .update_entity(
            &entity.id,
            EntityUpdate {
                title: Some("Tailoring".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(env.index.len().await?, baseline);

    // Even a forced re-index swaps rows instead of accumulating them
    env.service.reindex_entity(&entity.id).await?;
    assert_eq!(env.index.len().await?, baseline);
    Ok(())
}

// =========================================================================
// Stale references
// =========================================================================

#[tokio::test]
async fn test_dangling_vectors_are_silently_dropped() -> Result<()> {
    let env = create_test_env().await?;

    let ghost = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Ghost Plumbing",
            "Pipe repair and installation",
        ))
        .await?;
    let alive = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Live Plumbing",
            "Pipe repair and drain cleaning",
        ))
        .await?;

    // Simulate a missed cleanup: the row goes away, the vectors stay
    let conn = env.db.connect_with_timeout().await?;
    conn.execute("DELETE FROM entities WHERE id = ?", [ghost.id.as_str()])
        .await?;

    let results = env
        .search
        .search("pipe repair", &EntityFilter::default(), 10)
        .await?;

    assert!(results.iter().all(|e| e.id != ghost.id));
    assert!(results.iter().any(|e| e.id == alive.id));
    Ok(())
}

// =========================================================================
// Filtering
// =========================================================================

#[tokio::test]
async fn test_relational_filter_applies_after_ranking() -> Result<()> {
    let env = create_test_env().await?;

    let active = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Active Plumbing",
            "Pipe repair and installation",
        ))
        .await?;
    env.service
        .create_entity(
            entity_with_description(
                EntityKind::Service,
                "Closed Plumbing",
                "Pipe repair and installation",
            )
            .with_status(EntityStatus::Completed),
        )
        .await?;

    let filter = EntityFilter {
        status: Some(EntityStatus::Active),
        ..Default::default()
    };
    let results = env.search.search("pipe repair", &filter, 10).await?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, active.id);
    assert!(results[0].similarity.is_some());
    Ok(())
}

#[tokio::test]
async fn test_structural_entities_hidden_from_search() -> Result<()> {
    let env = create_test_env().await?;

    env.service
        .create_entity(entity_with_description(
            EntityKind::Search,
            "Saved Search",
            "pipe repair saved query",
        ))
        .await?;
    let real = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Plumbing",
            "pipe repair",
        ))
        .await?;

    let results = env
        .search
        .search("pipe repair", &EntityFilter::default(), 10)
        .await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, real.id);
    Ok(())
}

#[tokio::test]
async fn test_limit_truncates_ranked_results() -> Result<()> {
    let env = create_test_env().await?;

    for i in 0..4 {
        env.service
            .create_entity(entity_with_description(
                EntityKind::Service,
                &format!("Plumber {}", i),
                "pipe repair and installation",
            ))
            .await?;
    }

    let results = env
        .search
        .search("pipe repair", &EntityFilter::default(), 2)
        .await?;
    assert_eq!(results.len(), 2);
    Ok(())
}

// =========================================================================
// Person search
// =========================================================================

#[tokio::test]
async fn test_person_search_dedupes_by_relevance_order() -> Result<()> {
    let env = create_test_env().await?;

    let plumbing = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Service,
            "Selvam Plumbing",
            "Pipe repair and installation",
        ))
        .await?;
    let hardware = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Product,
            "Hardware Supplies",
            "repair tools and fittings",
        ))
        .await?;
    let bakery = env
        .service
        .create_entity(entity_with_description(
            EntityKind::Food,
            "Bakery",
            "fresh bread and cakes",
        ))
        .await?;

    env.service
        .add_person(PersonLink::new(&plumbing.id, "selvam", PersonRole::Seller))
        .await?;
    env.service
        .add_person(PersonLink::new(&plumbing.id, "kumar", PersonRole::Staff))
        .await?;
    // Same person selling elsewhere must not appear twice
    env.service
        .add_person(PersonLink::new(&hardware.id, "selvam", PersonRole::Seller))
        .await?;
    env.service
        .add_person(PersonLink::new(&bakery.id, "mary", PersonRole::Seller))
        .await?;

    let sellers = env
        .search
        .search_people("pipe repair", Some(PersonRole::Seller), 10)
        .await?;

    let ids: Vec<&str> = sellers.iter().map(|p| p.person_id.as_str()).collect();
    assert!(ids.contains(&"selvam"));
    assert_eq!(
        ids.iter().filter(|id| **id == "selvam").count(),
        1,
        "person ids deduplicate across entities"
    );
    // Staff link is excluded by the role scope
    assert!(!ids.contains(&"kumar"));
    // First occurrence keeps the most relevant entity's id
    let selvam = &sellers[0];
    assert_eq!(selvam.person_id, "selvam");
    assert_eq!(selvam.entity_id, plumbing.id);
    assert!(selvam.similarity > 0.0);
    Ok(())
}
