//! Demo Data Seeding
//!
//! Inserts a small demo catalog (entities, person links, tasks) for
//! first-run and showcase builds. Seeding is strictly best-effort: every
//! failure is logged and swallowed so a broken seed can never block
//! application startup.

use crate::models::{
    Entity, EntityKind, EntityPayload, PersonLink, PersonRole, Task, TaskKind, TaskPriority,
};
use crate::services::entity_service::EntityService;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Seed the demo catalog. Returns the number of entities created;
/// partial success is normal when re-seeding an existing database.
pub async fn seed_demo_data(service: &Arc<EntityService>) -> usize {
    let mut created = 0;

    for (kind, title, description, tags, value, location) in demo_entities() {
        let payload = EntityPayload {
            description: Some(description.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        let entity = Entity::new(kind, title, payload)
            .with_value(value)
            .with_location(location);

        let entity = match service.create_entity(entity).await {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!(title, "Skipping demo entity: {}", e);
                continue;
            }
        };
        created += 1;

        if let Err(e) = service
            .add_person(PersonLink::new(&entity.id, "demo-seller", PersonRole::Seller))
            .await
        {
            tracing::warn!(entity_id = %entity.id, "Skipping demo link: {}", e);
        }

        let task = Task::new(&entity.id, "demo-buyer", TaskKind::Confirm, "")
            .with_priority(TaskPriority::Normal)
            .with_due(Utc::now() + Duration::hours(24));
        if let Err(e) = service.create_task(task).await {
            tracing::warn!(entity_id = %entity.id, "Skipping demo task: {}", e);
        }
    }

    tracing::info!(created, "Demo data seeded");
    created
}

#[allow(clippy::type_complexity)]
fn demo_entities() -> Vec<(EntityKind, &'static str, &'static str, Vec<&'static str>, f64, &'static str)> {
    vec![
        (
            EntityKind::Service,
            "Selvam Plumbing",
            "Pipe repair and installation, drain cleaning, emergency callout",
            vec!["plumbing", "repair"],
            500.0,
            "Madurai",
        ),
        (
            EntityKind::Food,
            "Annapoorna Tiffins",
            "Idli, dosa and filter coffee delivered hot every morning",
            vec!["breakfast", "delivery"],
            80.0,
            "Coimbatore",
        ),
        (
            EntityKind::Rental,
            "Lakeview 2BHK",
            "Furnished two bedroom flat with balcony, monthly rental",
            vec!["apartment", "furnished"],
            18000.0,
            "Bengaluru",
        ),
        (
            EntityKind::Education,
            "Carnatic Violin Lessons",
            "Weekly violin classes for beginners and intermediate students",
            vec!["music", "classes"],
            1200.0,
            "Chennai",
        ),
        (
            EntityKind::Transport,
            "Airport Drop Cab",
            "Sedan cab to the airport, fixed fare, night service available",
            vec!["cab", "airport"],
            650.0,
            "Hyderabad",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::index::VectorIndex;
    use crate::models::EntityFilter;
    use mercato_embed_engine::HashingEmbedder;
    use tempfile::TempDir;

    async fn create_test_service() -> anyhow::Result<(Arc<EntityService>, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::open(temp_dir.path().join("test.db")).await?);
        let embedder = Arc::new(HashingEmbedder::new(64));
        let index = Arc::new(VectorIndex::new(db.clone(), embedder));
        Ok((Arc::new(EntityService::new(db, index)), temp_dir))
    }

    #[tokio::test]
    async fn test_seed_populates_store() -> anyhow::Result<()> {
        let (service, _tmp) = create_test_service().await?;

        let created = seed_demo_data(&service).await;
        assert_eq!(created, 5);

        let listed = service
            .list_entities(&EntityFilter::default(), None)
            .await?;
        assert_eq!(listed.len(), 5);

        let stats = service.stats().await?;
        assert_eq!(stats.total_entities, 5);
        assert_eq!(stats.total_tasks, 5);
        assert_eq!(stats.total_links, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_seed_never_panics_on_reseed() -> anyhow::Result<()> {
        let (service, _tmp) = create_test_service().await?;

        seed_demo_data(&service).await;
        // Re-seeding duplicates the catalog (fresh ids) but must not fail
        let second = seed_demo_data(&service).await;
        assert_eq!(second, 5);
        Ok(())
    }
}
