//! Search Coordinator
//!
//! Turns a free-text query into a ranked list of entities:
//!
//! 1. An empty (after trimming) query bypasses semantic search entirely
//!    and returns the plain relational listing, with no similarity
//!    attached - "no query" and "no matches" are distinct outcomes.
//! 2. Otherwise the vector index is queried with an overfetched `top_k`
//!    to compensate for the chunk-to-entity collapse losing distinct
//!    entities to duplicates.
//! 3. Chunk hits are grouped by owning entity; an entity's relevance is
//!    the MAXIMUM similarity among its chunks, so a single strong chunk
//!    surfaces the entity even when most of its text is irrelevant.
//! 4. The distinct entity ids are batch-fetched in one query. Stale
//!    vector records pointing at deleted entities are silently dropped,
//!    never an error.
//! 5. The relational filter applies after the semantic ranking, so a
//!    filter can never bias which entities got matched.
//! 6. Stable sort by similarity descending, truncate to `limit`.

use crate::models::{Entity, EntityFilter, PersonHit, PersonRole};
use crate::services::entity_service::EntityService;
use crate::services::error::ServiceError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How many chunk hits to request per requested entity. Must be >= 2:
/// several chunks of one entity can crowd out other entities before the
/// group-by collapses them.
pub const OVERFETCH_FACTOR: usize = 4;

/// Coordinates the vector index and the entity store into ranked
/// search results.
pub struct SearchService {
    entities: Arc<EntityService>,
}

impl SearchService {
    pub fn new(entities: Arc<EntityService>) -> Self {
        Self { entities }
    }

    /// Ranked entity search. See module docs for the algorithm.
    pub async fn search(
        &self,
        query: &str,
        filter: &EntityFilter,
        limit: usize,
    ) -> Result<Vec<Entity>, ServiceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let trimmed = query.trim();
        if trimmed.is_empty() {
            // Plain listing mode: no similarity field on the results.
            return self.entities.list_entities(filter, Some(limit)).await;
        }

        let top_k = limit.saturating_mul(OVERFETCH_FACTOR);
        let hits = self.entities.index().query_text(trimmed, top_k).await?;
        if hits.is_empty() {
            // Semantic search ran and found nothing; this is an empty
            // ranked result, not the unranked fallback.
            return Ok(Vec::new());
        }

        // Hits arrive ordered by similarity desc with insertion-order
        // tie-break, so the first occurrence of an entity carries its
        // maximum chunk similarity and first-seen order is already the
        // final ranking order.
        let mut best: HashMap<String, f32> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for hit in &hits {
            if hit.entity_id.is_empty() {
                continue;
            }
            if !best.contains_key(&hit.entity_id) {
                best.insert(hit.entity_id.clone(), hit.similarity);
                order.push(hit.entity_id.clone());
            }
        }

        let fetched = self.entities.get_entities_by_ids(&order).await?;
        let mut by_id: HashMap<String, Entity> = fetched
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut ranked = Vec::new();
        for entity_id in &order {
            // Dangling ids (vectors outliving their entity) drop out here.
            let Some(mut entity) = by_id.remove(entity_id) else {
                tracing::debug!(entity_id = %entity_id, "Dropping stale vector reference");
                continue;
            };
            if !filter.matches(&entity) {
                continue;
            }
            entity.similarity = best.get(entity_id).copied();
            ranked.push(entity);
        }

        // Already in max-similarity order; the stable sort keeps the
        // grouping order for equal scores.
        ranked.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Role-scoped person search: people linked to entities in the
    /// semantic match set, deduplicated by person id, preserving the
    /// relevance order of each person's first occurrence.
    pub async fn search_people(
        &self,
        query: &str,
        role: Option<PersonRole>,
        limit: usize,
    ) -> Result<Vec<PersonHit>, ServiceError> {
        let ranked = self
            .search(query, &EntityFilter::default(), limit.max(1))
            .await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ranked.iter().map(|e| e.id.clone()).collect();
        let links = self.entities.links_for_entities(&ids).await?;

        // Group links per entity so we can walk entities in rank order.
        let mut links_by_entity: HashMap<&str, Vec<_>> = HashMap::new();
        for link in &links {
            links_by_entity
                .entry(link.entity_id.as_str())
                .or_default()
                .push(link);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut people = Vec::new();
        for entity in &ranked {
            let Some(entity_links) = links_by_entity.get(entity.id.as_str()) else {
                continue;
            };
            for link in entity_links {
                if let Some(wanted) = role {
                    if link.role != wanted {
                        continue;
                    }
                }
                if !seen.insert(link.person_id.as_str()) {
                    continue;
                }
                people.push(PersonHit {
                    person_id: link.person_id.clone(),
                    role: link.role,
                    entity_id: entity.id.clone(),
                    similarity: entity.similarity.unwrap_or(0.0),
                });
            }
        }

        people.truncate(limit);
        Ok(people)
    }
}
