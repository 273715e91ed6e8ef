//! Entity Store Service
//!
//! CRUD, relational queries, aggregate statistics and bulk operations
//! over entities, person links and tasks, plus the indexing pipeline
//! that keeps the chunk vector index in sync with entity text.
//!
//! # Write discipline
//!
//! All mutations touching one entity's vectors are sequenced through a
//! per-entity async lock: an edit is "delete vectors, re-chunk,
//! re-embed, re-insert" and that sequence must never interleave with
//! another writer for the same entity. Every chunk is embedded *before*
//! the old rows are deleted, so a failed embedding call leaves the prior
//! indexed state untouched.
//!
//! # Reference policy
//!
//! Person links and tasks reference entities by id without enforced
//! foreign keys. Orphans (rows whose entity has been deleted) are
//! tolerated and filtered at query time; cleaning up an entity's tasks
//! is the explicit `delete_tasks_for_entity` primitive, never a cascade.

use crate::db::{format_timestamp, parse_timestamp, DatabaseService};
use crate::index::{TextChunker, VectorIndex};
use crate::models::{
    Entity, EntityFilter, EntityKind, EntityPayload, EntityStatus, EntityUpdate, PersonLink,
    PersonRole, Task, TaskPriority, TaskStatus, TaskUpdate,
};
use crate::services::error::ServiceError;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ordering clause shared by all task listings: urgency first, then the
/// nearest due time (tasks without a due time last), then recency.
const TASK_ORDER: &str =
    "ORDER BY priority DESC, (due IS NULL) ASC, due ASC, created_at DESC";

const ENTITY_COLUMNS: &str =
    "id, kind, title, value, quantity, location, status, payload, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, entity_id, person_id, kind, title, status, priority, due, payload, created_at, updated_at";

/// Aggregate store statistics, computed fresh on every call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_entities: u64,
    pub entities_by_status: HashMap<String, u64>,
    pub entities_by_kind: HashMap<String, u64>,
    pub total_tasks: u64,
    pub tasks_by_status: HashMap<String, u64>,
    pub total_links: u64,
    pub links_by_role: HashMap<String, u64>,
}

/// One failed item of a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    /// Identifies the sub-item (person id, task kind, ...)
    pub item: String,
    pub error: String,
}

/// Result of a bulk operation that is allowed to partially complete.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BulkFailure>,
}

impl<T> BulkOutcome<T> {
    fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Whether every sub-item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entity store with integrated semantic indexing.
pub struct EntityService {
    db: Arc<DatabaseService>,
    index: Arc<VectorIndex>,
    chunker: TextChunker,
    /// Per-entity writer locks; see module docs
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityService {
    /// Create a service over an opened database and vector index, using
    /// the default chunker configuration.
    pub fn new(db: Arc<DatabaseService>, index: Arc<VectorIndex>) -> Self {
        Self::with_chunker(db, index, TextChunker::default())
    }

    /// Create a service with an explicit chunker configuration.
    pub fn with_chunker(
        db: Arc<DatabaseService>,
        index: Arc<VectorIndex>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            db,
            index,
            chunker,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying vector index (shared with the search coordinator).
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Underlying database handle.
    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    async fn write_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // =====================================================================
    // Entities
    // =====================================================================

    /// Create an entity: validates, persists and indexes its text.
    ///
    /// The id is kept when the caller supplied one (blank ids get a fresh
    /// UUID); timestamps are set to now.
    pub async fn create_entity(&self, mut entity: Entity) -> Result<Entity, ServiceError> {
        if entity.id.trim().is_empty() {
            entity.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        entity.created_at = now;
        entity.updated_at = now;
        entity.similarity = None;
        entity.validate()?;

        let payload_json = entity
            .payload
            .to_json_string()
            .map_err(|e| ServiceError::serialization_error(e.to_string()))?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            &format!(
                "INSERT INTO entities ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ENTITY_COLUMNS
            ),
            (
                entity.id.clone(),
                entity.kind.to_string(),
                entity.title.clone(),
                entity.value,
                entity.quantity,
                entity.location.clone(),
                entity.status.to_string(),
                payload_json,
                format_timestamp(&entity.created_at),
                format_timestamp(&entity.updated_at),
            ),
        )
        .await
        .map_err(|e| ServiceError::query_failed(format!("Failed to insert entity: {}", e)))?;

        let lock = self.write_lock(&entity.id).await;
        let _guard = lock.lock().await;
        self.reindex_locked(&entity).await?;

        Ok(entity)
    }

    /// Fetch one entity by id.
    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS),
                [id],
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to query entity: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            Some(row) => Ok(Some(row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update. Only supplied fields change; `updated_at`
    /// is always bumped. Text-affecting changes re-chunk and re-embed
    /// under the entity's writer lock.
    pub async fn update_entity(
        &self,
        id: &str,
        update: EntityUpdate,
    ) -> Result<Entity, ServiceError> {
        let lock = self.write_lock(id).await;
        let _guard = lock.lock().await;

        let current = self
            .get_entity(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("entity", id))?;
        let old_index_text = current.index_text();

        let mut updated = Entity {
            kind: update.kind.unwrap_or(current.kind),
            title: update.title.unwrap_or(current.title),
            payload: update.payload.unwrap_or(current.payload),
            value: update.value.unwrap_or(current.value),
            quantity: update.quantity.unwrap_or(current.quantity),
            location: match update.location {
                None => current.location,
                Some(new_location) => new_location,
            },
            status: update.status.unwrap_or(current.status),
            updated_at: Utc::now(),
            ..current
        };
        // updated_at never regresses below created_at
        if updated.updated_at < updated.created_at {
            updated.updated_at = updated.created_at;
        }
        updated.validate()?;

        let payload_json = updated
            .payload
            .to_json_string()
            .map_err(|e| ServiceError::serialization_error(e.to_string()))?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "UPDATE entities SET kind = ?, title = ?, value = ?, quantity = ?,
                location = ?, status = ?, payload = ?, updated_at = ?
             WHERE id = ?",
            (
                updated.kind.to_string(),
                updated.title.clone(),
                updated.value,
                updated.quantity,
                updated.location.clone(),
                updated.status.to_string(),
                payload_json,
                format_timestamp(&updated.updated_at),
                id,
            ),
        )
        .await
        .map_err(|e| ServiceError::query_failed(format!("Failed to update entity: {}", e)))?;

        // Unchanged text skips the delete+reinsert cycle entirely, which
        // keeps re-indexing idempotent at the vector-count level.
        if updated.index_text() != old_index_text {
            self.reindex_locked(&updated).await?;
        }

        Ok(updated)
    }

    /// Delete an entity and its vectors. Idempotent: deleting an absent
    /// id is a successful no-op. Tasks are NOT cascaded; use
    /// [`delete_tasks_for_entity`].
    ///
    /// [`delete_tasks_for_entity`]: EntityService::delete_tasks_for_entity
    pub async fn delete_entity(&self, id: &str) -> Result<bool, ServiceError> {
        let lock = self.write_lock(id).await;
        let _guard = lock.lock().await;

        let conn = self.db.connect_with_timeout().await?;
        let rows_affected = conn
            .execute("DELETE FROM entities WHERE id = ?", [id])
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to delete entity: {}", e)))?;

        self.index.delete_for_entity(id).await?;

        Ok(rows_affected > 0)
    }

    /// List entities matching an optional status/kind filter, in
    /// insertion order. Structural kinds stay hidden unless the filter
    /// requests them.
    pub async fn list_entities(
        &self,
        filter: &EntityFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Entity>, ServiceError> {
        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?".to_string());
            params.push(status.to_string());
        }
        match filter.kind {
            Some(kind) => {
                conditions.push("kind = ?".to_string());
                params.push(kind.to_string());
            }
            None => {
                if !filter.include_structural {
                    conditions.push(
                        "kind NOT IN ('variant', 'inventory', 'store', 'cart', 'search')"
                            .to_string(),
                    );
                }
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let limit_clause = limit.map(|l| format!(" LIMIT {}", l)).unwrap_or_default();

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM entities{} ORDER BY rowid ASC{}",
                    ENTITY_COLUMNS, where_clause, limit_clause
                ),
                libsql::params_from_iter(params),
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to list entities: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            entities.push(row_to_entity(&row)?);
        }
        Ok(entities)
    }

    /// Batch-fetch entities by id in a single query. Missing ids are
    /// silently absent from the result; the result order is unspecified.
    pub async fn get_entities_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Entity>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM entities WHERE id IN ({})",
                    ENTITY_COLUMNS, placeholders
                ),
                libsql::params_from_iter(ids.to_vec()),
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to batch fetch: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            entities.push(row_to_entity(&row)?);
        }
        Ok(entities)
    }

    // =====================================================================
    // Person links
    // =====================================================================

    /// Add (or overwrite) a person link. At most one row exists per
    /// (entity, person, role) triple.
    pub async fn add_person(&self, link: PersonLink) -> Result<(), ServiceError> {
        link.validate()?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "INSERT OR REPLACE INTO person_links (entity_id, person_id, role)
             VALUES (?, ?, ?)",
            (
                link.entity_id.clone(),
                link.person_id.clone(),
                link.role.to_string(),
            ),
        )
        .await
        .map_err(|e| ServiceError::query_failed(format!("Failed to insert link: {}", e)))?;
        Ok(())
    }

    /// Attach several people to one entity. Partial completion is
    /// allowed; the outcome enumerates which sub-items succeeded.
    pub async fn add_people_to_entity(
        &self,
        entity_id: &str,
        people: Vec<(String, PersonRole)>,
    ) -> Result<BulkOutcome<PersonLink>, ServiceError> {
        let mut outcome = BulkOutcome::new();
        for (person_id, role) in people {
            let link = PersonLink::new(entity_id, person_id.clone(), role);
            match self.add_person(link.clone()).await {
                Ok(()) => outcome.succeeded.push(link),
                Err(e) => outcome.failed.push(BulkFailure {
                    item: person_id,
                    error: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    /// Remove a person link. Idempotent.
    pub async fn remove_person(
        &self,
        entity_id: &str,
        person_id: &str,
        role: PersonRole,
    ) -> Result<bool, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let rows_affected = conn
            .execute(
                "DELETE FROM person_links WHERE entity_id = ? AND person_id = ? AND role = ?",
                (entity_id, person_id, role.to_string()),
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to delete link: {}", e)))?;
        Ok(rows_affected > 0)
    }

    /// All person links of one entity.
    pub async fn persons_of(&self, entity_id: &str) -> Result<Vec<PersonLink>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT entity_id, person_id, role FROM person_links
                 WHERE entity_id = ? ORDER BY rowid ASC",
                [entity_id],
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to query links: {}", e)))?;

        let mut links = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }

    /// Person links for a batch of entities in one query.
    pub async fn links_for_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<Vec<PersonLink>, ServiceError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; entity_ids.len()].join(", ");

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT entity_id, person_id, role FROM person_links
                     WHERE entity_id IN ({}) ORDER BY rowid ASC",
                    placeholders
                ),
                libsql::params_from_iter(entity_ids.to_vec()),
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to query links: {}", e)))?;

        let mut links = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }

    /// List person links across all entities, optionally scoped to one
    /// role.
    pub async fn list_links(
        &self,
        role: Option<PersonRole>,
    ) -> Result<Vec<PersonLink>, ServiceError> {
        let mut sql =
            "SELECT entity_id, person_id, role FROM person_links".to_string();
        let mut params: Vec<String> = Vec::new();
        if let Some(role) = role {
            sql.push_str(" WHERE role = ?");
            params.push(role.to_string());
        }
        sql.push_str(" ORDER BY rowid ASC");

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to list links: {}", e)))?;

        let mut links = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }

    /// Entities a person is linked to, optionally scoped to one role.
    /// Joined in SQL; orphaned links (deleted entity) drop out of the
    /// join naturally.
    pub async fn entities_of(
        &self,
        person_id: &str,
        role: Option<PersonRole>,
    ) -> Result<Vec<Entity>, ServiceError> {
        let mut sql = format!(
            "SELECT {} FROM entities e
             JOIN person_links pl ON pl.entity_id = e.id
             WHERE pl.person_id = ?",
            entity_columns_qualified("e")
        );
        let mut params: Vec<String> = vec![person_id.to_string()];
        if let Some(role) = role {
            sql.push_str(" AND pl.role = ?");
            params.push(role.to_string());
        }
        sql.push_str(" ORDER BY e.rowid ASC");

        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to join entities: {}", e)))?;

        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            entities.push(row_to_entity(&row)?);
        }
        Ok(entities)
    }

    // =====================================================================
    // Tasks
    // =====================================================================

    /// Create a task.
    pub async fn create_task(&self, mut task: Task) -> Result<Task, ServiceError> {
        if task.id.trim().is_empty() {
            task.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;
        task.validate()?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ),
            (
                task.id.clone(),
                task.entity_id.clone(),
                task.person_id.clone(),
                task.kind.to_string(),
                task.title.clone(),
                task.status.to_string(),
                task.priority.as_i64(),
                task.due.as_ref().map(format_timestamp),
                task.payload.to_string(),
                format_timestamp(&task.created_at),
                format_timestamp(&task.updated_at),
            ),
        )
        .await
        .map_err(|e| ServiceError::query_failed(format!("Failed to insert task: {}", e)))?;

        Ok(task)
    }

    /// Fetch one task by id.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
                [id],
            )
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to query task: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial task update. Terminal statuses are immutable
    /// endpoints: any transition out of completed/cancelled is rejected.
    pub async fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task, ServiceError> {
        let current = self
            .get_task(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("task", id))?;

        if let Some(next_status) = update.status {
            if !current.can_transition_to(next_status) {
                return Err(ServiceError::invalid_update(format!(
                    "Task {} is {} and cannot transition to {}",
                    id, current.status, next_status
                )));
            }
        }

        let mut updated = Task {
            title: update.title.unwrap_or_else(|| current.title.clone()),
            status: update.status.unwrap_or(current.status),
            priority: update.priority.unwrap_or(current.priority),
            due: match update.due {
                None => current.due,
                Some(new_due) => new_due,
            },
            payload: update.payload.unwrap_or_else(|| current.payload.clone()),
            updated_at: Utc::now(),
            ..current
        };
        if updated.updated_at < updated.created_at {
            updated.updated_at = updated.created_at;
        }
        updated.validate()?;

        let conn = self.db.connect_with_timeout().await?;
        conn.execute(
            "UPDATE tasks SET title = ?, status = ?, priority = ?, due = ?,
                payload = ?, updated_at = ?
             WHERE id = ?",
            (
                updated.title.clone(),
                updated.status.to_string(),
                updated.priority.as_i64(),
                updated.due.as_ref().map(format_timestamp),
                updated.payload.to_string(),
                format_timestamp(&updated.updated_at),
                id,
            ),
        )
        .await
        .map_err(|e| ServiceError::query_failed(format!("Failed to update task: {}", e)))?;

        Ok(updated)
    }

    /// Convenience wrapper for the common status-only transition.
    pub async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Result<Task, ServiceError> {
        self.update_task(
            id,
            TaskUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete a task. Idempotent.
    pub async fn delete_task(&self, id: &str) -> Result<bool, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let rows_affected = conn
            .execute("DELETE FROM tasks WHERE id = ?", [id])
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to delete task: {}", e)))?;
        Ok(rows_affected > 0)
    }

    /// Delete every task owned by one entity (explicit bulk primitive,
    /// never triggered automatically by entity deletion).
    pub async fn delete_tasks_for_entity(&self, entity_id: &str) -> Result<u64, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let rows_affected = conn
            .execute("DELETE FROM tasks WHERE entity_id = ?", [entity_id])
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to delete tasks: {}", e)))?;
        Ok(rows_affected)
    }

    /// List tasks across all entities, optionally scoped to one status.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Task>, ServiceError> {
        let mut sql = format!("SELECT {} FROM tasks", TASK_COLUMNS);
        let mut params: Vec<String> = Vec::new();
        if let Some(status) = status {
            sql.push_str(" WHERE status = ?");
            params.push(status.to_string());
        }
        sql.push(' ');
        sql.push_str(TASK_ORDER);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        self.query_tasks(&sql, params).await
    }

    /// Tasks owned by one entity.
    pub async fn tasks_of_entity(&self, entity_id: &str) -> Result<Vec<Task>, ServiceError> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE entity_id = ? {}",
                TASK_COLUMNS, TASK_ORDER
            ),
            vec![entity_id.to_string()],
        )
        .await
    }

    /// Tasks assigned to one person, optionally scoped to one status.
    pub async fn tasks_of_person(
        &self,
        person_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, ServiceError> {
        let mut sql = format!("SELECT {} FROM tasks WHERE person_id = ?", TASK_COLUMNS);
        let mut params: Vec<String> = vec![person_id.to_string()];
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            params.push(status.to_string());
        }
        sql.push(' ');
        sql.push_str(TASK_ORDER);
        self.query_tasks(&sql, params).await
    }

    /// Pending tasks whose due time has passed.
    pub async fn overdue_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        let now = format_timestamp(&Utc::now());
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks
                 WHERE status = 'pending' AND due IS NOT NULL AND due < ? {}",
                TASK_COLUMNS, TASK_ORDER
            ),
            vec![now],
        )
        .await
    }

    /// Pending tasks due within `[now, now + within_hours]`.
    pub async fn due_soon(&self, within_hours: i64) -> Result<Vec<Task>, ServiceError> {
        let now = Utc::now();
        let until = now + Duration::hours(within_hours);
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks
                 WHERE status = 'pending' AND due IS NOT NULL AND due >= ? AND due <= ? {}",
                TASK_COLUMNS, TASK_ORDER
            ),
            vec![format_timestamp(&now), format_timestamp(&until)],
        )
        .await
    }

    /// Create the standard follow-up tasks for an order in one call.
    /// Partial completion is allowed and enumerated in the outcome.
    pub async fn create_order_tasks(
        &self,
        entity_id: &str,
        person_id: &str,
        kinds: &[crate::models::TaskKind],
    ) -> Result<BulkOutcome<Task>, ServiceError> {
        let mut outcome = BulkOutcome::new();
        for kind in kinds {
            let task = Task::new(entity_id, person_id, *kind, "");
            match self.create_task(task).await {
                Ok(created) => outcome.succeeded.push(created),
                Err(e) => outcome.failed.push(BulkFailure {
                    item: kind.to_string(),
                    error: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn query_tasks(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Vec<Task>, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| ServiceError::query_failed(format!("Failed to query tasks: {}", e)))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    // =====================================================================
    // Statistics
    // =====================================================================

    /// Aggregate counts over the current committed state. Computed fresh
    /// on every call - never cached - so the numbers always reflect the
    /// latest mutation.
    pub async fn stats(&self) -> Result<StoreStats, ServiceError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut stats = StoreStats {
            total_entities: self.count(&conn, "SELECT COUNT(*) FROM entities").await?,
            total_tasks: self.count(&conn, "SELECT COUNT(*) FROM tasks").await?,
            total_links: self
                .count(&conn, "SELECT COUNT(*) FROM person_links")
                .await?,
            ..Default::default()
        };

        stats.entities_by_status = self
            .grouped_counts(&conn, "SELECT status, COUNT(*) FROM entities GROUP BY status")
            .await?;
        stats.entities_by_kind = self
            .grouped_counts(&conn, "SELECT kind, COUNT(*) FROM entities GROUP BY kind")
            .await?;
        stats.tasks_by_status = self
            .grouped_counts(&conn, "SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .await?;
        stats.links_by_role = self
            .grouped_counts(&conn, "SELECT role, COUNT(*) FROM person_links GROUP BY role")
            .await?;

        Ok(stats)
    }

    async fn count(
        &self,
        conn: &libsql::Connection,
        sql: &str,
    ) -> Result<u64, ServiceError> {
        let mut rows = conn
            .query(sql, ())
            .await
            .map_err(|e| ServiceError::query_failed(format!("Count query failed: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
            .ok_or_else(|| ServiceError::query_failed("COUNT returned no row"))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| ServiceError::query_failed(format!("Failed to get count: {}", e)))?;
        Ok(count as u64)
    }

    async fn grouped_counts(
        &self,
        conn: &libsql::Connection,
        sql: &str,
    ) -> Result<HashMap<String, u64>, ServiceError> {
        let mut rows = conn
            .query(sql, ())
            .await
            .map_err(|e| ServiceError::query_failed(format!("Group query failed: {}", e)))?;

        let mut counts = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ServiceError::query_failed(format!("Row fetch failed: {}", e)))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| ServiceError::query_failed(format!("Failed to get key: {}", e)))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| ServiceError::query_failed(format!("Failed to get count: {}", e)))?;
            counts.insert(key, count as u64);
        }
        Ok(counts)
    }

    // =====================================================================
    // Indexing pipeline
    // =====================================================================

    /// Re-chunk and re-embed one entity's text, then swap the indexed
    /// rows. Caller must hold the entity's writer lock.
    ///
    /// Every chunk is embedded before any existing row is deleted: a
    /// failed embed leaves the prior indexed state untouched.
    async fn reindex_locked(&self, entity: &Entity) -> Result<(), ServiceError> {
        let text = entity.index_text();
        let chunks = self.chunker.split(&text);

        let embedder = self.index.embedder();
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            vectors.push(embedder.embed_document(chunk).await?);
        }

        self.index.delete_for_entity(&entity.id).await?;

        let total = chunks.len();
        for (i, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            let metadata = json!({
                "entity_id": entity.id,
                "kind": entity.kind.to_string(),
                "chunk_index": i,
                "total_chunks": total,
            });
            self.index.add(vector, metadata, chunk).await?;
        }

        tracing::debug!(
            entity_id = %entity.id,
            chunks = total,
            "Entity reindexed"
        );
        Ok(())
    }

    /// Re-embed an entity by id, taking the writer lock. Used by
    /// explicit resync flows.
    pub async fn reindex_entity(&self, id: &str) -> Result<(), ServiceError> {
        let lock = self.write_lock(id).await;
        let _guard = lock.lock().await;

        let entity = self
            .get_entity(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("entity", id))?;
        self.reindex_locked(&entity).await
    }

    /// Rebuild the index for every entity. Failures are logged and
    /// skipped so one broken entity never blocks the rest; returns the
    /// number successfully reindexed.
    pub async fn reindex_all(&self) -> Result<usize, ServiceError> {
        let entities = self
            .list_entities(
                &EntityFilter {
                    include_structural: true,
                    ..Default::default()
                },
                None,
            )
            .await?;

        let mut reindexed = 0;
        for entity in entities {
            if let Err(e) = self.reindex_entity(&entity.id).await {
                tracing::error!(entity_id = %entity.id, "Failed to reindex: {}", e);
                continue;
            }
            reindexed += 1;
        }
        Ok(reindexed)
    }
}

// Row conversion helpers

fn entity_columns_qualified(alias: &str) -> String {
    ENTITY_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_entity(row: &libsql::Row) -> Result<Entity, ServiceError> {
    let id: String = row
        .get(0)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get id: {}", e)))?;
    let kind_raw: String = row
        .get(1)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get kind: {}", e)))?;
    let title: String = row
        .get(2)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get title: {}", e)))?;
    let value: f64 = row
        .get(3)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get value: {}", e)))?;
    let quantity: i64 = row
        .get(4)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get quantity: {}", e)))?;
    let location: Option<String> = row
        .get(5)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get location: {}", e)))?;
    let status_raw: String = row
        .get(6)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get status: {}", e)))?;
    let payload_raw: String = row
        .get(7)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get payload: {}", e)))?;
    let created_raw: String = row
        .get(8)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get created_at: {}", e)))?;
    let updated_raw: String = row
        .get(9)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get updated_at: {}", e)))?;

    let kind: EntityKind = kind_raw.parse()?;
    let status: EntityStatus = status_raw.parse()?;

    Ok(Entity {
        id,
        kind,
        title,
        payload: EntityPayload::parse(&payload_raw),
        value,
        quantity,
        location,
        status,
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
        similarity: None,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, ServiceError> {
    let id: String = row
        .get(0)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get id: {}", e)))?;
    let entity_id: String = row
        .get(1)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get entity_id: {}", e)))?;
    let person_id: String = row
        .get(2)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get person_id: {}", e)))?;
    let kind_raw: String = row
        .get(3)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get kind: {}", e)))?;
    let title: String = row
        .get(4)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get title: {}", e)))?;
    let status_raw: String = row
        .get(5)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get status: {}", e)))?;
    let priority_raw: i64 = row
        .get(6)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get priority: {}", e)))?;
    let due_raw: Option<String> = row
        .get(7)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get due: {}", e)))?;
    let payload_raw: String = row
        .get(8)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get payload: {}", e)))?;
    let created_raw: String = row
        .get(9)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get created_at: {}", e)))?;
    let updated_raw: String = row
        .get(10)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get updated_at: {}", e)))?;

    let due = match due_raw {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };

    Ok(Task {
        id,
        entity_id,
        person_id,
        kind: kind_raw.parse()?,
        title,
        status: status_raw.parse()?,
        priority: TaskPriority::from_i64(priority_raw)?,
        due,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::json!({})),
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

fn row_to_link(row: &libsql::Row) -> Result<PersonLink, ServiceError> {
    let entity_id: String = row
        .get(0)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get entity_id: {}", e)))?;
    let person_id: String = row
        .get(1)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get person_id: {}", e)))?;
    let role_raw: String = row
        .get(2)
        .map_err(|e| ServiceError::query_failed(format!("Failed to get role: {}", e)))?;

    Ok(PersonLink {
        entity_id,
        person_id,
        role: role_raw.parse()?,
    })
}
