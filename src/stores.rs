//! Store interfaces for the external knowledge backends.
//!
//! The content store, vector index, and graph store are externally-owned,
//! read-mostly resources. The traits here are the only surface the
//! retrieval pipeline sees; the SQLite implementations below model those
//! stores as local tables so the whole service runs against one database.
//!
//! The vector index follows the same approach as a brute-force scan over
//! BLOB-encoded embeddings with cosine similarity computed in Rust, sorted
//! and truncated to the requested limit.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::models::{ContentRecord, Entity, EntityRelation};

// ============ Traits ============

/// Read access to extracted document content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch content records by id. Missing ids are silently skipped.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<ContentRecord>>;

    /// Substring match over stored content text, scoped to a user's files
    /// and an optional file-id subset. Returns at most `limit` records.
    async fn search_by_user_and_text(
        &self,
        user_id: &str,
        pattern: &str,
        file_ids: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<ContentRecord>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentRecord>>;
}

/// Nearest-neighbor lookup over content embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` `(content_id, score)` pairs most similar to the
    /// query vector, optionally restricted to the given file ids. Scores are
    /// cosine similarities clamped to `[0, 1]`.
    async fn search(
        &self,
        vector: &[f32],
        limit: i64,
        file_filter: Option<&[String]>,
    ) -> Result<Vec<(String, f64)>>;
}

/// Read access to the entity/relation knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Entities whose name or value contains `substring`, scoped to the
    /// user's files. Returns at most `limit` entities.
    async fn find_entities(
        &self,
        user_id: &str,
        substring: &str,
        limit: i64,
    ) -> Result<Vec<Entity>>;

    /// Entities directly associated with the given `(file_id, page_number)`
    /// pairs.
    async fn entities_for_pages(&self, pages: &[(String, i64)]) -> Result<Vec<Entity>>;

    /// All relations where either endpoint is in `entity_ids`.
    async fn find_relations(&self, entity_ids: &[String]) -> Result<Vec<EntityRelation>>;

    /// Fetch entities by id. Missing ids are silently skipped.
    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>>;
}

// ============ SQLite content store ============

pub struct SqliteContentStore {
    pool: SqlitePool,
}

impl SqliteContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn content_from_row(row: &sqlx::sqlite::SqliteRow) -> ContentRecord {
    ContentRecord {
        id: row.get("id"),
        file_id: row.get("file_id"),
        file_name: row.get("file_name"),
        content_type: row.get("content_type"),
        page_number: row.get("page_number"),
        text: row.get("content_text"),
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<ContentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            r#"
            SELECT dc.id, dc.file_id, dc.content_type, dc.page_number, dc.content_text,
                   f.name AS file_name
            FROM document_contents dc
            JOIN files f ON f.id = dc.file_id
            WHERE dc.id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(content_from_row).collect())
    }

    async fn search_by_user_and_text(
        &self,
        user_id: &str,
        pattern: &str,
        file_ids: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<ContentRecord>> {
        let mut sql = String::from(
            r#"
            SELECT dc.id, dc.file_id, dc.content_type, dc.page_number, dc.content_text,
                   f.name AS file_name
            FROM document_contents dc
            JOIN files f ON f.id = dc.file_id
            WHERE f.user_id = ?
              AND dc.content_text LIKE ?
            "#,
        );

        if let Some(ids) = file_ids {
            if !ids.is_empty() {
                sql.push_str(&format!(
                    " AND dc.file_id IN ({})",
                    vec!["?"; ids.len()].join(",")
                ));
            }
        }
        sql.push_str(" ORDER BY dc.page_number LIMIT ?");

        let mut query = sqlx::query(&sql)
            .bind(user_id)
            .bind(format!("%{}%", pattern));
        if let Some(ids) = file_ids {
            if !ids.is_empty() {
                for id in ids {
                    query = query.bind(id);
                }
            }
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(content_from_row).collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT dc.id, dc.file_id, dc.content_type, dc.page_number, dc.content_text,
                   f.name AS file_name
            FROM document_contents dc
            JOIN files f ON f.id = dc.file_id
            WHERE dc.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(content_from_row))
    }
}

// ============ SQLite vector index ============

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn search(
        &self,
        vector: &[f32],
        limit: i64,
        file_filter: Option<&[String]>,
    ) -> Result<Vec<(String, f64)>> {
        let mut sql = String::from("SELECT content_id, file_id, embedding FROM content_vectors");
        if let Some(ids) = file_filter {
            if !ids.is_empty() {
                sql.push_str(&format!(
                    " WHERE file_id IN ({})",
                    vec!["?"; ids.len()].join(",")
                ));
            }
        }

        let mut query = sqlx::query(&sql);
        if let Some(ids) = file_filter {
            if !ids.is_empty() {
                for id in ids {
                    query = query.bind(id);
                }
            }
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut scored: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                // Clamp so vector scores are comparable with keyword scores.
                let similarity = cosine_similarity(vector, &stored).clamp(0.0, 1.0) as f64;
                (row.get("content_id"), similarity)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit as usize);

        Ok(scored)
    }
}

// ============ SQLite graph store ============

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> Entity {
    Entity {
        id: row.get("id"),
        file_id: row.get("file_id"),
        page_number: row.get("page_number"),
        name: row.get("name"),
        entity_type: row.get("entity_type"),
        value: row.get("value"),
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn find_entities(
        &self,
        user_id: &str,
        substring: &str,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        let pattern = format!("%{}%", substring);
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.file_id, e.page_number, e.name, e.entity_type, e.value
            FROM entities e
            JOIN files f ON f.id = e.file_id
            WHERE f.user_id = ?
              AND (e.name LIKE ? OR e.value LIKE ?)
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn entities_for_pages(&self, pages: &[(String, i64)]) -> Result<Vec<Entity>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let clauses = vec!["(file_id = ? AND page_number = ?)"; pages.len()].join(" OR ");
        let sql = format!(
            "SELECT DISTINCT id, file_id, page_number, name, entity_type, value \
             FROM entities WHERE {}",
            clauses
        );

        let mut query = sqlx::query(&sql);
        for (file_id, page) in pages {
            query = query.bind(file_id).bind(page);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn find_relations(&self, entity_ids: &[String]) -> Result<Vec<EntityRelation>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; entity_ids.len()].join(",");
        let sql = format!(
            "SELECT id, source_entity_id, target_entity_id, relation_type \
             FROM entity_relations \
             WHERE source_entity_id IN ({0}) OR target_entity_id IN ({0})",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in entity_ids {
            query = query.bind(id);
        }
        for id in entity_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| EntityRelation {
                id: row.get("id"),
                source_entity_id: row.get("source_entity_id"),
                target_entity_id: row.get("target_entity_id"),
                relation_type: row.get("relation_type"),
            })
            .collect())
    }

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, file_id, page_number, name, entity_type, value \
             FROM entities WHERE id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(entity_from_row).collect())
    }
}
