use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // File metadata (populated by the ingestion pipeline, read-only here)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Content store: one row per extracted block of a file's page
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_contents (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text',
            page_number INTEGER NOT NULL,
            content_text TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Vector index: embeddings stored as little-endian f32 blobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_vectors (
            content_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (content_id) REFERENCES document_contents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Graph store: entities and relations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (file_id) REFERENCES files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_relations (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL,
            target_entity_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            FOREIGN KEY (source_entity_id) REFERENCES entities(id),
            FOREIGN KEY (target_entity_id) REFERENCES entities(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Sessions and messages
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            related_file_ids TEXT,
            search_results TEXT,
            sources TEXT,
            latency_ms INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Append-only search audit log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            query TEXT NOT NULL,
            search_type TEXT NOT NULL,
            file_ids TEXT,
            result_count INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contents_file_page ON document_contents(file_id, page_number)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_file_page ON entities(file_id, page_number)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relations_source ON entity_relations(source_entity_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relations_target ON entity_relations(target_entity_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON chat_sessions(user_id, status)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id, created_at)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
