//! Idempotent schema setup for the SQLite-backed stores.

use sqlx::SqlitePool;

/// Tables for the indexed vector store.
pub async fn migrate_index(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Category is the predicate nearly every search carries.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_category \
         ON documents(json_extract(metadata_json, '$.category'))",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_user_id \
         ON documents(json_extract(metadata_json, '$.user_id'))",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Table for the conversation log.
pub async fn migrate_conversations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_query TEXT NOT NULL,
            response TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_session \
         ON conversations(session_id, timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
