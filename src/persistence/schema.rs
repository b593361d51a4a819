//! Schema definition for the authoritative store.
//!
//! Each entity table stores the dual representation:
//! - `doc`: JSONB for queries, filters, and GIN containment indexes
//! - `doc_bytes`: canonical JSON bytes for zero-copy streaming reads
//!
//! `etag` is the SHA-256 of `doc_bytes` and is recomputed on every write.

use sqlx::PgPool;

use crate::core::error::{TitanError, TitanResult};
use crate::core::model::EntityKind;

/// Table name for an entity class.
pub fn table_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Aas => "aas",
        EntityKind::Submodel => "submodels",
        EntityKind::ConceptDescription => "concept_descriptions",
        EntityKind::AasDescriptor => "aas_descriptors",
        EntityKind::SubmodelDescriptor => "submodel_descriptors",
    }
}

/// Name of the extracted secondary column for an entity class.
pub fn secondary_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Aas | EntityKind::AasDescriptor => "global_asset_id",
        EntityKind::Submodel | EntityKind::SubmodelDescriptor => "semantic_id",
        EntityKind::ConceptDescription => "id_short",
    }
}

fn entity_table_ddl(kind: EntityKind) -> String {
    let table = table_name(kind);
    let secondary = secondary_column(kind);
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            identifier TEXT UNIQUE NOT NULL,
            identifier_b64 TEXT UNIQUE NOT NULL,
            {secondary} TEXT,
            doc JSONB NOT NULL,
            doc_bytes BYTEA NOT NULL,
            etag CHAR(64) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_doc_gin ON {table} USING gin (doc);
        CREATE INDEX IF NOT EXISTS idx_{table}_{secondary} ON {table} ({secondary});
        CREATE INDEX IF NOT EXISTS idx_{table}_page ON {table} (created_at, id);
        "#
    )
}

const BLOB_ASSETS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS blob_assets (
        id UUID PRIMARY KEY,
        submodel_identifier TEXT NOT NULL,
        id_short_path TEXT NOT NULL,
        storage_uri TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        sha256 CHAR(64) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_blob_assets_submodel_path
        ON blob_assets (submodel_identifier, id_short_path);
    CREATE INDEX IF NOT EXISTS idx_blob_assets_sha256 ON blob_assets (sha256);
"#;

/// Create all tables and indexes if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> TitanResult<()> {
    for kind in EntityKind::all() {
        run_batch(pool, &entity_table_ddl(kind)).await?;
    }
    run_batch(pool, BLOB_ASSETS_DDL).await?;
    tracing::info!("schema migration complete");
    Ok(())
}

async fn run_batch(pool: &PgPool, ddl: &str) -> TitanResult<()> {
    for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| TitanError::StoreUnavailable(format!("migration failed: {e}")))?;
    }
    Ok(())
}
