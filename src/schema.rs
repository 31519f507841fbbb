//! Schema metadata for prompt building
//!
//! [`SchemaSource`] fetches table, column, foreign-key and materialized-view
//! metadata for the application schema. [`SchemaCache`] renders it once into
//! the text block the system prompt embeds and keeps it until
//! [`SchemaCache::invalidate`] is called (after a migration, say).

use crate::error::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Schema whose objects are described to the model
pub const APPLICATION_SCHEMA: &str = "public";

const SCHEMA_HEADER: &str = "-- Database Schema for Cloud Account & Identity Intelligence\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub table_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

/// Everything the prompt needs to know about the application schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    /// Base tables and views, sorted by name
    pub tables: Vec<String>,

    /// Columns in ordinal order within each table
    pub columns: Vec<ColumnInfo>,

    pub foreign_keys: Vec<ForeignKeyInfo>,

    /// Materialized views are not listed in information_schema.tables
    pub materialized_views: Vec<String>,
}

/// Where schema metadata comes from
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load(&self) -> Result<SchemaMetadata, DatabaseError>;
}

/// Reads metadata from information_schema and pg_matviews
///
/// Runs outside any tenant context: it only touches catalog views, never
/// tenant rows.
#[derive(Clone)]
pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// information_schema columns are domain types; cast so they decode as TEXT
const TABLES_QUERY: &str = "\
    SELECT CAST(table_name AS TEXT) \
    FROM information_schema.tables \
    WHERE table_schema = $1 AND table_type IN ('BASE TABLE', 'VIEW') \
    ORDER BY table_name";

const COLUMNS_QUERY: &str = "\
    SELECT CAST(table_name AS TEXT), CAST(column_name AS TEXT), CAST(data_type AS TEXT), \
           CAST(is_nullable AS TEXT), \
           col_description(format('%I.%I', table_schema, table_name)::regclass, \
                           CAST(ordinal_position AS INT)) \
    FROM information_schema.columns \
    WHERE table_schema = $1 \
    ORDER BY table_name, ordinal_position";

const FOREIGN_KEYS_QUERY: &str = "\
    SELECT CAST(tc.table_name AS TEXT), CAST(kcu.column_name AS TEXT), \
           CAST(ccu.table_name AS TEXT), CAST(ccu.column_name AS TEXT) \
    FROM information_schema.table_constraints AS tc \
    JOIN information_schema.key_column_usage AS kcu \
      ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
    JOIN information_schema.constraint_column_usage AS ccu \
      ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 \
    ORDER BY tc.table_name, kcu.column_name";

const MATERIALIZED_VIEWS_QUERY: &str = "\
    SELECT CAST(matviewname AS TEXT) \
    FROM pg_matviews \
    WHERE schemaname = $1 \
    ORDER BY matviewname";

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn load(&self) -> Result<SchemaMetadata, DatabaseError> {
        let tables: Vec<(String,)> = sqlx::query_as(TABLES_QUERY)
            .bind(APPLICATION_SCHEMA)
            .fetch_all(&self.pool)
            .await?;

        let columns: Vec<(String, String, String, String, Option<String>)> =
            sqlx::query_as(COLUMNS_QUERY)
                .bind(APPLICATION_SCHEMA)
                .fetch_all(&self.pool)
                .await?;

        let foreign_keys: Vec<(String, String, String, String)> = sqlx::query_as(FOREIGN_KEYS_QUERY)
            .bind(APPLICATION_SCHEMA)
            .fetch_all(&self.pool)
            .await?;

        let materialized_views: Vec<(String,)> = sqlx::query_as(MATERIALIZED_VIEWS_QUERY)
            .bind(APPLICATION_SCHEMA)
            .fetch_all(&self.pool)
            .await?;

        log::debug!(
            "Loaded schema metadata: {} tables, {} columns, {} foreign keys, {} materialized views",
            tables.len(),
            columns.len(),
            foreign_keys.len(),
            materialized_views.len()
        );

        Ok(SchemaMetadata {
            tables: tables.into_iter().map(|(name,)| name).collect(),
            columns: columns
                .into_iter()
                .map(|(table_name, column_name, data_type, is_nullable, description)| ColumnInfo {
                    table_name,
                    column_name,
                    data_type,
                    nullable: is_nullable.eq_ignore_ascii_case("YES"),
                    description,
                })
                .collect(),
            foreign_keys: foreign_keys
                .into_iter()
                .map(
                    |(table_name, column_name, foreign_table_name, foreign_column_name)| ForeignKeyInfo {
                        table_name,
                        column_name,
                        foreign_table_name,
                        foreign_column_name,
                    },
                )
                .collect(),
            materialized_views: materialized_views.into_iter().map(|(name,)| name).collect(),
        })
    }
}

/// Render metadata as the SQL-comment block embedded in the system prompt
///
/// ```text
/// -- Table: person
/// --   id uuid NOT NULL
/// --   manager_id uuid NULL -- Line manager
/// --   FK: manager_id -> person(id)
/// ```
pub fn render_schema_context(meta: &SchemaMetadata) -> String {
    let mut columns_by_table: BTreeMap<&str, Vec<&ColumnInfo>> = BTreeMap::new();
    for column in &meta.columns {
        columns_by_table
            .entry(column.table_name.as_str())
            .or_default()
            .push(column);
    }

    let mut fks_by_table: BTreeMap<&str, Vec<&ForeignKeyInfo>> = BTreeMap::new();
    for fk in &meta.foreign_keys {
        fks_by_table.entry(fk.table_name.as_str()).or_default().push(fk);
    }

    let mut lines = vec![SCHEMA_HEADER.to_string()];

    for table in &meta.tables {
        lines.push(format!("-- Table: {}", table));
        for column in columns_by_table.get(table.as_str()).into_iter().flatten() {
            let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
            let description = column
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!(" -- {}", d))
                .unwrap_or_default();
            lines.push(format!(
                "--   {} {} {}{}",
                column.column_name, column.data_type, nullable, description
            ));
        }
        for fk in fks_by_table.get(table.as_str()).into_iter().flatten() {
            lines.push(format!(
                "--   FK: {} -> {}({})",
                fk.column_name, fk.foreign_table_name, fk.foreign_column_name
            ));
        }
        lines.push(String::new());
    }

    for view in &meta.materialized_views {
        lines.push(format!("-- Materialised View: {}", view));
        for column in columns_by_table.get(view.as_str()).into_iter().flatten() {
            lines.push(format!("--   {} {}", column.column_name, column.data_type));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Rendered schema context, loaded on first use and kept until invalidated
///
/// Concurrent callers during a cold start wait on the same load, so the
/// source is queried once per fill.
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    rendered: Mutex<Option<Arc<str>>>,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            rendered: Mutex::new(None),
        }
    }

    /// Cached context, loading and rendering it if the cache is empty
    ///
    /// A failed load leaves the cache empty so the next call retries.
    pub async fn get_or_load(&self) -> Result<Arc<str>, DatabaseError> {
        let mut slot = self.rendered.lock().await;
        if let Some(ref context) = *slot {
            return Ok(Arc::clone(context));
        }

        let meta = self.source.load().await?;
        let context: Arc<str> = Arc::from(render_schema_context(&meta));
        log::info!(
            "Schema context cached ({} tables, {} bytes)",
            meta.tables.len(),
            context.len()
        );
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Drop the cached context; the next [`get_or_load`](Self::get_or_load) reloads it
    pub async fn invalidate(&self) {
        let mut slot = self.rendered.lock().await;
        if slot.take().is_some() {
            log::info!("Schema context cache invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn column(table: &str, name: &str, data_type: &str, nullable: bool, description: Option<&str>) -> ColumnInfo {
        ColumnInfo {
            table_name: table.to_string(),
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            description: description.map(str::to_string),
        }
    }

    fn sample() -> SchemaMetadata {
        SchemaMetadata {
            tables: vec!["person".to_string(), "person_link".to_string()],
            columns: vec![
                column("person", "id", "uuid", false, None),
                column("person", "display_name", "text", true, Some("Preferred name")),
                column("person_link", "person_id", "uuid", false, None),
                column("mv_effective_access", "cloud_provider", "text", true, None),
            ],
            foreign_keys: vec![ForeignKeyInfo {
                table_name: "person_link".to_string(),
                column_name: "person_id".to_string(),
                foreign_table_name: "person".to_string(),
                foreign_column_name: "id".to_string(),
            }],
            materialized_views: vec!["mv_effective_access".to_string()],
        }
    }

    #[test]
    fn test_render_tables_columns_and_fks() {
        let rendered = render_schema_context(&sample());
        assert!(rendered.starts_with("-- Database Schema for Cloud Account & Identity Intelligence\n"));
        assert!(rendered.contains("-- Table: person\n--   id uuid NOT NULL\n"));
        assert!(rendered.contains("--   display_name text NULL -- Preferred name"));
        assert!(rendered.contains("--   FK: person_id -> person(id)"));
    }

    #[test]
    fn test_render_materialized_views_last() {
        let rendered = render_schema_context(&sample());
        let table_pos = rendered.find("-- Table: person_link");
        let view_pos = rendered.find("-- Materialised View: mv_effective_access");
        assert!(table_pos.is_some() && view_pos.is_some());
        assert!(table_pos < view_pos);
        assert!(rendered.contains("--   cloud_provider text\n"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(
            render_schema_context(&SchemaMetadata::default()),
            SCHEMA_HEADER
        );
    }

    struct CountingSource {
        loads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn load(&self) -> Result<SchemaMetadata, DatabaseError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DatabaseError::ConnectionError("down".to_string()));
            }
            Ok(sample())
        }
    }

    #[tokio::test]
    async fn test_cache_loads_once_until_invalidated() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            fail: false,
        });
        let cache = SchemaCache::new(source.clone());

        let first = cache.get_or_load().await;
        let second = cache.get_or_load().await;
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        cache.invalidate().await;
        assert!(cache.get_or_load().await.is_ok());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_does_not_keep_failures() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            fail: true,
        });
        let cache = SchemaCache::new(source.clone());
        assert!(cache.get_or_load().await.is_err());
        assert!(cache.get_or_load().await.is_err());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
