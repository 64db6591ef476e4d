use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::config::MetadataConfig;

const DEFAULT_LOOKUP_QUERY: &str =
    "SELECT org, log_table, trace_table FROM tenant_metadata WHERE tenant = $1";

/// Per-tenant backend coordinates. Empty fields mean "use the global
/// default" and are overlaid by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantMetadata {
    pub org: String,
    pub log_table: String,
    pub trace_table: String,
}

/// Relational lookup of tenant metadata. `connect` returns `None` when
/// the oracle is disabled, in which case callers fall through to
/// defaults.
pub struct TenantCatalog {
    pool: PgPool,
    lookup_query: String,
}

impl TenantCatalog {
    pub async fn connect(cfg: &MetadataConfig) -> anyhow::Result<Option<Self>> {
        if !cfg.enabled {
            return Ok(None);
        }
        let dsn = cfg.dsn.trim();
        if dsn.is_empty() {
            anyhow::bail!("metadata dsn required");
        }

        let max_connections = if cfg.max_connections == 0 {
            5
        } else {
            cfg.max_connections
        };
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .context("connect metadata db")?;

        let lookup_query = if cfg.tenant_lookup_query.trim().is_empty() {
            DEFAULT_LOOKUP_QUERY.to_string()
        } else {
            cfg.tenant_lookup_query.trim().to_string()
        };

        Ok(Some(Self { pool, lookup_query }))
    }

    /// Returns `None` when the tenant has no metadata row; transport and
    /// decode failures surface as errors.
    pub async fn lookup(&self, tenant: &str) -> Result<Option<TenantMetadata>, sqlx::Error> {
        let Some(row) = sqlx::query(&self.lookup_query)
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let org: Option<String> = row.try_get(0)?;
        let log_table: Option<String> = row.try_get(1)?;
        let trace_table: Option<String> = row.try_get(2)?;
        Ok(Some(TenantMetadata {
            org: org.unwrap_or_default(),
            log_table: log_table.unwrap_or_default(),
            trace_table: trace_table.unwrap_or_default(),
        }))
    }
}
