use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::util::{ensure_directory, now_utc_string};
use crate::view::{TRUST_RULESET_VERSION, VIEW_MODEL_VERSION, ViewModel};

pub const CACHE_SCHEMA_VERSION: &str = "1";

pub struct ViewCache {
    connection: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedView {
    pub fingerprint: String,
    pub created_at: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub total: i64,
    pub current_ruleset: i64,
    pub stale: i64,
}

impl ViewCache {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open view cache: {}", db_path.display()))?;
        configure_connection(&connection)?;
        Self::from_connection(connection)
    }

    pub fn from_connection(connection: Connection) -> Result<Self> {
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn load(&self, fingerprint: &str) -> Result<Option<CachedView>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT fingerprint, created_at, payload_json
                FROM view_models
                WHERE fingerprint = ?1
                  AND trust_ruleset_version = ?2
                  AND view_model_version = ?3
                ",
                params![fingerprint, TRUST_RULESET_VERSION, VIEW_MODEL_VERSION],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to query cached view model {fingerprint}"))?;

        let Some((fingerprint, created_at, payload_json)) = row else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&payload_json)
            .with_context(|| format!("failed to parse cached view model {fingerprint}"))?;

        Ok(Some(CachedView {
            fingerprint,
            created_at,
            payload,
        }))
    }

    pub fn store(&self, model: &ViewModel) -> Result<CachedView> {
        let payload = serde_json::to_value(model).context("failed to serialize view model")?;
        let payload_json = payload.to_string();
        let created_at = now_utc_string();

        self.connection
            .execute(
                "
                INSERT INTO view_models(
                  fingerprint, trust_ruleset_version, view_model_version,
                  governance_state, trust_score, created_at, payload_json
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(fingerprint) DO UPDATE SET
                  trust_ruleset_version=excluded.trust_ruleset_version,
                  view_model_version=excluded.view_model_version,
                  governance_state=excluded.governance_state,
                  trust_score=excluded.trust_score,
                  created_at=excluded.created_at,
                  payload_json=excluded.payload_json
                ",
                params![
                    model.fingerprint(),
                    model.trust_ruleset_version(),
                    model.view_model_version(),
                    payload
                        .pointer("/governance/state")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    model.trust().score,
                    created_at,
                    payload_json,
                ],
            )
            .with_context(|| format!("failed to store view model {}", model.fingerprint()))?;

        self.touch_metadata("cache_updated_at", &created_at)?;

        Ok(CachedView {
            fingerprint: model.fingerprint().to_string(),
            created_at,
            payload,
        })
    }

    pub fn counts(&self) -> Result<CacheCounts> {
        let total = query_count(&self.connection, "SELECT COUNT(*) FROM view_models", [])?;
        let current_ruleset = query_count(
            &self.connection,
            "SELECT COUNT(*) FROM view_models WHERE trust_ruleset_version = ?1 AND view_model_version = ?2",
            [TRUST_RULESET_VERSION, VIEW_MODEL_VERSION],
        )?;

        Ok(CacheCounts {
            total,
            current_ruleset,
            stale: total - current_ruleset,
        })
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        self.connection
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1 LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read cache metadata {key}"))
    }

    fn touch_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO metadata(key, value) VALUES(?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [key, value],
            )
            .with_context(|| format!("failed to update cache metadata {key}"))?;
        Ok(())
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS view_models (
              fingerprint TEXT PRIMARY KEY,
              trust_ruleset_version TEXT NOT NULL,
              view_model_version TEXT NOT NULL,
              governance_state TEXT NOT NULL,
              trust_score REAL NOT NULL,
              created_at TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_view_models_versions
              ON view_models(trust_ruleset_version, view_model_version);
            ",
        )
        .context("failed to initialize view cache schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('cache_schema_version', ?1)
         ON CONFLICT(key) DO NOTHING",
        [CACHE_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn query_count<P: rusqlite::Params>(connection: &Connection, sql: &str, params: P) -> Result<i64> {
    let count = connection
        .query_row(sql, params, |row| row.get(0))
        .with_context(|| format!("failed to count rows: {sql}"))?;
    Ok(count)
}
