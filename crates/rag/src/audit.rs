use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use contract_miner_core::{MinerError, RedactionReport, Result};

use crate::explain::Explanation;

/// One fully-formed query lifecycle. Written exactly once, after the
/// pipeline has produced everything; a request that fails earlier leaves
/// no row behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub input_hash: String,
    pub prompt_template: String,
    pub prompt_text: String,
    pub retrieved_ids: Vec<String>,
    pub model_version: String,
    pub raw_response: String,
    pub filtered_response: String,
    pub confidence: f32,
    pub explanation: Option<Explanation>,
    pub redaction: RedactionReport,
}

impl AuditRecord {
    pub fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAudit {
    pub id: i64,
    pub record: AuditRecord,
}

/// Append-only store. There is deliberately no update or delete on this
/// type; compliance review depends on rows being immutable.
#[derive(Clone)]
pub struct AuditStore {
    path: PathBuf,
}

impl AuditStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| MinerError::Audit(e.to_string()))?;
        // writers queue instead of failing fast when a log is in flight
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| MinerError::Audit(e.to_string()))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS audits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audits_input_hash ON audits(input_hash);
            "#,
        )
        .map_err(|e| MinerError::Audit(e.to_string()))?;
        Ok(())
    }

    /// Appends one record and returns the store-assigned id. AUTOINCREMENT
    /// ids are unique and strictly increasing even under concurrent
    /// writers, and are never reused after a crash.
    pub fn log(&self, record: &AuditRecord) -> Result<i64> {
        let payload = serde_json::to_string(record)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO audits (ts, input_hash, payload) VALUES (?1, ?2, ?3)",
            params![record.ts, record.input_hash, payload],
        )
        .map_err(|e| MinerError::Audit(e.to_string()))?;
        let id = conn.last_insert_rowid();
        info!(audit_id = id, input_hash = %record.input_hash, "audit record written");
        Ok(id)
    }

    pub fn find_by_input_hash(&self, input_hash: &str) -> Result<Vec<StoredAudit>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, payload FROM audits WHERE input_hash = ?1 ORDER BY id")
            .map_err(|e| MinerError::Audit(e.to_string()))?;
        let mut rows = stmt
            .query([input_hash])
            .map_err(|e| MinerError::Audit(e.to_string()))?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(|e| MinerError::Audit(e.to_string()))? {
            let id: i64 = row.get(0).map_err(|e| MinerError::Audit(e.to_string()))?;
            let payload: String = row.get(1).map_err(|e| MinerError::Audit(e.to_string()))?;
            let record: AuditRecord = serde_json::from_str(&payload)?;
            results.push(StoredAudit { id, record });
        }
        Ok(results)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM audits", [], |row| row.get(0))
            .map_err(|e| MinerError::Audit(e.to_string()))
    }
}
