use super::{AuditError, AuditEvent};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;

/// Durable half of the audit sink: one append-only table keyed by run id
/// with an auto-increment primary key. No update or delete statement
/// exists anywhere in this module.
pub struct AuditStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: i64,
    pub run_id: String,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub data: String,
    pub created_at: String,
}

impl AuditStore {
    pub fn open(db_path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AuditError::CreateDir {
                path: parent.display().to_string(),
                source: err,
            })?;
        }
        let conn = Connection::open(db_path).map_err(|err| AuditError::Open {
            path: db_path.display().to_string(),
            source: err,
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_events_run
                ON audit_events (run_id, id);",
        )
        .map_err(sql_error)?;
        Ok(Self { conn })
    }

    pub fn insert(&self, event: &AuditEvent, created_at: &str) -> Result<i64, AuditError> {
        self.conn
            .execute(
                "INSERT INTO audit_events
                    (run_id, event_type, severity, message, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.run_id,
                    event.event_type,
                    event.severity.as_str(),
                    event.message,
                    event.data.to_string(),
                    created_at,
                ],
            )
            .map_err(sql_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<StoredEvent>, AuditError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, run_id, event_type, severity, message, data, created_at
                 FROM audit_events WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(sql_error)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(StoredEvent {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    event_type: row.get(2)?,
                    severity: row.get(3)?,
                    message: row.get(4)?,
                    data: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(sql_error)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(sql_error)?);
        }
        Ok(events)
    }
}

fn sql_error(source: rusqlite::Error) -> AuditError {
    AuditError::Sql { source }
}
