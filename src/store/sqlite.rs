use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{PushedAuthorizationRequest, PushedRequestStore, StoreError};

/// SQLite-backed pushed request store.
///
/// Consumption is a single `DELETE … RETURNING`, so two racing callers can
/// never both read the same record.
pub struct SqlitePushedRequestStore {
    db: Mutex<Connection>,
}

impl SqlitePushedRequestStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pushed_requests (
                token       TEXT    PRIMARY KEY,
                client_id   TEXT    NOT NULL,
                parameters  TEXT    NOT NULL,
                issued_at   INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pushed_expires ON pushed_requests(expires_at);
            ",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn to_record(
    (token, client_id, parameters, issued_at, expires_at): (String, String, String, i64, i64),
) -> Result<PushedAuthorizationRequest, StoreError> {
    Ok(PushedAuthorizationRequest {
        token,
        client_id,
        parameters: serde_json::from_str(&parameters)?,
        issued_at: from_millis(issued_at)?,
        expires_at: from_millis(expires_at)?,
    })
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("bad timestamp {}", millis)))
}

impl PushedRequestStore for SqlitePushedRequestStore {
    fn create(&self, request: PushedAuthorizationRequest) -> Result<(), StoreError> {
        let parameters = serde_json::to_string(&request.parameters)?;
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let inserted = conn.execute(
            "INSERT INTO pushed_requests (token, client_id, parameters, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.token,
                request.client_id,
                parameters,
                request.issued_at.timestamp_millis(),
                request.expires_at.timestamp_millis(),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                "SELECT token, client_id, parameters, issued_at, expires_at
                 FROM pushed_requests WHERE token = ?1 AND expires_at > ?2",
                params![token, Utc::now().timestamp_millis()],
                from_row,
            )
            .optional()?;
        row.map(to_record).transpose()
    }

    fn consume(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                "DELETE FROM pushed_requests WHERE token = ?1 AND expires_at > ?2
                 RETURNING token, client_id, parameters, issued_at, expires_at",
                params![token, Utc::now().timestamp_millis()],
                from_row,
            )
            .optional()?;
        row.map(to_record).transpose()
    }

    fn sweep_expired(&self) -> Result<usize, StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let removed = conn.execute(
            "DELETE FROM pushed_requests WHERE expires_at <= ?1",
            params![Utc::now().timestamp_millis()],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;

    #[test]
    fn shared_behaviour() {
        test_support::exercise(&SqlitePushedRequestStore::open_in_memory().unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.db");

        let record = test_support::record("durable", 90);
        {
            let store = SqlitePushedRequestStore::open(&path).unwrap();
            store.create(record.clone()).unwrap();
        }

        let store = SqlitePushedRequestStore::open(&path).unwrap();
        let loaded = store.consume("durable").unwrap().unwrap();
        assert_eq!(loaded.parameters, record.parameters);
        assert_eq!(loaded.expires_at.timestamp_millis(), record.expires_at.timestamp_millis());
        assert!(store.consume("durable").unwrap().is_none());
    }
}
