use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use shared::types::{ScanKey, ScanRecord, StoredScan};
use super::{StorageError, UpsertOutcome};

/// Conditional upsert. The `WHERE` on the update arm is the freshness rule;
/// when it fails SQLite returns no row, which is how staleness is detected.
const UPSERT_SCAN: &str = r#"
    INSERT INTO scan_records (
        ip, port, service, observed_at, response,
        revision, first_ingested_at, last_ingested_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
    ON CONFLICT (ip, port, service) DO UPDATE SET
        observed_at = excluded.observed_at,
        response = excluded.response,
        revision = scan_records.revision + 1,
        last_ingested_at = excluded.last_ingested_at
    WHERE excluded.observed_at > scan_records.observed_at
    RETURNING revision
"#;

const SELECT_COLUMNS: &str = "SELECT ip, port, service, observed_at, response,
        revision, first_ingested_at, last_ingested_at
 FROM scan_records";

pub struct ScanDb {
    conn: Connection,
}

impl ScanDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // WAL lets readers run while one worker holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scan_records (
                ip                TEXT NOT NULL,
                port              INTEGER NOT NULL,
                service           TEXT NOT NULL,
                observed_at       INTEGER NOT NULL,
                response          TEXT NOT NULL,
                revision          INTEGER NOT NULL DEFAULT 1,
                first_ingested_at TEXT NOT NULL,
                last_ingested_at  TEXT NOT NULL,
                PRIMARY KEY (ip, port, service)
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Apply a record with last-write-wins on `observed_at`.
    pub fn upsert_scan(&mut self, record: &ScanRecord) -> Result<UpsertOutcome, StorageError> {
        let now = Utc::now().to_rfc3339();

        // IMMEDIATE takes the write lock up front so a concurrent writer waits on
        // busy_timeout instead of failing the read-to-write upgrade.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let revision: Option<i64> = tx
            .query_row(
                UPSERT_SCAN,
                params![
                    &record.address,
                    record.port,
                    &record.service,
                    record.observed_at,
                    &record.response,
                    &now,
                ],
                |row| row.get(0),
            )
            .optional()?;

        tx.commit()?;

        Ok(match revision {
            None => UpsertOutcome::IgnoredStale,
            Some(1) => UpsertOutcome::Inserted,
            Some(_) => UpsertOutcome::Updated,
        })
    }

    /// Get a single scan by its key
    pub fn get_scan(&self, key: &ScanKey) -> Result<Option<StoredScan>, StorageError> {
        let scan = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE ip = ?1 AND port = ?2 AND service = ?3"),
                params![&key.address, key.port, &key.service],
                Self::row_to_scan,
            )
            .optional()?;

        Ok(scan)
    }

    /// Get every scan for an address, ordered by port then service
    pub fn list_by_address(&self, address: &str) -> Result<Vec<StoredScan>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE ip = ?1 ORDER BY port, service"))?;

        let scans = stmt
            .query_map([address], Self::row_to_scan)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(scans)
    }

    fn row_to_scan(row: &rusqlite::Row) -> Result<StoredScan, rusqlite::Error> {
        let first_ingested_str: String = row.get(6)?;
        let last_ingested_str: String = row.get(7)?;

        let first_ingested_at = chrono::DateTime::parse_from_rfc3339(&first_ingested_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        let last_ingested_at = chrono::DateTime::parse_from_rfc3339(&last_ingested_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(StoredScan {
            address: row.get(0)?,
            port: row.get::<_, u16>(1)?,
            service: row.get(2)?,
            observed_at: row.get(3)?,
            response: row.get(4)?,
            revision: row.get(5)?,
            first_ingested_at,
            last_ingested_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> ScanDb {
        ScanDb::open(":memory:", Duration::from_secs(1)).unwrap()
    }

    fn record(observed_at: i64, response: &str) -> ScanRecord {
        ScanRecord {
            address: "1.1.1.42".to_string(),
            port: 8080,
            service: "HTTP".to_string(),
            observed_at,
            response: response.to_string(),
        }
    }

    #[test]
    fn test_insert_replay_update() {
        let mut db = open_memory();
        let initial = record(100, "initial");

        assert_eq!(db.upsert_scan(&initial).unwrap(), UpsertOutcome::Inserted);

        // Same timestamp is a replay
        assert_eq!(db.upsert_scan(&initial).unwrap(), UpsertOutcome::IgnoredStale);
        let stored = db.get_scan(&initial.key()).unwrap().unwrap();
        assert_eq!(stored.observed_at, 100);
        assert_eq!(stored.response, "initial");
        assert_eq!(stored.revision, 1);

        let newer = record(200, "updated");
        assert_eq!(db.upsert_scan(&newer).unwrap(), UpsertOutcome::Updated);
        let stored = db.get_scan(&newer.key()).unwrap().unwrap();
        assert_eq!(stored.observed_at, 200);
        assert_eq!(stored.response, "updated");
        assert_eq!(stored.revision, 2);
    }

    #[test]
    fn test_older_observation_does_not_clobber() {
        let mut db = open_memory();

        assert_eq!(db.upsert_scan(&record(200, "newer")).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(db.upsert_scan(&record(100, "older")).unwrap(), UpsertOutcome::IgnoredStale);

        let stored = db.get_scan(&record(0, "").key()).unwrap().unwrap();
        assert_eq!(stored.observed_at, 200);
        assert_eq!(stored.response, "newer");
    }

    #[test]
    fn test_stale_write_keeps_ingest_times() {
        let mut db = open_memory();

        db.upsert_scan(&record(100, "initial")).unwrap();
        let before = db.get_scan(&record(0, "").key()).unwrap().unwrap();

        db.upsert_scan(&record(50, "older")).unwrap();
        let after = db.get_scan(&record(0, "").key()).unwrap().unwrap();
        assert_eq!(before, after);

        db.upsert_scan(&record(300, "newest")).unwrap();
        let updated = db.get_scan(&record(0, "").key()).unwrap().unwrap();
        assert_eq!(updated.first_ingested_at, before.first_ingested_at);
        assert!(updated.last_ingested_at >= before.last_ingested_at);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut db = open_memory();

        let http = record(100, "http");
        let mut https = record(50, "https");
        https.port = 443;
        https.service = "HTTPS".to_string();

        assert_eq!(db.upsert_scan(&http).unwrap(), UpsertOutcome::Inserted);
        // Older timestamp but a different key
        assert_eq!(db.upsert_scan(&https).unwrap(), UpsertOutcome::Inserted);

        let scans = db.list_by_address("1.1.1.42").unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].port, 443);
        assert_eq!(scans[1].port, 8080);
    }

    #[test]
    fn test_get_missing_scan() {
        let db = open_memory();
        assert!(db.get_scan(&record(0, "").key()).unwrap().is_none());
        assert!(db.list_by_address("10.0.0.1").unwrap().is_empty());
    }
}
