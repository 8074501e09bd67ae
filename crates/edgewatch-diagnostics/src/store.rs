//! Health record persistence — SQLite-backed, with an in-memory variant
//! for tests and one-shot runs.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use edgewatch_core::{EdgewatchError, Result};

use crate::record::{HealthRecord, HealthStatus};

/// Append/query interface for health records.
///
/// Implementations must tolerate concurrent appenders and readers; the
/// monitor is the sole writer in this core, but exports query while polls
/// append.
pub trait HealthStore: Send + Sync {
    /// Append one record. Timestamps are expected to be non-decreasing
    /// across appends from a single agent.
    fn append(&self, record: &HealthRecord) -> Result<()>;
    /// All records with `timestamp >= since`, oldest first.
    fn query_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthRecord>>;
    /// Drop records older than `days` days.
    fn purge_older_than(&self, days: u64) -> Result<()>;
}

/// Timestamps are stored as fixed-width RFC 3339 (nine fractional digits)
/// so lexicographic order in SQL matches chronological order and the
/// round trip is lossless.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EdgewatchError::Persistence(format!("bad timestamp '{raw}': {e}")))
}

fn persist(e: rusqlite::Error) -> EdgewatchError {
    EdgewatchError::Persistence(e.to_string())
}

fn status_to_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
    }
}

fn status_from_str(raw: &str) -> Result<HealthStatus> {
    match raw {
        "healthy" => Ok(HealthStatus::Healthy),
        "degraded" => Ok(HealthStatus::Degraded),
        other => Err(EdgewatchError::Persistence(format!("bad status '{other}'"))),
    }
}

/// SQLite-backed health record store — survives restarts.
pub struct SqliteHealthStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteHealthStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(persist)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS health_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'healthy' or 'degraded'
                cpu_temp REAL,
                cpu_percent REAL NOT NULL,
                memory_percent REAL NOT NULL,
                disk_percent REAL NOT NULL,
                network_ok INTEGER NOT NULL,
                services TEXT NOT NULL,          -- JSON map name -> state
                note TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_health_records_timestamp
                ON health_records(timestamp);
            ",
        )
        .map_err(persist)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| EdgewatchError::Persistence("health store lock poisoned".into()))
    }
}

impl HealthStore for SqliteHealthStore {
    fn append(&self, record: &HealthRecord) -> Result<()> {
        let services = serde_json::to_string(&record.services)
            .map_err(|e| EdgewatchError::Persistence(format!("encode services: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO health_records
                (timestamp, status, cpu_temp, cpu_percent, memory_percent,
                 disk_percent, network_ok, services, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                encode_ts(record.timestamp),
                status_to_str(record.status),
                record.cpu_temp,
                record.cpu_percent,
                record.memory_percent,
                record.disk_percent,
                record.network_ok as i64,
                services,
                record.note,
            ],
        )
        .map_err(persist)?;
        Ok(())
    }

    fn query_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, status, cpu_temp, cpu_percent, memory_percent,
                        disk_percent, network_ok, services, note
                 FROM health_records
                 WHERE timestamp >= ?1
                 ORDER BY timestamp ASC",
            )
            .map_err(persist)?;
        let rows = stmt
            .query_map([encode_ts(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .map_err(persist)?;

        let mut records = Vec::new();
        for row in rows {
            let (ts, status, cpu_temp, cpu, mem, disk, net, services, note) =
                row.map_err(persist)?;
            records.push(HealthRecord {
                timestamp: decode_ts(&ts)?,
                status: status_from_str(&status)?,
                cpu_temp,
                cpu_percent: cpu,
                memory_percent: mem,
                disk_percent: disk,
                network_ok: net != 0,
                services: serde_json::from_str(&services).map_err(|e| {
                    EdgewatchError::Persistence(format!("bad services blob: {e}"))
                })?,
                note,
            });
        }
        Ok(records)
    }

    fn purge_older_than(&self, days: u64) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let conn = self.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM health_records WHERE timestamp < ?1",
                [encode_ts(cutoff)],
            )
            .map_err(persist)?;
        if purged > 0 {
            tracing::debug!("💾 Purged {purged} health records older than {days} days");
        }
        Ok(())
    }
}

/// In-memory store for tests and `--oneshot` runs.
#[derive(Default)]
pub struct MemoryHealthStore {
    records: Mutex<Vec<HealthRecord>>,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored, oldest first.
    pub fn all(&self) -> Vec<HealthRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl HealthStore for MemoryHealthStore {
    fn append(&self, record: &HealthRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| EdgewatchError::Persistence("memory store lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    fn query_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthRecord>> {
        Ok(self
            .records
            .lock()
            .map_err(|_| EdgewatchError::Persistence("memory store lock poisoned".into()))?
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect())
    }

    fn purge_older_than(&self, days: u64) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        self.records
            .lock()
            .map_err(|_| EdgewatchError::Persistence("memory store lock poisoned".into()))?
            .retain(|r| r.timestamp >= cutoff);
        Ok(())
    }
}
