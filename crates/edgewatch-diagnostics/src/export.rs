//! Export snapshots and retention pruning.
//!
//! One timestamp-named JSON file per export cycle; optional gzip. A
//! snapshot's age is read from its file name, so pruning never has to
//! trust filesystem metadata and never touches files it did not create.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::Mutex;

use edgewatch_core::{AgentConfig, EdgewatchError, Result};

use crate::store::HealthStore;

const SNAPSHOT_PREFIX: &str = "health_";
const SNAPSHOT_TS_FORMAT: &str = "%Y%m%d-%H%M%S";

struct ExportState {
    /// Upper bound of the last successful export; the next cycle queries
    /// records from here.
    last_export: Option<DateTime<Utc>>,
}

/// Writes export snapshots and prunes expired ones.
///
/// Cycles are serialized on an internal lock, so overlapping export ticks
/// cannot produce overlapping snapshots.
pub struct HealthExporter {
    store: Arc<dyn HealthStore>,
    dir: PathBuf,
    compress: bool,
    retention_days: u64,
    state: Mutex<ExportState>,
}

impl HealthExporter {
    pub fn new(store: Arc<dyn HealthStore>, config: &AgentConfig) -> Self {
        Self {
            store,
            dir: config.health_export_dir.clone(),
            compress: config.compress_health_exports,
            retention_days: config.health_export_retention,
            state: Mutex::new(ExportState { last_export: None }),
        }
    }

    /// Run one export cycle: snapshot records since the last boundary,
    /// then prune expired snapshots.
    ///
    /// Pruning runs regardless of the export outcome — a failed write
    /// abandons the cycle's snapshot but never blocks retention, and
    /// pruning never deletes a file younger than the retention window.
    pub async fn run_cycle(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let since = state.last_export.unwrap_or(DateTime::UNIX_EPOCH);

        let export = self.write_snapshot(since, now);
        if let Ok(path) = &export {
            state.last_export = Some(now);
            tracing::info!("📦 Exported health data to {}", path.display());
        }

        self.prune_expired(now);

        export.map(|_| ())
    }

    /// Write the snapshot file for `[since, now]`. An empty batch still
    /// produces an empty-but-valid snapshot, preserving one file per
    /// export tick.
    fn write_snapshot(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<PathBuf> {
        let records = self.store.query_since(since)?;
        std::fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(snapshot_file_name(now));
        let body = serde_json::to_vec_pretty(&records)
            .map_err(|e| EdgewatchError::Export(format!("encode snapshot: {e}")))?;
        std::fs::write(&path, &body)?;

        if !self.compress {
            return Ok(path);
        }

        // The uncompressed copy is removed only after the gzip write is
        // confirmed on disk.
        let gz_path = self.dir.join(format!("{}.gz", snapshot_file_name(now)));
        let gz_file = std::fs::File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(gz_file, Compression::default());
        encoder.write_all(&body)?;
        encoder
            .finish()
            .map_err(|e| EdgewatchError::Export(format!("compress snapshot: {e}")))?;
        std::fs::remove_file(&path)?;
        Ok(gz_path)
    }

    /// Delete snapshots older than the retention window (whole days).
    /// Per-file errors are logged and skipped; files that do not match the
    /// snapshot naming pattern are never touched.
    fn prune_expired(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(self.retention_days as i64);
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("⚠️ Cannot scan export dir {}: {e}", self.dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(created) = snapshot_timestamp(&name.to_string_lossy()) else {
                continue;
            };
            if created >= cutoff {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => tracing::info!(
                    "🗑️ Pruned expired export {} (created {created})",
                    entry.path().display()
                ),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to prune {}: {e}", entry.path().display())
                }
            }
        }
    }

    /// Export directory this exporter writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `health_20260807-153000.json` for the given timestamp.
pub fn snapshot_file_name(at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}.json", at.format(SNAPSHOT_TS_FORMAT))
}

/// Parse the creation time back out of a snapshot file name. Returns
/// `None` for anything that is not a snapshot this module wrote.
pub fn snapshot_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(".json")
        .or_else(|| {
            file_name
                .strip_prefix(SNAPSHOT_PREFIX)?
                .strip_suffix(".json.gz")
        })?;
    NaiveDateTime::parse_from_str(stem, SNAPSHOT_TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{HealthRecord, HealthSnapshot};
    use crate::store::{HealthStore, MemoryHealthStore};
    use std::io::Read;

    fn test_config(dir: &Path, compress: bool) -> AgentConfig {
        AgentConfig {
            health_export_dir: dir.to_path_buf(),
            compress_health_exports: compress,
            health_export_retention: 7,
            ..AgentConfig::default()
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edgewatch-test-export-{tag}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record_now() -> HealthRecord {
        HealthRecord::from_snapshot(
            Utc::now(),
            HealthSnapshot {
                network_ok: true,
                ..HealthSnapshot::default()
            },
        )
    }

    #[tokio::test]
    async fn empty_store_writes_empty_but_valid_snapshot() {
        let dir = scratch_dir("empty");
        let store = Arc::new(MemoryHealthStore::new());
        let exporter = HealthExporter::new(store, &test_config(&dir, false));

        exporter.run_cycle().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let body = std::fs::read_to_string(files[0].path()).unwrap();
        let parsed: Vec<HealthRecord> = serde_json::from_str(&body).unwrap();
        assert!(parsed.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn snapshot_contains_only_records_since_last_export() {
        let dir = scratch_dir("incremental");
        let store = Arc::new(MemoryHealthStore::new());
        let exporter = HealthExporter::new(Arc::clone(&store) as Arc<dyn HealthStore>, &test_config(&dir, false));

        store.append(&record_now()).unwrap();
        store.append(&record_now()).unwrap();
        exporter.run_cycle().await.unwrap();

        // Remove the first snapshot so the second is the only file left.
        for entry in std::fs::read_dir(&dir).unwrap().flatten() {
            std::fs::remove_file(entry.path()).unwrap();
        }

        // One newer record; the next cycle must not re-export the first two.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        store.append(&record_now()).unwrap();
        exporter.run_cycle().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let body = std::fs::read_to_string(files[0].path()).unwrap();
        let parsed: Vec<HealthRecord> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn compression_replaces_plain_file() {
        let dir = scratch_dir("gzip");
        let store = Arc::new(MemoryHealthStore::new());
        store.append(&record_now()).unwrap();
        let exporter =
            HealthExporter::new(Arc::clone(&store) as Arc<dyn HealthStore>, &test_config(&dir, true));

        exporter.run_cycle().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].path();
        assert!(path.to_string_lossy().ends_with(".json.gz"));

        let mut decoder = flate2::read::GzDecoder::new(std::fs::File::open(&path).unwrap());
        let mut body = String::new();
        decoder.read_to_string(&mut body).unwrap();
        let parsed: Vec<HealthRecord> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn retention_prunes_old_keeps_young_and_foreign_files() {
        let dir = scratch_dir("retention");
        let store = Arc::new(MemoryHealthStore::new());
        let exporter = HealthExporter::new(store, &test_config(&dir, false));

        let now = Utc::now();
        let old = dir.join(snapshot_file_name(now - Duration::days(8)));
        let young = dir.join(snapshot_file_name(now - Duration::days(6)));
        let foreign = dir.join("notes.txt");
        std::fs::write(&old, "[]").unwrap();
        std::fs::write(&young, "[]").unwrap();
        std::fs::write(&foreign, "keep me").unwrap();

        exporter.run_cycle().await.unwrap();

        assert!(!old.exists(), "8-day-old snapshot must be pruned");
        assert!(young.exists(), "6-day-old snapshot must be retained");
        assert!(foreign.exists(), "non-snapshot files are never touched");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn snapshot_names_round_trip() {
        let at = Utc::now();
        let name = snapshot_file_name(at);
        let parsed = snapshot_timestamp(&name).unwrap();
        assert_eq!(parsed.timestamp(), at.timestamp());
        assert_eq!(
            snapshot_timestamp(&format!("{name}.gz")).unwrap().timestamp(),
            at.timestamp()
        );
        assert!(snapshot_timestamp("notes.txt").is_none());
        assert!(snapshot_timestamp("health_garbage.json").is_none());
    }
}
