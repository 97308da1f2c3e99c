//! JSON-lines progress metrics for ingestion runs.
//!
//! One [`MetricsSnapshot`] per line, written by a background task while the
//! run is in progress and once more when it finishes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    bytes_read: AtomicU64,
}

/// Run-wide counters shared by the driver and the writer task.
#[derive(Clone)]
pub struct RunMetrics {
    counters: Arc<Counters>,
    table: Arc<RwLock<String>>,
    started: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    /// Table being loaded when the snapshot was taken
    pub table: String,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub rows_skipped: u64,
    pub bytes_read: u64,
    pub rows_per_sec: f64,
    pub mb_per_sec: f64,
    pub rss_mb: u64,
    pub elapsed_secs: f64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            table: Arc::new(RwLock::new(String::new())),
            started: Instant::now(),
        }
    }

    pub fn set_table(&self, name: &str) {
        if let Ok(mut table) = self.table.write() {
            *table = name.to_string();
        }
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.counters.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, rows: u64) {
        self.counters.skipped.fetch_add(rows, Ordering::Relaxed);
    }

    /// Count the rows of one finished batch.
    pub fn add_outcome(&self, inserted: u64, duplicates: u64, skipped: u64) {
        self.counters.inserted.fetch_add(inserted, Ordering::Relaxed);
        self.counters
            .duplicates
            .fetch_add(duplicates, Ordering::Relaxed);
        self.add_skipped(skipped);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let rows_inserted = self.counters.inserted.load(Ordering::Relaxed);
        let rows_duplicate = self.counters.duplicates.load(Ordering::Relaxed);
        let bytes_read = self.counters.bytes_read.load(Ordering::Relaxed);
        let rate = |amount: f64| {
            if elapsed_secs > 0.0 {
                amount / elapsed_secs
            } else {
                0.0
            }
        };

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            table: self
                .table
                .read()
                .map(|t| t.clone())
                .unwrap_or_default(),
            rows_inserted,
            rows_duplicate,
            rows_skipped: self.counters.skipped.load(Ordering::Relaxed),
            bytes_read,
            rows_per_sec: rate((rows_inserted + rows_duplicate) as f64),
            mb_per_sec: rate(bytes_read as f64 / 1_000_000.0),
            rss_mb: resident_memory_mb(),
            elapsed_secs,
        }
    }

    /// Append one snapshot line to `path` every `interval` until aborted.
    pub fn spawn_writer(&self, path: PathBuf, interval: Duration) -> JoinHandle<Result<()>> {
        let metrics = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                metrics.append_snapshot(&path).await?;
            }
        })
    }

    /// Append a single snapshot line to `path`.
    pub async fn append_snapshot(&self, path: &Path) -> Result<()> {
        let mut line = serde_json::to_string(&self.snapshot())?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open metrics file {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Resident set size from /proc/self/status; 0 where unavailable.
fn resident_memory_mb() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map_or(0, |kb| kb / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clones_share_counters() {
        let metrics = RunMetrics::new();
        let other = metrics.clone();

        metrics.add_outcome(100, 5, 2);
        other.add_outcome(50, 0, 0);
        other.add_skipped(1);
        metrics.add_bytes(2048);
        other.set_table("appeals");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.table, "appeals");
        assert_eq!(snapshot.rows_inserted, 150);
        assert_eq!(snapshot.rows_duplicate, 5);
        assert_eq!(snapshot.rows_skipped, 3);
        assert_eq!(snapshot.bytes_read, 2048);
        assert!(snapshot.rows_per_sec.is_finite());
        assert!(chrono::DateTime::parse_from_rfc3339(&snapshot.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_append_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let metrics = RunMetrics::new();
        metrics.set_table("demolitions");
        metrics.add_outcome(42, 0, 1);

        metrics.append_snapshot(&path).await.unwrap();
        metrics.append_snapshot(&path).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: MetricsSnapshot = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry.table, "demolitions");
        assert_eq!(entry.rows_inserted, 42);
        assert_eq!(entry.rows_skipped, 1);
    }

    #[tokio::test]
    async fn test_writer_emits_until_aborted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let metrics = RunMetrics::new();
        metrics.add_outcome(7, 0, 0);

        let handle = metrics.spawn_writer(path.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.lines().count() >= 1);
    }
}
