//! SQLite 시도 저장소
//!
//! `ssh_attempts` 테이블에 한 시도당 한 행을 기록합니다. 자연 키는
//! `dedup_key` 컬럼의 UNIQUE 제약으로 강제하며, 쓰기는
//! `INSERT ... ON CONFLICT(dedup_key) DO NOTHING`입니다.
//!
//! rusqlite는 동기 API이므로 모든 쿼리는 `spawn_blocking`에서 실행합니다.
//! 데이터베이스가 잠겨 있으면 `busy_timeout`까지 기다린 뒤 재시도 가능한
//! [`StoreError::Query`]를 반환합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use sshwatch_core::pipeline::BoxFuture;
use sshwatch_core::types::{Attempt, AttemptStats};
use tracing::info;

use super::{AttemptStore, RecordOutcome};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ssh_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    pid INTEGER NOT NULL,
    ip_address TEXT NOT NULL,
    username TEXT,
    success INTEGER NOT NULL,
    failure_reason TEXT,
    port INTEGER,
    ssh_version TEXT,
    country TEXT,
    city TEXT,
    isp TEXT,
    raw_log_line TEXT,
    dedup_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_ip ON ssh_attempts(ip_address);
CREATE INDEX IF NOT EXISTS idx_timestamp ON ssh_attempts(timestamp);
CREATE INDEX IF NOT EXISTS idx_success ON ssh_attempts(success);
";

/// SQLite 저장소
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// 데이터베이스 파일을 열고 스키마를 준비합니다. 상위 디렉토리가 없으면 생성합니다.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("open {}: {e}", path.display())))?;
        Self::init(conn, busy_timeout, path.to_path_buf())
    }

    /// 메모리 데이터베이스를 엽니다.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn, Duration::from_secs(1), PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, busy_timeout: Duration, path: PathBuf) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Connection(format!("schema init failed: {e}")))?;

        info!(path = %path.display(), "attempt database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// 데이터베이스 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {e}")))?
    }
}

fn insert(conn: &Connection, attempt: &Attempt) -> Result<RecordOutcome, StoreError> {
    let changed = conn.execute(
        "INSERT INTO ssh_attempts
            (timestamp, pid, ip_address, username, success, failure_reason, port,
             ssh_version, country, city, isp, raw_log_line, dedup_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(dedup_key) DO NOTHING",
        params![
            attempt.timestamp_string(),
            attempt.pid,
            attempt.ip_address.to_string(),
            attempt.username,
            attempt.success,
            attempt.failure_reason.map(|r| r.as_str()),
            attempt.port,
            attempt.ssh_version,
            attempt.location.country,
            attempt.location.city,
            attempt.location.isp,
            attempt.raw_log_line,
            attempt.dedup_key(),
        ],
    )?;

    Ok(if changed == 0 {
        RecordOutcome::Duplicate
    } else {
        RecordOutcome::Inserted
    })
}

fn query_stats(conn: &Connection, cutoff: &str) -> Result<AttemptStats, StoreError> {
    let (total, successful, unique_ips, last_hour): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(success), 0),
                COUNT(DISTINCT ip_address),
                COALESCE(SUM(CASE WHEN timestamp > ?1 THEN 1 ELSE 0 END), 0)
         FROM ssh_attempts",
        params![cutoff],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let total = total.max(0) as u64;
    let successful = successful.max(0) as u64;
    Ok(AttemptStats {
        total,
        successful,
        failed: total.saturating_sub(successful),
        unique_ips: unique_ips.max(0) as u64,
        last_hour: last_hour.max(0) as u64,
    })
}

impl AttemptStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn record<'a>(&'a self, attempt: &'a Attempt) -> BoxFuture<'a, Result<RecordOutcome, StoreError>> {
        let attempt = attempt.clone();
        Box::pin(self.with_conn(move |conn| insert(conn, &attempt)))
    }

    fn stats(&self) -> BoxFuture<'_, Result<AttemptStats, StoreError>> {
        // timestamp 컬럼과 같은 형식이므로 문자열 비교가 시간 순서와 일치
        let cutoff = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Micros, true);
        Box::pin(self.with_conn(move |conn| query_stats(conn, &cutoff)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sshwatch_core::types::{FailureReason, GeoLocation};

    fn attempt(pid: u32, username: Option<&str>) -> Attempt {
        Attempt {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            pid,
            ip_address: "203.0.113.7".parse().unwrap(),
            username: username.map(str::to_owned),
            success: false,
            failure_reason: Some(FailureReason::InvalidPassword),
            port: Some(51515),
            ssh_version: Some("SSH2".to_owned()),
            location: GeoLocation::unknown(),
            raw_log_line: "Failed password for root from 203.0.113.7 port 51515 ssh2".to_owned(),
        }
    }

    #[tokio::test]
    async fn duplicate_key_is_ignored() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.record(&attempt(1, Some("root"))).await.unwrap(), RecordOutcome::Inserted);
        assert_eq!(store.record(&attempt(1, Some("root"))).await.unwrap(), RecordOutcome::Duplicate);
        assert_eq!(store.record(&attempt(2, Some("root"))).await.unwrap(), RecordOutcome::Inserted);
        assert_eq!(store.stats().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn null_username_does_not_defeat_uniqueness() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record(&attempt(1, None)).await.unwrap();
        assert_eq!(store.record(&attempt(1, None)).await.unwrap(), RecordOutcome::Duplicate);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn stores_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut a = attempt(9, Some("admin"));
        a.location = GeoLocation {
            country: "DE".to_owned(),
            city: "Berlin".to_owned(),
            isp: "AS3320".to_owned(),
        };
        store.record(&a).await.unwrap();

        let conn = Arc::clone(&store.conn);
        let row: (String, String, Option<String>, String, i64) = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT timestamp, ip_address, failure_reason, country, port FROM ssh_attempts",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap()
        })
        .await
        .unwrap();

        assert_eq!(row.0, "2024-01-15T12:00:00.000000Z");
        assert_eq!(row.1, "203.0.113.7");
        assert_eq!(row.2.as_deref(), Some("invalid_password"));
        assert_eq!(row.3, "DE");
        assert_eq!(row.4, 51515);
    }

    #[tokio::test]
    async fn stats_window_uses_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut recent = attempt(1, Some("root"));
        recent.timestamp = Utc::now();
        recent.success = true;
        recent.failure_reason = None;
        store.record(&recent).await.unwrap();
        store.record(&attempt(2, Some("root"))).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            AttemptStats {
                total: 2,
                successful: 1,
                failed: 1,
                unique_ips: 1,
                last_hour: 1,
            }
        );
    }

    #[tokio::test]
    async fn reopening_file_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attempts.db");

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            store.record(&attempt(1, Some("root"))).await.unwrap();
        }

        let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.record(&attempt(1, Some("root"))).await.unwrap(), RecordOutcome::Duplicate);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn empty_database_stats_are_zero() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.stats().await.unwrap(), AttemptStats::default());
    }
}
