//! 시도 싱크 -- 완료된 시도를 저장소에 한 번 기록합니다.
//!
//! [`AttemptStore`]는 자연 키 기반의 멱등 upsert를 제공하는 저장소 인터페이스이고,
//! [`AttemptSink`]는 여기에 쓰기 타임아웃, 제한된 재시도, 지수 백오프를 더합니다.
//! 재시도가 모두 실패하면 시도는 로그로 남기고 버려지며, 파이프라인은 계속 동작합니다.
//!
//! # 저장소 구현
//! - [`SqliteStore`]: rusqlite 기반 영구 저장소
//! - [`MemoryStore`]: 테스트 및 dry-run용 인메모리 저장소

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use sshwatch_core::metrics as m;
use sshwatch_core::pipeline::BoxFuture;
use sshwatch_core::types::{Attempt, AttemptStats};
use tracing::{error, warn};

use crate::error::StoreError;

/// 단건 기록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// 새 행이 추가됨
    Inserted,
    /// 같은 자연 키가 이미 존재함
    Duplicate,
}

/// 시도 저장소 인터페이스
///
/// 같은 자연 키([`Attempt::dedup_key`])로 두 번 기록해도 행은 하나만 존재해야 합니다.
pub trait AttemptStore: Send + Sync {
    /// 저장소 이름 (로그용)
    fn name(&self) -> &'static str;

    /// 시도를 기록합니다.
    fn record<'a>(&'a self, attempt: &'a Attempt) -> BoxFuture<'a, Result<RecordOutcome, StoreError>>;

    /// 저장된 시도의 집계를 반환합니다.
    fn stats(&self) -> BoxFuture<'_, Result<AttemptStats, StoreError>>;
}

/// 싱크 설정
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// 쓰기 1회당 타임아웃
    pub write_timeout: Duration,
    /// 최초 시도 이후 최대 재시도 횟수
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간 (매 재시도마다 두 배)
    pub retry_backoff: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// 싱크 기록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// 새로 기록됨
    Recorded,
    /// 이미 기록된 시도
    Duplicate,
    /// 재시도 소진으로 버려짐
    Dropped,
}

/// 재시도/타임아웃을 갖춘 시도 싱크
pub struct AttemptSink {
    store: Arc<dyn AttemptStore>,
    config: SinkConfig,
    last_write_failed: AtomicBool,
}

impl AttemptSink {
    /// 새 싱크를 생성합니다.
    pub fn new(store: Arc<dyn AttemptStore>, config: SinkConfig) -> Self {
        Self {
            store,
            config,
            last_write_failed: AtomicBool::new(false),
        }
    }

    /// 시도를 기록합니다. 실패는 재시도하며, 소진되면 `Dropped`를 반환합니다.
    pub async fn record(&self, attempt: &Attempt) -> SinkOutcome {
        let mut backoff = self.config.retry_backoff;
        let mut last_error = None;

        for try_no in 0..=self.config.max_retries {
            if try_no > 0 {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }

            let result =
                match tokio::time::timeout(self.config.write_timeout, self.store.record(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.config.write_timeout)),
                };

            match result {
                Ok(RecordOutcome::Inserted) => {
                    self.last_write_failed.store(false, Ordering::Relaxed);
                    counter!(m::SINK_RECORDED_TOTAL).increment(1);
                    return SinkOutcome::Recorded;
                }
                Ok(RecordOutcome::Duplicate) => {
                    self.last_write_failed.store(false, Ordering::Relaxed);
                    counter!(m::SINK_DUPLICATES_TOTAL).increment(1);
                    return SinkOutcome::Duplicate;
                }
                Err(e) => {
                    if try_no < self.config.max_retries {
                        warn!(
                            store = self.store.name(),
                            attempt = try_no + 1,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "attempt write failed, retrying"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        self.last_write_failed.store(true, Ordering::Relaxed);
        counter!(m::SINK_DROPPED_TOTAL).increment(1);
        error!(
            store = self.store.name(),
            ip = %attempt.ip_address,
            pid = attempt.pid,
            timestamp = %attempt.timestamp_string(),
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "dropping attempt after exhausting retries"
        );
        SinkOutcome::Dropped
    }

    /// 저장소 집계를 조회합니다.
    pub async fn stats(&self) -> Result<AttemptStats, StoreError> {
        match tokio::time::timeout(self.config.write_timeout, self.store.stats()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.write_timeout)),
        }
    }

    /// 마지막 기록이 실패(드롭)했는지 확인합니다.
    pub fn last_write_failed(&self) -> bool {
        self.last_write_failed.load(Ordering::Relaxed)
    }

    /// 저장소 이름
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }
}
