//! 인메모리 시도 저장소
//!
//! 테스트와 dry-run(`storage.backend = "memory"`)에 사용합니다.
//! [`MemoryStore::fail_next`]로 쓰기 실패를, [`MemoryStore::with_delay`]로
//! 느린 저장소를 흉내낼 수 있습니다.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use sshwatch_core::pipeline::BoxFuture;
use sshwatch_core::types::{Attempt, AttemptStats};

use super::{AttemptStore, RecordOutcome};
use crate::error::StoreError;

#[derive(Default)]
struct Rows {
    keys: HashSet<String>,
    attempts: Vec<Attempt>,
}

/// 인메모리 저장소
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
    fail_remaining: AtomicU32,
    write_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 매 쓰기 전에 지연을 추가합니다.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 다음 `count`번의 쓰기를 실패시킵니다.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// 지금까지 호출된 쓰기 횟수 (실패 포함)
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// 기록된 시도의 사본을 기록 순서대로 반환합니다.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.lock().attempts.clone()
    }

    /// 기록된 시도 수
    pub fn len(&self) -> usize {
        self.lock().attempts.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl AttemptStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn record<'a>(&'a self, attempt: &'a Attempt) -> BoxFuture<'a, Result<RecordOutcome, StoreError>> {
        Box::pin(async move {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.take_failure() {
                return Err(StoreError::Query("injected failure".to_owned()));
            }

            let mut rows = self.lock();
            if !rows.keys.insert(attempt.dedup_key()) {
                return Ok(RecordOutcome::Duplicate);
            }
            rows.attempts.push(attempt.clone());
            Ok(RecordOutcome::Inserted)
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<AttemptStats, StoreError>> {
        Box::pin(async move {
            let rows = self.lock();
            let cutoff = Utc::now() - chrono::Duration::hours(1);
            let total = rows.attempts.len() as u64;
            let successful = rows.attempts.iter().filter(|a| a.success).count() as u64;
            let unique_ips = rows
                .attempts
                .iter()
                .map(|a| a.ip_address)
                .collect::<HashSet<IpAddr>>()
                .len() as u64;
            let last_hour = rows.attempts.iter().filter(|a| a.timestamp > cutoff).count() as u64;
            Ok(AttemptStats {
                total,
                successful,
                failed: total - successful,
                unique_ips,
                last_hour,
            })
        })
    }
}
