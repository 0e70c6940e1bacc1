//! 시도 상관 분석기 -- PID 기준으로 여러 로그 라인을 하나의 [`Attempt`]로 병합합니다.
//!
//! # 세션 상태 전이
//! ```text
//! ConnectionOpened ──> Opened ──(Accepted | Failed | Failed invalid user)──> Attempt 1건, 세션 삭제
//!                        │
//!                        ├──(Invalid user 알림)──> Opened + 부분 인증 정보
//!                        ├──(Disconnect)──> 부분 인증 정보 있음: invalid_user
//!                        │                  최소 지속 시간 이상: no_auth_attempted
//!                        │                  그 외: 조용히 폐기
//!                        └──(스윕, 만료)──> 부분 인증 정보 있음: timeout, 그 외 폐기
//! ```
//!
//! 세션 맵은 엔진의 수집 태스크가 단독으로 소유하며, 스윕도 같은 태스크에서
//! 실행되므로 별도의 잠금이 필요 없습니다. 세션은 Attempt를 만드는 단계에서
//! 맵에서 제거되므로 세션당 Attempt는 정확히 한 번만 생성됩니다.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use sshwatch_core::metrics as m;
use sshwatch_core::types::{Attempt, FailureReason, GeoLocation};
use tokio::time::Instant;

use crate::parser::{EventKind, RawEvent};
use crate::source::{FileIdentity, LogPosition};

/// 상관 분석기 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 인증 결과 없는 세션의 만료 시간 (수집 시각 기준)
    pub stale_after: Duration,
    /// 인증 없는 종료를 시도로 기록하기 위한 최소 세션 지속 시간 (로그 시각 기준)
    pub min_disconnect_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            min_disconnect_age: Duration::from_secs(10),
        }
    }
}

/// 인증 결과를 기다리는 세션
#[derive(Debug, Clone)]
struct PendingSession {
    pid: u32,
    first_seen: DateTime<Utc>,
    last_update: DateTime<Utc>,
    /// 세션이 생성된 수집 시각 (만료 판정용)
    created_at: Instant,
    ip_address: IpAddr,
    port: Option<u16>,
    username: Option<String>,
    ssh_version: Option<String>,
    /// `Invalid user` 알림을 받았는지 (부분 인증 정보)
    invalid_user: bool,
    /// 세션을 만든 라인의 위치 (체크포인트 low watermark용)
    origin: Option<LogPosition>,
    /// 이 세션의 마지막 원본 라인
    last_line: String,
}

impl PendingSession {
    fn has_partial_auth(&self) -> bool {
        self.invalid_user
    }

    fn into_attempt(
        self,
        timestamp: DateTime<Utc>,
        reason: FailureReason,
        raw_line: String,
    ) -> Attempt {
        Attempt {
            timestamp,
            pid: self.pid,
            ip_address: self.ip_address,
            username: self.username,
            success: false,
            failure_reason: Some(reason),
            port: self.port,
            ssh_version: self.ssh_version,
            location: GeoLocation::unknown(),
            raw_log_line: raw_line,
        }
    }
}

/// PID 기준 시도 상관 분석기
pub struct Correlator {
    config: SessionConfig,
    sessions: HashMap<u32, PendingSession>,
}

impl Correlator {
    /// 새 상관 분석기를 생성합니다.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// 이벤트 하나를 반영하고, 세션이 종결되면 Attempt를 반환합니다.
    ///
    /// `origin`은 이벤트를 만든 라인의 위치입니다. 새 세션을 만들 때만 기록됩니다.
    pub fn ingest(&mut self, event: RawEvent, origin: Option<LogPosition>) -> Option<Attempt> {
        let (Some(pid), Some(timestamp)) = (event.pid, event.timestamp) else {
            return None;
        };

        let attempt = match event.kind {
            EventKind::Unparsed => None,
            EventKind::ConnectionOpened => self.on_connection_opened(pid, timestamp, event, origin),
            EventKind::InvalidUserNotice => {
                self.on_invalid_user_notice(pid, timestamp, event, origin);
                None
            }
            EventKind::AuthSuccess { .. } | EventKind::AuthFailure | EventKind::InvalidUser => {
                self.on_auth_outcome(pid, timestamp, event)
            }
            EventKind::Disconnect => self
                .sessions
                .remove(&pid)
                .and_then(|session| self.close_without_outcome(session, timestamp, event.raw_line)),
        };

        if let Some(attempt) = &attempt {
            record_emitted(attempt);
        }
        gauge!(m::CORRELATOR_PENDING_SESSIONS).set(self.sessions.len() as f64);
        attempt
    }

    /// 만료된 세션을 제거합니다.
    ///
    /// 부분 인증 정보가 있는 세션은 `timeout` 실패로 반환하고, 나머지는 폐기합니다.
    pub fn sweep(&mut self) -> Vec<Attempt> {
        let now = Instant::now();
        let stale_after = self.config.stale_after;
        let stale: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.created_at) >= stale_after)
            .map(|(pid, _)| *pid)
            .collect();

        let mut attempts = Vec::new();
        for pid in stale {
            let Some(session) = self.sessions.remove(&pid) else {
                continue;
            };
            counter!(m::CORRELATOR_EVICTED_TOTAL).increment(1);

            if session.has_partial_auth() {
                let timestamp = session.last_update;
                let raw = session.last_line.clone();
                let attempt = session.into_attempt(timestamp, FailureReason::Timeout, raw);
                record_emitted(&attempt);
                attempts.push(attempt);
            } else {
                tracing::debug!(pid, ip = %session.ip_address, "evicting stale session without auth data");
            }
        }

        gauge!(m::CORRELATOR_PENDING_SESSIONS).set(self.sessions.len() as f64);
        attempts
    }

    /// 대기 중인 세션 수를 반환합니다.
    pub fn pending_count(&self) -> usize {
        self.sessions.len()
    }

    /// 주어진 파일에서 아직 종결되지 않은 세션의 가장 작은 시작 오프셋을 반환합니다.
    pub fn low_watermark(&self, identity: FileIdentity) -> Option<u64> {
        self.sessions
            .values()
            .filter_map(|s| s.origin)
            .filter(|origin| origin.identity == identity)
            .map(|origin| origin.offset)
            .min()
    }

    /// 대기 중인 세션을 만든 라인의 위치
    pub fn session_origin(&self, pid: u32) -> Option<LogPosition> {
        self.sessions.get(&pid).and_then(|s| s.origin)
    }

    /// 종료 시 남은 세션을 모두 버리고 그 수를 반환합니다.
    ///
    /// 버려진 세션의 라인은 체크포인트 low watermark 덕분에 재시작 후 다시 읽힙니다.
    pub fn drain(&mut self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        gauge!(m::CORRELATOR_PENDING_SESSIONS).set(0.0);
        count
    }

    fn on_connection_opened(
        &mut self,
        pid: u32,
        timestamp: DateTime<Utc>,
        event: RawEvent,
        origin: Option<LogPosition>,
    ) -> Option<Attempt> {
        let ip = event.ip_address?;

        // PID 재사용: 종료 라인을 놓친 이전 세션은 종료된 것으로 처리
        let previous = self.sessions.remove(&pid).and_then(|old| {
            tracing::debug!(pid, "pid reused while session open, closing previous session");
            let timestamp = old.last_update;
            let raw = old.last_line.clone();
            self.close_without_outcome(old, timestamp, raw)
        });

        self.sessions.insert(
            pid,
            PendingSession {
                pid,
                first_seen: timestamp,
                last_update: timestamp,
                created_at: Instant::now(),
                ip_address: ip,
                port: event.port,
                username: None,
                ssh_version: None,
                invalid_user: false,
                origin,
                last_line: event.raw_line,
            },
        );
        previous
    }

    fn on_invalid_user_notice(
        &mut self,
        pid: u32,
        timestamp: DateTime<Utc>,
        event: RawEvent,
        origin: Option<LogPosition>,
    ) {
        let Some(ip) = event.ip_address else {
            return;
        };

        let session = self.sessions.entry(pid).or_insert_with(|| PendingSession {
            pid,
            first_seen: timestamp,
            last_update: timestamp,
            created_at: Instant::now(),
            ip_address: ip,
            port: event.port,
            username: None,
            ssh_version: None,
            invalid_user: false,
            origin,
            last_line: String::new(),
        });

        session.invalid_user = true;
        session.username = event.username.or(session.username.take());
        session.port = session.port.or(event.port);
        session.last_update = timestamp;
        session.last_line = event.raw_line;
    }

    fn on_auth_outcome(
        &mut self,
        pid: u32,
        timestamp: DateTime<Utc>,
        event: RawEvent,
    ) -> Option<Attempt> {
        let session = self.sessions.remove(&pid);
        let success = matches!(event.kind, EventKind::AuthSuccess { .. });

        let ip_address = event
            .ip_address
            .or_else(|| session.as_ref().map(|s| s.ip_address))?;

        let (port, username, ssh_version) = match session {
            Some(s) => (
                event.port.or(s.port),
                event.username.or(s.username),
                event.ssh_version.or(s.ssh_version),
            ),
            None => (event.port, event.username, event.ssh_version),
        };

        Some(Attempt {
            timestamp,
            pid,
            ip_address,
            username,
            success,
            failure_reason: if success { None } else { event.failure_reason },
            port,
            ssh_version,
            location: GeoLocation::unknown(),
            raw_log_line: event.raw_line,
        })
    }

    /// 인증 결과 없이 끝난 세션을 처리합니다.
    fn close_without_outcome(
        &self,
        session: PendingSession,
        closed_at: DateTime<Utc>,
        raw_line: String,
    ) -> Option<Attempt> {
        if session.has_partial_auth() {
            return Some(session.into_attempt(closed_at, FailureReason::InvalidUser, raw_line));
        }

        let age = (closed_at - session.first_seen).to_std().unwrap_or_default();
        if age >= self.config.min_disconnect_age {
            Some(session.into_attempt(closed_at, FailureReason::NoAuthAttempted, raw_line))
        } else {
            tracing::debug!(
                pid = session.pid,
                ip = %session.ip_address,
                age_ms = age.as_millis() as u64,
                "discarding short session without auth attempt"
            );
            None
        }
    }
}

fn record_emitted(attempt: &Attempt) {
    let result = if attempt.success { "success" } else { "failure" };
    counter!(m::CORRELATOR_ATTEMPTS_TOTAL, m::LABEL_RESULT => result).increment(1);
}
