//! sshd 메시지 파서
//!
//! 헤더(타임스탬프, 호스트, `sshd[pid]`)를 분리한 뒤, 메시지 본문에
//! 순서가 정해진 패턴 테이블을 적용합니다. 첫 번째로 매칭된 패턴이 이깁니다.
//!
//! # 패턴 순서 (구체적인 것부터)
//! 1. `Accepted <method> for <user> from <ip> port <port> [sshN]`
//! 2. `Failed <method> for invalid user <user> from <ip> port <port> [sshN]`
//! 3. `Failed <method> for <user> from <ip> port <port> [sshN]`
//! 4. `Invalid user <user> from <ip> [port <port>]`
//! 5. `Connection from <ip> port <port>`
//! 6. `Connection closed by` / `Disconnected from` / `Received disconnect from` / `Connection reset by`

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use regex::{Captures, Regex};
use sshwatch_core::types::FailureReason;

use super::timestamp::{parse_bsd, parse_rfc3339};
use super::{EventKind, RawEvent};
use crate::error::TrackerError;

/// 헤더 정규식: 타임스탬프, 호스트, 프로세스명, PID, 메시지
const HEADER_PATTERN: &str = concat!(
    r"^(?:(?P<iso>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))",
    r"|(?P<bsd>[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}))",
    r"\s+\S+\s+sshd(?:-session)?\[(?P<pid>\d+)\]:\s?(?P<msg>.*)$",
);

/// 프로토콜 버전 접미어 (` ssh2`)
const VERSION_SUFFIX: &str = r"(?: (?P<ver>ssh\d+))?";

/// 패턴 테이블 항목의 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchRule {
    Accepted,
    FailedInvalidUser,
    Failed,
    InvalidUserNotice,
    ConnectionFrom,
    Disconnect,
}

struct Matcher {
    rule: MatchRule,
    pattern: Regex,
}

/// sshd 로그 라인 파서
///
/// 정규식은 생성 시 한 번만 컴파일됩니다. `parse`는 `&self`만 필요하므로
/// 여러 태스크에서 공유해도 안전합니다.
pub struct SshdParser {
    /// 최대 허용 입력 크기 (바이트)
    max_line_length: usize,
    /// BSD 타임스탬프 연도 롤백 허용 오차
    year_tolerance: Duration,
    header: Regex,
    matchers: Vec<Matcher>,
}

impl SshdParser {
    /// 기본 설정으로 새 파서를 생성합니다.
    pub fn new() -> Result<Self, TrackerError> {
        let table = [
            (
                MatchRule::Accepted,
                format!(
                    r"^Accepted (?P<method>\S+) for (?P<user>.+?) from (?P<ip>\S+) port (?P<port>\d+){VERSION_SUFFIX}"
                ),
            ),
            (
                MatchRule::FailedInvalidUser,
                format!(
                    r"^Failed (?P<method>\S+) for invalid user (?P<user>.*?) from (?P<ip>\S+) port (?P<port>\d+){VERSION_SUFFIX}"
                ),
            ),
            (
                MatchRule::Failed,
                format!(
                    r"^Failed (?P<method>\S+) for (?P<user>.+?) from (?P<ip>\S+) port (?P<port>\d+){VERSION_SUFFIX}"
                ),
            ),
            (
                MatchRule::InvalidUserNotice,
                r"^Invalid user (?P<user>.*?) from (?P<ip>\S+)(?: port (?P<port>\d+))?".to_owned(),
            ),
            (
                MatchRule::ConnectionFrom,
                r"^Connection from (?P<ip>\S+) port (?P<port>\d+)".to_owned(),
            ),
            (
                MatchRule::Disconnect,
                concat!(
                    r"^(?:Connection closed by|Disconnected from|Received disconnect from|Connection reset by)",
                    r"(?: (?:(?:authenticating|invalid) )?user (?P<user>\S*))?",
                    r"(?: (?P<ip>[0-9A-Fa-f:.]+) port (?P<port>\d+))?",
                )
                .to_owned(),
            ),
        ];

        let matchers = table
            .into_iter()
            .map(|(rule, pattern)| -> Result<Matcher, TrackerError> {
                Ok(Matcher {
                    rule,
                    pattern: Regex::new(&pattern)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_line_length: 64 * 1024, // 64KB
            year_tolerance: Duration::days(1),
            header: Regex::new(HEADER_PATTERN)?,
            matchers,
        })
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_line_length(mut self, size: usize) -> Self {
        self.max_line_length = size;
        self
    }

    /// BSD 타임스탬프의 연도 롤백 허용 오차를 설정합니다.
    pub fn with_year_tolerance(mut self, tolerance: std::time::Duration) -> Self {
        self.year_tolerance = Duration::from_std(tolerance).unwrap_or(Duration::days(1));
        self
    }

    /// 현재 시각 기준으로 라인을 파싱합니다.
    pub fn parse(&self, line: &str) -> RawEvent {
        self.parse_at(line, Utc::now())
    }

    /// 주어진 시각을 "현재"로 보고 라인을 파싱합니다.
    ///
    /// 연도 없는 BSD 타임스탬프의 연도 추론에만 `now`가 사용됩니다.
    pub fn parse_at(&self, line: &str, now: DateTime<Utc>) -> RawEvent {
        if line.len() > self.max_line_length {
            return RawEvent::unparsed(line);
        }

        let Some(header) = self.header.captures(line) else {
            return RawEvent::unparsed(line);
        };

        let timestamp = if let Some(iso) = header.name("iso") {
            parse_rfc3339(iso.as_str())
        } else if let Some(bsd) = header.name("bsd") {
            parse_bsd(bsd.as_str(), now, self.year_tolerance)
        } else {
            None
        };
        let Some(timestamp) = timestamp else {
            return RawEvent::unparsed(line);
        };

        let Some(pid) = header.name("pid").and_then(|m| m.as_str().parse::<u32>().ok()) else {
            return RawEvent::unparsed(line);
        };

        let msg = header.name("msg").map_or("", |m| m.as_str());

        for matcher in &self.matchers {
            if let Some(caps) = matcher.pattern.captures(msg) {
                return build_event(matcher.rule, &caps, pid, timestamp, line)
                    .unwrap_or_else(|| RawEvent::unparsed(line));
            }
        }

        RawEvent::unparsed(line)
    }
}

/// 패턴 매칭 결과로 이벤트를 구성합니다.
///
/// 필수 IP가 유효하지 않으면 `None`을 반환합니다.
fn build_event(
    rule: MatchRule,
    caps: &Captures<'_>,
    pid: u32,
    timestamp: DateTime<Utc>,
    line: &str,
) -> Option<RawEvent> {
    let ip = caps
        .name("ip")
        .and_then(|m| m.as_str().parse::<IpAddr>().ok());
    let port = caps.name("port").and_then(|m| m.as_str().parse::<u16>().ok());
    let username = caps
        .name("user")
        .map(|m| m.as_str().to_owned())
        .filter(|u| !u.is_empty());
    let ssh_version = caps.name("ver").map(|m| m.as_str().to_uppercase());
    let method = caps.name("method").map_or("", |m| m.as_str());

    let (kind, failure_reason) = match rule {
        MatchRule::Accepted => (
            EventKind::AuthSuccess {
                method: method.to_owned(),
            },
            None,
        ),
        MatchRule::FailedInvalidUser => (EventKind::InvalidUser, Some(FailureReason::InvalidUser)),
        MatchRule::Failed => (EventKind::AuthFailure, Some(failure_reason_for(method))),
        MatchRule::InvalidUserNotice => (EventKind::InvalidUserNotice, None),
        MatchRule::ConnectionFrom => (EventKind::ConnectionOpened, None),
        MatchRule::Disconnect => (EventKind::Disconnect, None),
    };

    // 종료 이벤트 외에는 IP가 필수
    if rule != MatchRule::Disconnect && ip.is_none() {
        return None;
    }

    Some(RawEvent {
        kind,
        pid: Some(pid),
        ip_address: ip,
        port,
        username,
        ssh_version,
        failure_reason,
        timestamp: Some(timestamp),
        raw_line: line.to_owned(),
    })
}

/// 인증 방식별 실패 사유
fn failure_reason_for(method: &str) -> FailureReason {
    match method {
        "password" | "keyboard-interactive/pam" => FailureReason::InvalidPassword,
        "publickey" => FailureReason::InvalidPublickey,
        _ => FailureReason::AuthFailed,
    }
}
