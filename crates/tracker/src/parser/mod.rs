//! 라인 파서 모듈 -- sshd 로그 라인을 [`RawEvent`]로 분류합니다.
//!
//! 파서는 순수 함수입니다: 공유 상태도, I/O도 없습니다.
//! 인식하지 못한 라인은 [`EventKind::Unparsed`]로 원본만 보존하며
//! 시도(Attempt)로 이어지지 않습니다.
//!
//! # 지원 헤더 형식
//! - BSD syslog: `Jan  5 12:00:00 host sshd[123]: msg`
//! - RFC 3339: `2024-01-15T12:00:00.123456+00:00 host sshd[123]: msg`
//!
//! # 사용 예시
//! ```ignore
//! use sshwatch_tracker::parser::{EventKind, SshdParser};
//!
//! let parser = SshdParser::new()?;
//! let event = parser.parse("Jan 15 12:00:00 host sshd[42]: Connection from 10.0.0.5 port 51515 on 10.0.0.1 port 22");
//! assert_eq!(event.kind, EventKind::ConnectionOpened);
//! ```

pub mod sshd;
pub mod timestamp;

pub use sshd::SshdParser;

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use sshwatch_core::types::FailureReason;

/// 파싱된 이벤트 분류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// 새 TCP 연결 (`Connection from ...`)
    ConnectionOpened,
    /// 인증 성공 (`Accepted <method> for ...`)
    AuthSuccess {
        /// 인증 방식 (password, publickey 등)
        method: String,
    },
    /// 인증 실패 (`Failed <method> for ...`)
    AuthFailure,
    /// 존재하지 않는 사용자로 인증 실패 (`Failed <method> for invalid user ...`)
    InvalidUser,
    /// 존재하지 않는 사용자 알림 (`Invalid user ... from ...`)
    ///
    /// 같은 연결의 실패 라인보다 먼저 기록되므로 종결 이벤트가 아닙니다.
    InvalidUserNotice,
    /// 연결 종료
    Disconnect,
    /// 인식하지 못한 라인
    Unparsed,
}

impl EventKind {
    /// 세션을 종결하는 인증 결과 이벤트인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthSuccess { .. } | Self::AuthFailure | Self::InvalidUser
        )
    }
}

/// 한 줄에서 추출한 이벤트
///
/// 파서가 생성한 뒤에는 변경되지 않으며, 상관 분석기가 즉시 소비합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// 이벤트 분류
    pub kind: EventKind,
    /// sshd 프로세스 ID (Unparsed이면 None)
    pub pid: Option<u32>,
    /// 원격 IP
    pub ip_address: Option<IpAddr>,
    /// 원격 포트
    pub port: Option<u16>,
    /// 사용자명
    pub username: Option<String>,
    /// SSH 프로토콜 버전 (예: "SSH2")
    pub ssh_version: Option<String>,
    /// 실패 사유 (실패 이벤트만)
    pub failure_reason: Option<FailureReason>,
    /// 로그 타임스탬프 (Unparsed이면 None)
    pub timestamp: Option<DateTime<Utc>>,
    /// 원본 라인
    pub raw_line: String,
}

impl RawEvent {
    /// 원본만 보존하는 Unparsed 이벤트를 생성합니다.
    pub fn unparsed(raw_line: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Unparsed,
            pid: None,
            ip_address: None,
            port: None,
            username: None,
            ssh_version: None,
            failure_reason: None,
            timestamp: None,
            raw_line: raw_line.into(),
        }
    }

    /// 인식된 이벤트인지 확인합니다.
    pub fn is_parsed(&self) -> bool {
        self.kind != EventKind::Unparsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds() {
        assert!(
            EventKind::AuthSuccess {
                method: "password".to_owned()
            }
            .is_terminal()
        );
        assert!(EventKind::AuthFailure.is_terminal());
        assert!(EventKind::InvalidUser.is_terminal());
        assert!(!EventKind::InvalidUserNotice.is_terminal());
        assert!(!EventKind::ConnectionOpened.is_terminal());
        assert!(!EventKind::Disconnect.is_terminal());
    }

    #[test]
    fn unparsed_keeps_raw_line_only() {
        let event = RawEvent::unparsed("kernel: something");
        assert!(!event.is_parsed());
        assert_eq!(event.raw_line, "kernel: something");
        assert!(event.pid.is_none());
        assert!(event.timestamp.is_none());
    }
}
