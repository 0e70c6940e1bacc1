//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 트래커 엔진과 스토리지 백엔드가 공유하는 데이터 구조를 정의합니다.
//! [`Attempt`]는 한 번의 SSH 접속 시도에 대한 최종 레코드이며,
//! 스토리지에 정확히 한 번 기록됩니다.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// 지오로케이션 조회 실패 시 사용하는 값
pub const UNKNOWN: &str = "Unknown";

/// 인증 실패 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 잘못된 비밀번호 (password, keyboard-interactive)
    InvalidPassword,
    /// 거부된 공개키
    InvalidPublickey,
    /// 그 외 인증 방식 실패
    AuthFailed,
    /// 존재하지 않는 사용자
    InvalidUser,
    /// 인증 시도 없이 연결 종료
    NoAuthAttempted,
    /// 인증 결과 없이 세션 만료
    Timeout,
}

impl FailureReason {
    /// 스토리지에 기록되는 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPassword => "invalid_password",
            Self::InvalidPublickey => "invalid_publickey",
            Self::AuthFailed => "auth_failed",
            Self::InvalidUser => "invalid_user",
            Self::NoAuthAttempted => "no_auth_attempted",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP 지오로케이션 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// 국가
    pub country: String,
    /// 도시
    pub city: String,
    /// ISP / 조직
    pub isp: String,
}

impl GeoLocation {
    /// 조회 실패 시 사용하는 "Unknown" 위치를 생성합니다.
    pub fn unknown() -> Self {
        Self {
            country: UNKNOWN.to_owned(),
            city: UNKNOWN.to_owned(),
            isp: UNKNOWN.to_owned(),
        }
    }

    /// 국가 정보가 없는 위치인지 확인합니다.
    pub fn is_unknown(&self) -> bool {
        self.country == UNKNOWN
    }
}

impl Default for GeoLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

/// 완료된 SSH 접속 시도 레코드
///
/// 상관 분석기가 세션을 종결할 때 한 번 생성되고,
/// 지오로케이션으로 보강된 뒤 스토리지에 한 번 기록됩니다.
/// 중복 제거 키는 `(timestamp, ip_address, username, pid)`입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 시도 시각 (종결 이벤트의 로그 타임스탬프)
    pub timestamp: DateTime<Utc>,
    /// sshd 프로세스 ID
    pub pid: u32,
    /// 접속 IP
    pub ip_address: IpAddr,
    /// 사용자명 (로그에 없으면 None)
    pub username: Option<String>,
    /// 인증 성공 여부
    pub success: bool,
    /// 실패 사유 (성공 시 None)
    pub failure_reason: Option<FailureReason>,
    /// 원격 포트
    pub port: Option<u16>,
    /// SSH 프로토콜 버전 (예: "SSH2")
    pub ssh_version: Option<String>,
    /// 지오로케이션
    #[serde(flatten)]
    pub location: GeoLocation,
    /// 종결 이벤트의 원본 로그 라인
    pub raw_log_line: String,
}

impl Attempt {
    /// 스토리지 중복 제거에 사용하는 자연 키를 반환합니다.
    ///
    /// 사용자명이 없으면 빈 문자열로 대체하여 NULL이 유일성 검사를
    /// 우회하지 않도록 합니다.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.timestamp_string(),
            self.ip_address,
            self.username.as_deref().unwrap_or(""),
            self.pid
        )
    }

    /// 타임스탬프를 RFC 3339 (마이크로초) 문자열로 반환합니다.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "SSH {status}: {}", self.ip_address)?;
        if let Some(port) = self.port {
            write!(f, " (port {port})")?;
        }
        write!(f, " -> {}", self.username.as_deref().unwrap_or("unknown"))?;
        if !self.location.is_unknown() {
            write!(f, " [{}, {}]", self.location.city, self.location.country)?;
        }
        Ok(())
    }
}

/// 저장된 시도 집계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptStats {
    /// 전체 시도 수
    pub total: u64,
    /// 성공 수
    pub successful: u64,
    /// 실패 수
    pub failed: u64,
    /// 고유 IP 수
    pub unique_ips: u64,
    /// 최근 1시간 시도 수
    pub last_hour: u64,
}
