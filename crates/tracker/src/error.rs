//! 트래커 에러 타입
//!
//! [`TrackerError`]는 엔진 내부(소스, 체크포인트, 채널, 설정)에서 발생하는 에러를,
//! [`GeoError`]는 지오로케이션 제공자 호출 실패를,
//! [`StoreError`]는 시도 저장소 쓰기 실패를 표현합니다.
//!
//! `From<TrackerError> for SshwatchError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::time::Duration;

use sshwatch_core::error::{ConfigError, PipelineError, SshwatchError, StorageError};

/// 트래커 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// 시작 시 로그 파일이 대기 시간 내에 나타나지 않음 (치명적)
    #[error("log source unavailable: {path} did not appear within {waited_secs}s")]
    SourceUnavailable {
        /// 감시 대상 경로
        path: String,
        /// 대기한 시간 (초)
        waited_secs: u64,
    },

    /// 일시적 읽기 에러 (재시도 대상)
    #[error("source read error: {path}: {reason}")]
    Source {
        /// 감시 대상 경로
        path: String,
        /// 에러 사유
        reason: String,
    },

    /// 읽기 위치 체크포인트 저장/로드 실패
    #[error("position checkpoint error: {path}: {reason}")]
    Position {
        /// 체크포인트 파일 경로
        path: String,
        /// 에러 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<TrackerError> for SshwatchError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Config { field, reason } => {
                SshwatchError::Config(ConfigError::InvalidValue { field, reason })
            }
            TrackerError::Store(store) => store.into(),
            TrackerError::Io(io) => SshwatchError::Io(io),
            other => SshwatchError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

/// 지오로케이션 제공자 호출 에러
///
/// 모든 변형은 다음 제공자로 넘어가는 조건입니다.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// 호출 타임아웃
    #[error("{provider}: request timed out after {timeout:?}")]
    Timeout {
        /// 제공자 이름
        provider: &'static str,
        /// 적용된 타임아웃
        timeout: Duration,
    },

    /// 전송 실패 (연결 거부, DNS 등)
    #[error("{provider}: http error: {reason}")]
    Http {
        /// 제공자 이름
        provider: &'static str,
        /// 에러 사유
        reason: String,
    },

    /// 2xx 이외의 응답
    #[error("{provider}: unexpected status {status}")]
    Status {
        /// 제공자 이름
        provider: &'static str,
        /// HTTP 상태 코드
        status: u16,
    },

    /// 응답 본문 해석 실패
    #[error("{provider}: malformed response: {reason}")]
    Malformed {
        /// 제공자 이름
        provider: &'static str,
        /// 에러 사유
        reason: String,
    },
}

/// 시도 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 데이터베이스 열기/초기화 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실행 실패 (잠금, 디스크 등)
    #[error("query failed: {0}")]
    Query(String),

    /// 쓰기 타임아웃
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// 블로킹 작업 스레드 실패
    #[error("blocking task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<StoreError> for SshwatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(reason) => {
                SshwatchError::Storage(StorageError::Connection(reason))
            }
            other => SshwatchError::Storage(StorageError::Query(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_unavailable_display() {
        let err = TrackerError::SourceUnavailable {
            path: "/var/log/auth.log".to_owned(),
            waited_secs: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/log/auth.log"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn source_unavailable_converts_to_pipeline_error() {
        let err = TrackerError::SourceUnavailable {
            path: "/var/log/auth.log".to_owned(),
            waited_secs: 1,
        };
        let top: SshwatchError = err.into();
        assert!(matches!(top, SshwatchError::Pipeline(_)));
    }

    #[test]
    fn config_error_converts_to_config_error() {
        let err = TrackerError::Config {
            field: "poll_interval_ms".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        let top: SshwatchError = err.into();
        assert!(matches!(
            top,
            SshwatchError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn store_connection_converts_to_storage_error() {
        let top: SshwatchError = StoreError::Connection("unable to open".to_owned()).into();
        assert!(matches!(
            top,
            SshwatchError::Storage(StorageError::Connection(_))
        ));
    }

    #[test]
    fn geo_error_names_provider() {
        let err = GeoError::Status {
            provider: "ipinfo",
            status: 429,
        };
        assert_eq!(err.to_string(), "ipinfo: unexpected status 429");
    }
}
