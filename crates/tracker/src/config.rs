//! 트래커 엔진 설정
//!
//! [`TrackerConfig`]는 core의 [`SshwatchConfig`](sshwatch_core::config::SshwatchConfig)를
//! 기반으로 엔진 전용 설정을 제공합니다. 각 컴포넌트는 여기서 파생된
//! 자체 설정 구조체([`FileSourceConfig`], [`SessionConfig`], [`ResolverConfig`],
//! [`SinkConfig`])를 받습니다.
//!
//! # 사용 예시
//! ```ignore
//! use sshwatch_core::config::SshwatchConfig;
//! use sshwatch_tracker::config::TrackerConfig;
//!
//! let core_config = SshwatchConfig::default();
//! let config = TrackerConfig::from_core(&core_config);
//! config.validate()?;
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sshwatch_core::config::SshwatchConfig;

use crate::correlator::SessionConfig;
use crate::error::TrackerError;
use crate::geo::ResolverConfig;
use crate::sink::SinkConfig;
use crate::source::FileSourceConfig;

/// 트래커 엔진 설정
///
/// core의 `SshwatchConfig`에서 파생되며, 엔진 내부에서 사용하는
/// 추가 설정을 포함합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    // --- source ---
    /// 감시할 인증 로그 경로
    pub source_path: String,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 시작 시 로그 파일 대기 시간 (초)
    pub startup_wait_secs: u64,
    /// 읽기 위치 체크포인트 파일
    pub position_file: PathBuf,
    /// 체크포인트 저장 주기 (초)
    pub checkpoint_interval_secs: u64,

    // --- correlator ---
    /// 세션 만료 시간 (초)
    pub stale_session_secs: u64,
    /// 스윕 주기 (초)
    pub sweep_interval_secs: u64,
    /// 인증 없는 종료를 기록하는 최소 세션 지속 시간 (초)
    pub min_disconnect_age_secs: u64,
    /// 연도 롤백 허용 오차 (초)
    pub year_rollover_tolerance_secs: u64,

    // --- geo ---
    /// 지오로케이션 활성화 여부
    pub geo_enabled: bool,
    /// 제공자 우선순위 목록
    pub geo_providers: Vec<String>,
    /// ipinfo.io API 토큰
    pub ipinfo_token: String,
    /// 제공자 호출 타임아웃 (초)
    pub geo_timeout_secs: u64,
    /// 캐시 TTL (초)
    pub cache_ttl_secs: u64,
    /// 캐시 최대 엔트리 수
    pub cache_max_entries: usize,
    /// 캐시 정리 주기 (초)
    pub cache_prune_interval_secs: u64,
    /// 제공자 백오프 시작값 (초)
    pub backoff_base_secs: u64,
    /// 제공자 백오프 상한 (초)
    pub backoff_max_secs: u64,
    /// 사설 주소 조회 생략
    pub skip_private: bool,
    /// 동시 보강 작업 수
    pub max_concurrent: usize,

    // --- storage ---
    /// 쓰기 타임아웃 (초)
    pub write_timeout_secs: u64,
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 시작값 (밀리초)
    pub retry_backoff_ms: u64,
    /// 통계 로그 주기 (초, 0이면 비활성화)
    pub stats_interval_secs: u64,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 종료 시 flush 최대 대기 시간 (초)
    pub shutdown_timeout_secs: u64,
    /// 상관 분석기 -> 보강 태스크 채널 용량
    pub attempt_channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from_core(&SshwatchConfig::default())
    }
}

impl TrackerConfig {
    /// core의 `SshwatchConfig`에서 엔진 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &SshwatchConfig) -> Self {
        Self {
            source_path: core.source.path.clone(),
            poll_interval_ms: core.source.poll_interval_ms,
            max_line_length: core.source.max_line_length,
            startup_wait_secs: core.source.startup_wait_secs,
            position_file: core.position_path(),
            checkpoint_interval_secs: core.source.checkpoint_interval_secs,

            stale_session_secs: core.correlator.stale_session_secs,
            sweep_interval_secs: core.correlator.sweep_interval_secs,
            min_disconnect_age_secs: core.correlator.min_disconnect_age_secs,
            year_rollover_tolerance_secs: core.correlator.year_rollover_tolerance_secs,

            geo_enabled: core.geo.enabled,
            geo_providers: core.geo.providers.clone(),
            ipinfo_token: core.geo.ipinfo_token.clone(),
            geo_timeout_secs: core.geo.timeout_secs,
            cache_ttl_secs: core.geo.cache_ttl_secs,
            cache_max_entries: core.geo.cache_max_entries,
            cache_prune_interval_secs: core.geo.cache_prune_interval_secs,
            backoff_base_secs: core.geo.backoff_base_secs,
            backoff_max_secs: core.geo.backoff_max_secs,
            skip_private: core.geo.skip_private,
            max_concurrent: core.geo.max_concurrent,

            write_timeout_secs: core.storage.write_timeout_secs,
            max_retries: core.storage.max_retries,
            retry_backoff_ms: core.storage.retry_backoff_ms,
            stats_interval_secs: core.storage.stats_interval_secs,

            shutdown_timeout_secs: core.general.shutdown_timeout_secs,
            attempt_channel_capacity: 1024,
        }
    }

    /// 감시 경로가 안전한지 검증합니다.
    ///
    /// # 검증 규칙
    /// - 비어 있지 않아야 함
    /// - ".." 컴포넌트를 포함하지 않아야 함
    /// - 절대 경로여야 함
    fn validate_source_path(path_str: &str) -> Result<(), TrackerError> {
        if path_str.is_empty() {
            return Err(config_err("source_path", "must not be empty"));
        }

        let path = Path::new(path_str);

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(config_err(
                "source_path",
                format!("'{path_str}' contains path traversal pattern '..'"),
            ));
        }

        if !path.is_absolute() {
            return Err(config_err(
                "source_path",
                format!("'{path_str}' must be an absolute path"),
            ));
        }

        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TrackerError> {
        const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024; // 16MB
        const MAX_POLL_INTERVAL_MS: u64 = 60_000;
        const MAX_CONCURRENT: usize = 1024;

        Self::validate_source_path(&self.source_path)?;

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(config_err(
                "poll_interval_ms",
                format!("must be 1-{MAX_POLL_INTERVAL_MS}"),
            ));
        }

        if self.max_line_length < 256 || self.max_line_length > MAX_LINE_LENGTH {
            return Err(config_err(
                "max_line_length",
                format!("must be 256-{MAX_LINE_LENGTH}"),
            ));
        }

        if self.position_file.as_os_str().is_empty() {
            return Err(config_err("position_file", "must not be empty"));
        }

        for (field, value) in [
            ("checkpoint_interval_secs", self.checkpoint_interval_secs),
            ("stale_session_secs", self.stale_session_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("geo_timeout_secs", self.geo_timeout_secs),
            ("cache_prune_interval_secs", self.cache_prune_interval_secs),
            ("write_timeout_secs", self.write_timeout_secs),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs),
        ] {
            if value == 0 {
                return Err(config_err(field, "must be greater than 0"));
            }
        }

        if self.min_disconnect_age_secs >= self.stale_session_secs {
            return Err(config_err(
                "min_disconnect_age_secs",
                "must be less than stale_session_secs",
            ));
        }

        if self.backoff_base_secs > self.backoff_max_secs {
            return Err(config_err(
                "backoff_base_secs",
                "must not exceed backoff_max_secs",
            ));
        }

        if self.cache_max_entries == 0 {
            return Err(config_err("cache_max_entries", "must be greater than 0"));
        }

        if self.max_concurrent == 0 || self.max_concurrent > MAX_CONCURRENT {
            return Err(config_err(
                "max_concurrent",
                format!("must be 1-{MAX_CONCURRENT}"),
            ));
        }

        if self.attempt_channel_capacity == 0 {
            return Err(config_err(
                "attempt_channel_capacity",
                "must be greater than 0",
            ));
        }

        if self.geo_enabled && self.geo_providers.is_empty() {
            return Err(config_err(
                "geo_providers",
                "at least one provider must be configured when enabled",
            ));
        }

        Ok(())
    }

    /// 로그 소스 설정을 생성합니다.
    pub fn file_source_config(&self) -> FileSourceConfig {
        FileSourceConfig {
            path: PathBuf::from(&self.source_path),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_line_length: self.max_line_length,
            startup_wait: Duration::from_secs(self.startup_wait_secs),
        }
    }

    /// 상관 분석기 설정을 생성합니다.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            stale_after: Duration::from_secs(self.stale_session_secs),
            min_disconnect_age: Duration::from_secs(self.min_disconnect_age_secs),
        }
    }

    /// 지오로케이션 리졸버 설정을 생성합니다.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            enabled: self.geo_enabled,
            lookup_timeout: Duration::from_secs(self.geo_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: self.cache_max_entries,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            skip_private: self.skip_private,
        }
    }

    /// 싱크 설정을 생성합니다.
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> TrackerError {
    TrackerError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 트래커 설정 빌더
///
/// 테스트와 임베딩 용도로 core 설정 없이 엔진 설정을 구성합니다.
#[derive(Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 감시할 로그 경로를 설정합니다.
    pub fn source_path(mut self, path: impl Into<String>) -> Self {
        self.config.source_path = path.into();
        self
    }

    /// 체크포인트 파일 경로를 설정합니다.
    pub fn position_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.position_file = path.into();
        self
    }

    /// 폴링 주기(밀리초)를 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 시작 시 로그 파일 대기 시간(초)을 설정합니다.
    pub fn startup_wait_secs(mut self, secs: u64) -> Self {
        self.config.startup_wait_secs = secs;
        self
    }

    /// 체크포인트 저장 주기(초)를 설정합니다.
    pub fn checkpoint_interval_secs(mut self, secs: u64) -> Self {
        self.config.checkpoint_interval_secs = secs;
        self
    }

    /// 세션 만료 시간(초)을 설정합니다.
    pub fn stale_session_secs(mut self, secs: u64) -> Self {
        self.config.stale_session_secs = secs;
        self
    }

    /// 인증 없는 종료의 최소 세션 지속 시간(초)을 설정합니다.
    pub fn min_disconnect_age_secs(mut self, secs: u64) -> Self {
        self.config.min_disconnect_age_secs = secs;
        self
    }

    /// 지오로케이션 활성화 여부를 설정합니다.
    pub fn geo_enabled(mut self, enabled: bool) -> Self {
        self.config.geo_enabled = enabled;
        self
    }

    /// 사설 주소 조회 생략 여부를 설정합니다.
    pub fn skip_private(mut self, skip: bool) -> Self {
        self.config.skip_private = skip;
        self
    }

    /// 최대 쓰기 재시도 횟수를 설정합니다.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// 재시도 백오프 시작값(밀리초)을 설정합니다.
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    /// 통계 로그 주기(초)를 설정합니다.
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.config.stats_interval_secs = secs;
        self
    }

    /// 종료 대기 시간(초)을 설정합니다.
    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    /// 설정을 검증하고 `TrackerConfig`를 생성합니다.
    pub fn build(self) -> Result<TrackerConfig, TrackerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
