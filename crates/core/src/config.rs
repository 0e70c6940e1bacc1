//! 설정 관리: sshwatch.toml 파싱 및 런타임 설정
//!
//! [`SshwatchConfig`]는 데몬과 트래커 엔진의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SSHWATCH_SOURCE_PATH=/var/log/secure` 형식)
//! 3. 설정 파일 (`sshwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), sshwatch_core::error::SshwatchError> {
//! use sshwatch_core::config::SshwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = SshwatchConfig::load("sshwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = SshwatchConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, SshwatchError};

/// 지원하는 지오로케이션 제공자 이름
pub const KNOWN_GEO_PROVIDERS: &[&str] = &["ipinfo", "ip-api"];

/// 지원하는 스토리지 백엔드 이름
pub const KNOWN_STORAGE_BACKENDS: &[&str] = &["sqlite", "memory"];

/// sshwatch 통합 설정
///
/// `sshwatch.toml` 파일의 최상위 구조를 나타냅니다.
/// 모든 섹션은 생략 가능하며, 생략 시 기본값이 적용됩니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 소스 설정
    #[serde(default)]
    pub source: SourceConfig,
    /// 상관 분석기 설정
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    /// 지오로케이션 설정
    #[serde(default)]
    pub geo: GeoConfig,
    /// 스토리지 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl SshwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SshwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SshwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SshwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SshwatchError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, SshwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            SshwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SSHWATCH_{SECTION}_{FIELD}`
    /// 예: `SSHWATCH_GEO_ENABLED=false`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SSHWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SSHWATCH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "SSHWATCH_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "SSHWATCH_GENERAL_PID_FILE");
        override_u64(
            &mut self.general.shutdown_timeout_secs,
            "SSHWATCH_GENERAL_SHUTDOWN_TIMEOUT_SECS",
        );

        // Source
        override_string(&mut self.source.path, "SSHWATCH_SOURCE_PATH");
        override_u64(
            &mut self.source.poll_interval_ms,
            "SSHWATCH_SOURCE_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.source.startup_wait_secs,
            "SSHWATCH_SOURCE_STARTUP_WAIT_SECS",
        );
        override_string(&mut self.source.position_file, "SSHWATCH_SOURCE_POSITION_FILE");

        // Correlator
        override_u64(
            &mut self.correlator.stale_session_secs,
            "SSHWATCH_CORRELATOR_STALE_SESSION_SECS",
        );
        override_u64(
            &mut self.correlator.min_disconnect_age_secs,
            "SSHWATCH_CORRELATOR_MIN_DISCONNECT_AGE_SECS",
        );

        // Geo
        override_bool(&mut self.geo.enabled, "SSHWATCH_GEO_ENABLED");
        override_csv(&mut self.geo.providers, "SSHWATCH_GEO_PROVIDERS");
        override_string(&mut self.geo.ipinfo_token, "SSHWATCH_GEO_IPINFO_TOKEN");
        override_u64(&mut self.geo.timeout_secs, "SSHWATCH_GEO_TIMEOUT_SECS");
        override_u64(&mut self.geo.cache_ttl_secs, "SSHWATCH_GEO_CACHE_TTL_SECS");

        // Storage
        override_string(&mut self.storage.backend, "SSHWATCH_STORAGE_BACKEND");
        override_string(&mut self.storage.db_path, "SSHWATCH_STORAGE_DB_PATH");
        override_u32(&mut self.storage.max_retries, "SSHWATCH_STORAGE_MAX_RETRIES");

        // Metrics
        override_bool(&mut self.metrics.enabled, "SSHWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "SSHWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "SSHWATCH_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 숫자 범위 검증은 트래커 크레이트의 `TrackerConfig::validate`가 담당합니다.
    pub fn validate(&self) -> Result<(), SshwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.source.path.is_empty() {
            return Err(invalid("source.path", "must not be empty".to_owned()));
        }

        if !Path::new(&self.source.path).is_absolute() {
            return Err(invalid(
                "source.path",
                format!("'{}' must be an absolute path", self.source.path),
            ));
        }

        if self.geo.enabled {
            if self.geo.providers.is_empty() {
                return Err(invalid(
                    "geo.providers",
                    "at least one provider must be configured when enabled".to_owned(),
                ));
            }
            for provider in &self.geo.providers {
                if !KNOWN_GEO_PROVIDERS.contains(&provider.as_str()) {
                    return Err(invalid(
                        "geo.providers",
                        format!(
                            "unknown provider '{}', expected one of: {}",
                            provider,
                            KNOWN_GEO_PROVIDERS.join(", ")
                        ),
                    ));
                }
            }
        }

        if !KNOWN_STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(invalid(
                "storage.backend",
                format!("must be one of: {}", KNOWN_STORAGE_BACKENDS.join(", ")),
            ));
        }

        if self.storage.backend == "sqlite" && self.storage.db_path.is_empty() {
            return Err(invalid(
                "storage.db_path",
                "must not be empty for the sqlite backend".to_owned(),
            ));
        }

        Ok(())
    }

    /// 읽기 위치 체크포인트 파일 경로를 반환합니다.
    ///
    /// `source.position_file`이 비어 있으면 `<data_dir>/position.json`을 사용합니다.
    pub fn position_path(&self) -> PathBuf {
        if self.source.position_file.is_empty() {
            Path::new(&self.general.data_dir).join("position.json")
        } else {
            PathBuf::from(&self.source.position_file)
        }
    }
}

fn invalid(field: &str, reason: String) -> SshwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리 (체크포인트 저장 위치)
    pub data_dir: String,
    /// PID 파일 경로 (빈 문자열이면 사용 안 함)
    pub pid_file: String,
    /// 종료 시 flush 최대 대기 시간 (초)
    pub shutdown_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/sshwatch".to_owned(),
            pid_file: "/var/run/sshwatch.pid".to_owned(),
            shutdown_timeout_secs: 30,
        }
    }
}

/// 로그 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 감시할 인증 로그 경로
    pub path: String,
    /// 새 데이터가 없을 때 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 시작 시 로그 파일이 나타나기를 기다리는 최대 시간 (초)
    pub startup_wait_secs: u64,
    /// 읽기 위치 체크포인트 파일 (빈 문자열이면 data_dir/position.json)
    pub position_file: String,
    /// 체크포인트 저장 주기 (초)
    pub checkpoint_interval_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "/var/log/auth.log".to_owned(),
            poll_interval_ms: 1000,
            max_line_length: 64 * 1024, // 64KB
            startup_wait_secs: 30,
            position_file: String::new(),
            checkpoint_interval_secs: 5,
        }
    }
}

/// 상관 분석기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// 인증 결과 없는 세션의 만료 시간 (초)
    pub stale_session_secs: u64,
    /// 만료 세션 스윕 주기 (초)
    pub sweep_interval_secs: u64,
    /// 인증 없이 종료된 세션을 시도로 기록하기 위한 최소 지속 시간 (초)
    pub min_disconnect_age_secs: u64,
    /// 연도 없는 타임스탬프가 미래로 판정되는 허용 오차 (초)
    pub year_rollover_tolerance_secs: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            stale_session_secs: 300,
            sweep_interval_secs: 30,
            min_disconnect_age_secs: 10,
            year_rollover_tolerance_secs: 86_400,
        }
    }
}

/// 지오로케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// 활성화 여부 (비활성화 시 모든 시도는 Unknown 위치로 기록)
    pub enabled: bool,
    /// 제공자 우선순위 목록
    pub providers: Vec<String>,
    /// ipinfo.io API 토큰 (선택)
    pub ipinfo_token: String,
    /// 제공자 호출 타임아웃 (초)
    pub timeout_secs: u64,
    /// 캐시 TTL (초)
    pub cache_ttl_secs: u64,
    /// 캐시 최대 엔트리 수
    pub cache_max_entries: usize,
    /// 만료 캐시 정리 주기 (초)
    pub cache_prune_interval_secs: u64,
    /// 제공자 실패 시 백오프 시작값 (초)
    pub backoff_base_secs: u64,
    /// 제공자 백오프 상한 (초)
    pub backoff_max_secs: u64,
    /// 사설/루프백 주소는 조회하지 않음
    pub skip_private: bool,
    /// 동시 보강 작업 수
    pub max_concurrent: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: vec!["ipinfo".to_owned(), "ip-api".to_owned()],
            ipinfo_token: String::new(),
            timeout_secs: 5,
            cache_ttl_secs: 86_400,
            cache_max_entries: 100_000,
            cache_prune_interval_secs: 600,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
            skip_private: true,
            max_concurrent: 8,
        }
    }
}

/// 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 백엔드 (sqlite, memory)
    pub backend: String,
    /// SQLite 데이터베이스 경로
    pub db_path: String,
    /// 쓰기 1회당 타임아웃 (초)
    pub write_timeout_secs: u64,
    /// 쓰기 실패 시 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 시작값 (밀리초)
    pub retry_backoff_ms: u64,
    /// SQLite busy timeout (밀리초)
    pub busy_timeout_ms: u64,
    /// 통계 로그 주기 (초, 0이면 비활성화)
    pub stats_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_owned(),
            db_path: "/var/log/ssh_attempts.db".to_owned(),
            write_timeout_secs: 5,
            max_retries: 3,
            retry_backoff_ms: 200,
            busy_timeout_ms: 2000,
            stats_interval_secs: 300,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9105,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
