//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 트래커 엔진은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `sshwatch_`
//! - 컴포넌트명: `source_`, `parser_`, `correlator_`, `geo_`, `sink_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(sshwatch_core::metrics::SOURCE_LINES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 지오로케이션 제공자 레이블 키 (ipinfo, ip-api)
pub const LABEL_PROVIDER: &str = "provider";

// ─── Line Source 메트릭 ─────────────────────────────────────────────

/// Source: 읽은 로그 라인 수 (counter)
pub const SOURCE_LINES_READ_TOTAL: &str = "sshwatch_source_lines_read_total";

/// Source: 로테이션/트렁케이션 감지 횟수 (counter)
pub const SOURCE_ROTATIONS_TOTAL: &str = "sshwatch_source_rotations_total";

/// Source: 일시적 읽기 에러 수 (counter)
pub const SOURCE_READ_ERRORS_TOTAL: &str = "sshwatch_source_read_errors_total";

// ─── Parser 메트릭 ──────────────────────────────────────────────────

/// Parser: 인식하지 못한 라인 수 (counter)
pub const PARSER_UNPARSED_TOTAL: &str = "sshwatch_parser_unparsed_total";

// ─── Correlator 메트릭 ──────────────────────────────────────────────

/// Correlator: 생성된 시도 수 (counter, label: result)
pub const CORRELATOR_ATTEMPTS_TOTAL: &str = "sshwatch_correlator_attempts_total";

/// Correlator: 현재 대기 중인 세션 수 (gauge)
pub const CORRELATOR_PENDING_SESSIONS: &str = "sshwatch_correlator_pending_sessions";

/// Correlator: 스윕으로 제거된 세션 수 (counter)
pub const CORRELATOR_EVICTED_TOTAL: &str = "sshwatch_correlator_evicted_total";

// ─── Geo 메트릭 ─────────────────────────────────────────────────────

/// Geo: 캐시 적중 수 (counter)
pub const GEO_CACHE_HITS_TOTAL: &str = "sshwatch_geo_cache_hits_total";

/// Geo: 제공자 호출 수 (counter, labels: provider, result)
pub const GEO_PROVIDER_CALLS_TOTAL: &str = "sshwatch_geo_provider_calls_total";

/// Geo: 모든 제공자 실패로 Unknown 처리된 수 (counter)
pub const GEO_UNKNOWN_TOTAL: &str = "sshwatch_geo_unknown_total";

// ─── Sink 메트릭 ────────────────────────────────────────────────────

/// Sink: 새로 기록된 시도 수 (counter)
pub const SINK_RECORDED_TOTAL: &str = "sshwatch_sink_recorded_total";

/// Sink: 중복으로 무시된 시도 수 (counter)
pub const SINK_DUPLICATES_TOTAL: &str = "sshwatch_sink_duplicates_total";

/// Sink: 재시도 소진으로 드롭된 시도 수 (counter)
pub const SINK_DROPPED_TOTAL: &str = "sshwatch_sink_dropped_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "sshwatch_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "sshwatch_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Source
    describe_counter!(
        SOURCE_LINES_READ_TOTAL,
        "Total number of complete lines read from the monitored log"
    );
    describe_counter!(
        SOURCE_ROTATIONS_TOTAL,
        "Number of rotations or truncations detected on the monitored log"
    );
    describe_counter!(
        SOURCE_READ_ERRORS_TOTAL,
        "Number of transient read errors on the monitored log"
    );

    // Parser
    describe_counter!(
        PARSER_UNPARSED_TOTAL,
        "Number of lines that matched no known sshd pattern"
    );

    // Correlator
    describe_counter!(
        CORRELATOR_ATTEMPTS_TOTAL,
        "Number of completed attempts emitted by the correlator"
    );
    describe_gauge!(
        CORRELATOR_PENDING_SESSIONS,
        "Number of sessions awaiting an authentication outcome"
    );
    describe_counter!(
        CORRELATOR_EVICTED_TOTAL,
        "Number of stale sessions evicted by the sweep"
    );

    // Geo
    describe_counter!(GEO_CACHE_HITS_TOTAL, "Geolocation cache hits");
    describe_counter!(
        GEO_PROVIDER_CALLS_TOTAL,
        "Geolocation provider calls by provider and result"
    );
    describe_counter!(
        GEO_UNKNOWN_TOTAL,
        "Resolutions that fell back to Unknown after all providers failed"
    );

    // Sink
    describe_counter!(SINK_RECORDED_TOTAL, "Attempts inserted into storage");
    describe_counter!(
        SINK_DUPLICATES_TOTAL,
        "Attempts skipped because the natural key already existed"
    );
    describe_counter!(
        SINK_DROPPED_TOTAL,
        "Attempts dropped after exhausting storage retries"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1)");
}
