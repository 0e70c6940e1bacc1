//! sshwatch 트래커 엔진
//!
//! sshd 인증 로그를 실시간으로 따라가며 PID 단위로 로그 라인을 묶어
//! SSH 접속 시도([`Attempt`](sshwatch_core::types::Attempt))를 만들고,
//! 지오로케이션으로 보강한 뒤 저장소에 정확히 한 번 기록합니다.
//!
//! # 모듈 구성
//!
//! - [`source`]: 로그 파일 tail, 로테이션 감지, 읽기 위치 체크포인트
//! - [`parser`]: sshd 로그 라인 분류 (BSD syslog / RFC 3339 헤더)
//! - [`correlator`]: PID별 세션 상태 관리 및 시도 생성
//! - [`geo`]: 캐시와 제공자 폴백을 갖춘 지오로케이션 리졸버
//! - [`sink`]: 재시도/타임아웃을 갖춘 저장소 기록 (SQLite, 인메모리)
//! - [`engine`]: 전체 흐름 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 엔진 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! LogSource -> SshdParser -> Correlator -> GeoResolver -> AttemptSink
//!     |             |             |             |              |
//!  tail -F      정규식 테이블   PID 세션 맵   TTL 캐시 + 폴백   멱등 upsert
//! ```

pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod geo;
pub mod parser;
pub mod sink;
pub mod source;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{AttemptEngine, AttemptEngineBuilder, EngineStats};

// 설정
pub use config::{TrackerConfig, TrackerConfigBuilder};

// 에러
pub use error::{GeoError, StoreError, TrackerError};

// 소스
pub use source::{LogPosition, LogSource, PositionStore};

// 파서
pub use parser::{EventKind, RawEvent, SshdParser};

// 상관 분석기
pub use correlator::{Correlator, SessionConfig};

// 지오로케이션
pub use geo::{DynGeoProvider, GeoProvider, GeoResolver, ResolverConfig};

// 싱크
pub use sink::{AttemptSink, AttemptStore, MemoryStore, SinkOutcome, SqliteStore};
