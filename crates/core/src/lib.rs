//! sshwatch 공통 크레이트
//!
//! 트래커 엔진과 데몬이 공유하는 설정, 에러, 도메인 타입,
//! 파이프라인 생명주기 trait, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, PipelineError, SshwatchError, StorageError};

// 설정
pub use config::SshwatchConfig;

// 파이프라인 trait
pub use pipeline::{BoxFuture, HealthStatus, Pipeline};

// 도메인 타입
pub use types::{Attempt, AttemptStats, FailureReason, GeoLocation};
