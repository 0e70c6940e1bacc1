//! 로그 소스 모듈 -- 감시 중인 인증 로그에서 완전한 라인을 읽습니다.
//!
//! - [`LogSource`]: 단일 파일 tail, 로테이션/트렁케이션 감지
//! - [`PositionStore`]: 재시작을 위한 읽기 위치 체크포인트
//! - [`InFlightPositions`]: 아직 저장되지 않은 시도의 원본 위치
//!
//! # 아키텍처
//! 소스는 엔진의 수집 태스크가 단독으로 소유합니다. 채널 없이
//! `next_line()`을 직접 호출하며, 라인은 같은 태스크에서 파싱/상관 분석됩니다.

pub mod file;
pub mod in_flight;
pub mod position;

pub use file::{FileSourceConfig, LogSource, ReadOutcome, SourceLine};
pub use in_flight::{InFlightPositions, PositionHold};
pub use position::{FileIdentity, LogPosition, PositionStore};
