//! 파이프라인 trait: 모듈 생명주기 정의

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::SshwatchError;

/// dyn-compatible trait에서 사용하는 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하 (지오로케이션 불가 등)
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 기능 저하 상태인지 확인합니다.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 장기 실행 모듈의 생명주기 trait
///
/// 데몬은 이 trait을 통해 엔진을 시작/정지하고 상태를 조회합니다.
pub trait Pipeline: Send {
    /// 모듈을 시작합니다. 백그라운드 태스크를 스폰한 뒤 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), SshwatchError>> + Send;

    /// 모듈을 정지합니다. 처리 중인 데이터를 flush한 뒤 반환합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), SshwatchError>> + Send;

    /// 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded("geo".to_owned()).is_degraded());
        assert!(HealthStatus::Unhealthy("stopped".to_owned()).is_unhealthy());
    }

    #[test]
    fn health_status_display() {
        let status = HealthStatus::Degraded("all geo providers backing off".to_owned());
        assert_eq!(status.to_string(), "degraded: all geo providers backing off");
    }
}
