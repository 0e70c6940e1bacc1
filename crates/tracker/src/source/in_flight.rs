//! 저장되지 않은 시도의 원본 위치 추적
//!
//! 상관 분석기가 시도를 내보낸 순간부터 싱크가 결과(기록/중복/드롭)를 낼 때까지
//! 그 시도를 만든 라인의 위치를 [`PositionHold`]로 붙잡아 둡니다.
//! 체크포인트는 붙잡힌 위치 중 가장 작은 오프셋을 넘지 않으므로,
//! 보강/저장 도중 프로세스가 죽어도 재시작 후 해당 라인을 다시 읽습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::position::{FileIdentity, LogPosition};

#[derive(Debug, Default)]
struct Holds {
    next_id: u64,
    positions: HashMap<u64, LogPosition>,
}

/// 처리 중인 시도의 원본 위치 집합
#[derive(Debug, Default)]
pub struct InFlightPositions {
    holds: Mutex<Holds>,
    idle: Notify,
}

impl InFlightPositions {
    /// 빈 집합을 생성합니다.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 위치를 붙잡습니다. 반환된 hold가 drop되면 해제됩니다.
    pub fn hold(self: &Arc<Self>, position: LogPosition) -> PositionHold {
        let mut holds = self.lock();
        let id = holds.next_id;
        holds.next_id += 1;
        holds.positions.insert(id, position);
        PositionHold {
            owner: Arc::clone(self),
            id,
        }
    }

    /// 주어진 파일에서 붙잡힌 가장 작은 오프셋
    pub fn low_watermark(&self, identity: FileIdentity) -> Option<u64> {
        self.lock()
            .positions
            .values()
            .filter(|pos| pos.identity == identity)
            .map(|pos| pos.offset)
            .min()
    }

    /// 붙잡힌 위치 수
    pub fn len(&self) -> usize {
        self.lock().positions.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 hold가 해제될 때까지 기다립니다.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 검사 전에 등록해야 그 사이의 해제 알림을 놓치지 않음
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Holds> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: u64) {
        let now_empty = {
            let mut holds = self.lock();
            holds.positions.remove(&id);
            holds.positions.is_empty()
        };
        if now_empty {
            self.idle.notify_waiters();
        }
    }
}

/// 붙잡힌 위치 하나. drop 시 해제됩니다.
#[derive(Debug)]
pub struct PositionHold {
    owner: Arc<InFlightPositions>,
    id: u64,
}

impl Drop for PositionHold {
    fn drop(&mut self) {
        self.owner.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FILE: FileIdentity = FileIdentity { dev: 1, ino: 10 };

    #[test]
    fn low_watermark_is_smallest_live_hold() {
        let in_flight = InFlightPositions::new();
        assert_eq!(in_flight.low_watermark(FILE), None);

        let late = in_flight.hold(LogPosition::new(FILE, 300));
        let early = in_flight.hold(LogPosition::new(FILE, 100));
        let _rotated = in_flight.hold(LogPosition::new(FileIdentity { dev: 1, ino: 9 }, 5));
        assert_eq!(in_flight.low_watermark(FILE), Some(100));

        drop(early);
        assert_eq!(in_flight.low_watermark(FILE), Some(300));
        drop(late);
        assert_eq!(in_flight.low_watermark(FILE), None);
        assert_eq!(in_flight.len(), 1);
    }

    #[test]
    fn same_position_held_twice_needs_both_releases() {
        let in_flight = InFlightPositions::new();
        let a = in_flight.hold(LogPosition::new(FILE, 42));
        let b = in_flight.hold(LogPosition::new(FILE, 42));
        drop(a);
        assert_eq!(in_flight.low_watermark(FILE), Some(42));
        drop(b);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_empty() {
        let in_flight = InFlightPositions::new();
        tokio::time::timeout(Duration::from_secs(1), in_flight.wait_idle())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_idle_wakes_after_last_release() {
        let in_flight = InFlightPositions::new();
        let hold = in_flight.hold(LogPosition::new(FILE, 0));

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move { in_flight.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(hold);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
