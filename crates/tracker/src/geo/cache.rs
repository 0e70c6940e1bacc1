//! IP별 지오로케이션 캐시
//!
//! TTL이 지난 항목은 조회 시 없는 것으로 취급하며, 주기적 [`GeoCache::prune`]로
//! 제거됩니다. 용량이 가득 차면 만료 항목을 먼저 정리하고, 그래도 부족하면
//! 가장 오래된 항목을 내보냅니다.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use sshwatch_core::types::GeoLocation;
use tokio::time::Instant;

struct CacheEntry {
    location: GeoLocation,
    resolved_at: Instant,
}

/// 크기 제한이 있는 TTL 캐시
pub struct GeoCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<IpAddr, CacheEntry>>,
}

impl GeoCache {
    /// 새 캐시를 생성합니다.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 만료되지 않은 항목을 반환합니다.
    pub fn get(&self, ip: &IpAddr) -> Option<GeoLocation> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(ip)
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .map(|entry| entry.location.clone())
    }

    /// 항목을 저장합니다.
    pub fn insert(&self, ip: IpAddr, location: GeoLocation) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if !entries.contains_key(&ip) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.resolved_at.elapsed() < ttl);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.resolved_at)
                    .map(|(ip, _)| *ip);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            ip,
            CacheEntry {
                location,
                resolved_at: Instant::now(),
            },
        );
    }

    /// 만료된 항목을 제거하고 제거된 수를 반환합니다.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.resolved_at.elapsed() < ttl);
        before - entries.len()
    }

    /// 저장된 항목 수 (만료 항목 포함)
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
