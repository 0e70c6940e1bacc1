//! 지오로케이션 리졸버 -- IP를 국가/도시/ISP로 보강합니다.
//!
//! [`GeoResolver::resolve`]는 실패하지 않습니다. 모든 제공자가 실패하면
//! [`GeoLocation::unknown()`]을 반환하며, 이 결과는 캐시하지 않습니다.
//!
//! # 조회 순서
//! 1. 비활성화 또는 (skip_private일 때) 비공인 주소 -> Unknown
//! 2. 캐시 적중 -> 캐시 값
//! 3. 같은 IP를 조회 중인 작업이 있으면 그 결과를 공유
//! 4. 우선순위 순서로 제공자 호출 (백오프 중인 제공자는 건너뜀)
//!
//! 제공자가 실패하면 지수 백오프(`backoff_base * 2^(n-1)`, 상한 `backoff_max`)가
//! 적용되고, 성공하면 초기화됩니다.

pub mod cache;
pub mod provider;

pub use cache::GeoCache;
pub use provider::{DynGeoProvider, GeoProvider, IpApiProvider, IpInfoProvider, build_providers};

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::counter;
use sshwatch_core::metrics as m;
use sshwatch_core::types::GeoLocation;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GeoError;

/// 리졸버 설정
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// 활성화 여부 (false이면 항상 Unknown)
    pub enabled: bool,
    /// 제공자 호출 타임아웃
    pub lookup_timeout: Duration,
    /// 캐시 TTL
    pub cache_ttl: Duration,
    /// 캐시 최대 엔트리 수
    pub cache_max_entries: usize,
    /// 백오프 시작값
    pub backoff_base: Duration,
    /// 백오프 상한
    pub backoff_max: Duration,
    /// 사설/예약 주소 조회 생략
    pub skip_private: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(86_400),
            cache_max_entries: 100_000,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            skip_private: true,
        }
    }
}

#[derive(Default)]
struct Backoff {
    failures: u32,
    until: Option<Instant>,
}

struct ProviderSlot {
    provider: Arc<dyn DynGeoProvider>,
    backoff: Mutex<Backoff>,
}

impl ProviderSlot {
    fn is_backing_off(&self, now: Instant) -> bool {
        let backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        backoff.until.is_some_and(|until| now < until)
    }

    fn record_success(&self) {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        *backoff = Backoff::default();
    }

    fn record_failure(&self, base: Duration, max: Duration) -> Duration {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        backoff.failures = backoff.failures.saturating_add(1);
        let exponent = backoff.failures.saturating_sub(1).min(31);
        let delay = base.saturating_mul(1u32 << exponent).min(max);
        backoff.until = Some(Instant::now() + delay);
        delay
    }
}

enum Role {
    Leader(watch::Sender<Option<GeoLocation>>),
    Follower(watch::Receiver<Option<GeoLocation>>),
}

/// 리더가 완료/취소되면 진행 중 표시를 제거합니다.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<IpAddr, watch::Receiver<Option<GeoLocation>>>>,
    ip: IpAddr,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.ip);
    }
}

/// 캐시와 제공자 폴백을 갖춘 지오로케이션 리졸버
///
/// 여러 보강 작업이 `Arc<GeoResolver>`로 공유합니다.
pub struct GeoResolver {
    config: ResolverConfig,
    providers: Vec<ProviderSlot>,
    cache: GeoCache,
    in_flight: Mutex<HashMap<IpAddr, watch::Receiver<Option<GeoLocation>>>>,
}

impl GeoResolver {
    /// 새 리졸버를 생성합니다. `providers`의 순서가 우선순위입니다.
    pub fn new(config: ResolverConfig, providers: Vec<Arc<dyn DynGeoProvider>>) -> Self {
        let cache = GeoCache::new(config.cache_ttl, config.cache_max_entries);
        Self {
            config,
            providers: providers
                .into_iter()
                .map(|provider| ProviderSlot {
                    provider,
                    backoff: Mutex::new(Backoff::default()),
                })
                .collect(),
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// IP의 위치를 조회합니다. 실패하면 Unknown을 반환합니다.
    pub async fn resolve(&self, ip: IpAddr) -> GeoLocation {
        if !self.config.enabled || self.providers.is_empty() {
            return GeoLocation::unknown();
        }
        if self.config.skip_private && !is_public(ip) {
            debug!(ip = %ip, "skipping geolocation for non-public address");
            return GeoLocation::unknown();
        }

        loop {
            if let Some(location) = self.cache.get(&ip) {
                counter!(m::GEO_CACHE_HITS_TOTAL).increment(1);
                return location;
            }

            let role = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                match in_flight.get(&ip) {
                    Some(rx) => Role::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(ip, rx);
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => {
                    let _guard = InFlightGuard {
                        in_flight: &self.in_flight,
                        ip,
                    };
                    let location = self.query_providers(ip).await;
                    if !location.is_unknown() {
                        self.cache.insert(ip, location.clone());
                    }
                    let _ = tx.send(Some(location.clone()));
                    return location;
                }
                Role::Follower(mut rx) => {
                    let shared = rx
                        .wait_for(Option::is_some)
                        .await
                        .map(|value| (*value).clone());
                    match shared {
                        Ok(Some(location)) => return location,
                        // 리더가 취소됨: 처음부터 다시 시도
                        Ok(None) | Err(_) => continue,
                    }
                }
            }
        }
    }

    async fn query_providers(&self, ip: IpAddr) -> GeoLocation {
        let timeout = self.config.lookup_timeout;

        for slot in &self.providers {
            let name = slot.provider.name();
            if slot.is_backing_off(Instant::now()) {
                debug!(provider = name, "provider backing off, skipping");
                continue;
            }

            let result = match tokio::time::timeout(timeout, slot.provider.lookup(ip)).await {
                Ok(result) => result,
                Err(_) => Err(GeoError::Timeout {
                    provider: name,
                    timeout,
                }),
            };

            match result {
                Ok(location) => {
                    slot.record_success();
                    counter!(m::GEO_PROVIDER_CALLS_TOTAL, m::LABEL_PROVIDER => name, m::LABEL_RESULT => "success")
                        .increment(1);
                    return location;
                }
                Err(e) => {
                    let delay = slot.record_failure(self.config.backoff_base, self.config.backoff_max);
                    counter!(m::GEO_PROVIDER_CALLS_TOTAL, m::LABEL_PROVIDER => name, m::LABEL_RESULT => "failure")
                        .increment(1);
                    warn!(
                        provider = name,
                        ip = %ip,
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "geolocation provider failed"
                    );
                }
            }
        }

        counter!(m::GEO_UNKNOWN_TOTAL).increment(1);
        GeoLocation::unknown()
    }

    /// 만료된 캐시 항목을 제거합니다.
    pub fn prune_cache(&self) -> usize {
        self.cache.prune()
    }

    /// 캐시 항목 수
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// 조회가 활성화되어 있고 모든 제공자가 백오프 중인지 확인합니다.
    pub fn all_providers_backing_off(&self) -> bool {
        if !self.config.enabled || self.providers.is_empty() {
            return false;
        }
        let now = Instant::now();
        self.providers.iter().all(|slot| slot.is_backing_off(now))
    }
}

/// 공인 주소인지 확인합니다.
///
/// 사설, 루프백, 링크 로컬, CGNAT(100.64/10), 문서용, 브로드캐스트,
/// 미지정, 유니크 로컬(fc00::/7) 주소는 공인 주소가 아닙니다.
pub fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (b & 0b1100_0000) == 64;
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || shared
        || a == 0)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || unique_local
        || link_local
        || documentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Behavior {
        Succeed(&'static str),
        Fail,
        Slow(Duration, &'static str),
    }

    struct MockProvider {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    impl MockProvider {
        fn new(name: &'static str, behavior: Behavior) -> (Arc<dyn DynGeoProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                name,
                calls: Arc::clone(&calls),
                behavior,
            };
            (Arc::new(provider), calls)
        }
    }

    fn location(country: &str) -> GeoLocation {
        GeoLocation {
            country: country.to_owned(),
            city: "City".to_owned(),
            isp: "ISP".to_owned(),
        }
    }

    impl GeoProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior.clone() {
                Behavior::Succeed(country) => Ok(location(country)),
                Behavior::Fail => Err(GeoError::Status {
                    provider: self.name,
                    status: 429,
                }),
                Behavior::Slow(delay, country) => {
                    tokio::time::sleep(delay).await;
                    Ok(location(country))
                }
            }
        }
    }

    fn public_ip() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_avoids_second_call() {
        let (provider, calls) = MockProvider::new("a", Behavior::Succeed("US"));
        let resolver = GeoResolver::new(ResolverConfig::default(), vec![provider]);

        assert_eq!(resolver.resolve(public_ip()).await.country, "US");
        assert_eq!(resolver.resolve(public_ip()).await.country, "US");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_within_ttl_then_refreshed_after_expiry() {
        let (provider, calls) = MockProvider::new("a", Behavior::Succeed("US"));
        let config = ResolverConfig {
            cache_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![provider]);

        resolver.resolve(public_ip()).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(resolver.resolve(public_ip()).await.country, "US");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        resolver.resolve(public_ip()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_next_provider() {
        let (first, first_calls) = MockProvider::new("first", Behavior::Fail);
        let (second, second_calls) = MockProvider::new("second", Behavior::Succeed("JP"));
        let resolver = GeoResolver::new(ResolverConfig::default(), vec![first, second]);

        assert_eq!(resolver.resolve(public_ip()).await.country, "JP");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_yield_unknown_and_are_not_cached() {
        let (provider, calls) = MockProvider::new("a", Behavior::Fail);
        let config = ResolverConfig {
            backoff_base: Duration::from_secs(5),
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![provider]);

        assert!(resolver.resolve(public_ip()).await.is_unknown());
        assert_eq!(resolver.cache_len(), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(resolver.resolve(public_ip()).await.is_unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_provider_backs_off_exponentially() {
        let (provider, calls) = MockProvider::new("a", Behavior::Fail);
        let config = ResolverConfig {
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![provider]);

        resolver.resolve(public_ip()).await;
        assert!(resolver.all_providers_backing_off());

        // 백오프 중에는 호출하지 않음
        resolver.resolve(public_ip()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        resolver.resolve(public_ip()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 두 번째 실패: 10초 백오프
        tokio::time::advance(Duration::from_secs(5)).await;
        resolver.resolve(public_ip()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        resolver.resolve(public_ip()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let (slow, _) = MockProvider::new("slow", Behavior::Slow(Duration::from_secs(30), "XX"));
        let (fast, _) = MockProvider::new("fast", Behavior::Succeed("FR"));
        let config = ResolverConfig {
            lookup_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![slow, fast]);

        assert_eq!(resolver.resolve(public_ip()).await.country, "FR");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_are_coalesced() {
        let (provider, calls) = MockProvider::new("a", Behavior::Slow(Duration::from_secs(1), "BR"));
        let resolver = Arc::new(GeoResolver::new(ResolverConfig::default(), vec![provider]));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move { resolver.resolve(public_ip()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().country, "BR");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_lets_follower_retry() {
        let (provider, calls) = MockProvider::new("a", Behavior::Slow(Duration::from_secs(1), "CA"));
        let resolver = Arc::new(GeoResolver::new(ResolverConfig::default(), vec![provider]));

        let leader = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(public_ip()).await })
        };
        tokio::task::yield_now().await;

        let follower = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(public_ip()).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        assert_eq!(follower.await.unwrap().country, "CA");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn private_addresses_are_skipped() {
        let (provider, calls) = MockProvider::new("a", Behavior::Succeed("US"));
        let resolver = GeoResolver::new(ResolverConfig::default(), vec![provider]);

        for ip in ["10.0.0.5", "192.168.1.1", "127.0.0.1", "100.64.1.1", "fe80::1", "fd00::1"] {
            assert!(resolver.resolve(ip.parse().unwrap()).await.is_unknown(), "{ip}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn private_addresses_resolved_when_not_skipped() {
        let (provider, calls) = MockProvider::new("a", Behavior::Succeed("US"));
        let config = ResolverConfig {
            skip_private: false,
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![provider]);

        assert_eq!(resolver.resolve("10.0.0.5".parse().unwrap()).await.country, "US");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_resolver_returns_unknown() {
        let (provider, calls) = MockProvider::new("a", Behavior::Succeed("US"));
        let config = ResolverConfig {
            enabled: false,
            ..Default::default()
        };
        let resolver = GeoResolver::new(config, vec![provider]);

        assert!(resolver.resolve(public_ip()).await.is_unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!resolver.all_providers_backing_off());
    }

    #[test]
    fn public_address_classification() {
        assert!(is_public("8.8.8.8".parse().unwrap()));
        assert!(is_public("2606:4700::1111".parse().unwrap()));
        assert!(is_public("::ffff:1.1.1.1".parse().unwrap()));
        assert!(!is_public("::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_public("192.0.2.1".parse().unwrap()));
        assert!(!is_public("2001:db8::1".parse().unwrap()));
        assert!(!is_public("0.0.0.0".parse().unwrap()));
    }
}
