//! 엔진 오케스트레이션 -- 수집/파싱/상관 분석/보강/저장의 전체 흐름을 관리합니다.
//!
//! [`AttemptEngine`]은 core의 [`Pipeline`] trait을 구현하여
//! `sshwatch-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! ┌──────────── ingest task ────────────┐             ┌──── enrichment task ────┐
//! │ LogSource -> SshdParser -> Correlator│ -- mpsc --> │ JoinSet + Semaphore     │
//! │      (sweep / checkpoint ticker)     │   Attempt   │ GeoResolver -> Sink     │
//! └──────────────────────────────────────┘             └─────────────────────────┘
//!                                                        stats task (주기적 집계 로그)
//! ```
//!
//! 수집 태스크는 소스, 파서, 상관 분석기를 단독으로 소유하므로 잠금이 없습니다.
//! 보강/저장은 동시에 진행되므로 시도는 도착 순서와 다르게 저장될 수 있습니다.
//!
//! # 체크포인트
//! 저장 위치는 읽은 위치, 미종결 세션의 시작 위치, 아직 저장되지 않은 시도의
//! 원본 위치([`InFlightPositions`]) 중 가장 작은 값입니다. 시도는 싱크가
//! 결과를 낸 뒤에만 체크포인트 진행을 허용합니다.
//!
//! # 종료 순서
//! 1. 취소 토큰 발동 -> 수집 태스크가 읽기를 멈추고 처리 중인 시도를 포함한 위치를 저장
//! 2. 시도 채널이 닫히면 보강 태스크가 남은 시도를 모두 기록
//! 3. 수집 태스크는 처리 중인 시도가 모두 끝나면 위치를 다시 저장
//! 4. 전체 과정은 `shutdown_timeout_secs`로 제한되며, 초과 시 태스크를 중단
//!    (중단되어도 1단계의 위치가 남으므로 재시작 후 다시 읽음)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use sshwatch_core::error::{PipelineError, SshwatchError};
use sshwatch_core::metrics as m;
use sshwatch_core::pipeline::{HealthStatus, Pipeline};
use sshwatch_core::types::Attempt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::correlator::Correlator;
use crate::error::TrackerError;
use crate::geo::{DynGeoProvider, GeoResolver, build_providers};
use crate::parser::SshdParser;
use crate::sink::{AttemptSink, AttemptStore, SinkOutcome};
use crate::source::{
    InFlightPositions, LogPosition, LogSource, PositionHold, PositionStore, SourceLine,
};

/// 엔진 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 엔진 처리 카운터
///
/// 태스크 간에 공유되며 언제든 읽을 수 있습니다.
#[derive(Debug, Default)]
pub struct EngineStats {
    lines_read: AtomicU64,
    unparsed: AtomicU64,
    attempts_emitted: AtomicU64,
    recorded: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    geo_unknown: AtomicU64,
}

impl EngineStats {
    /// 읽은 라인 수
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    /// 인식하지 못한 라인 수
    pub fn unparsed(&self) -> u64 {
        self.unparsed.load(Ordering::Relaxed)
    }

    /// 상관 분석기가 생성한 시도 수
    pub fn attempts_emitted(&self) -> u64 {
        self.attempts_emitted.load(Ordering::Relaxed)
    }

    /// 새로 저장된 시도 수
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// 이미 저장되어 있던 시도 수
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// 저장 실패로 버려진 시도 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 위치를 알 수 없는 시도 수
    pub fn geo_unknown(&self) -> u64 {
        self.geo_unknown.load(Ordering::Relaxed)
    }

    /// 보강 단계를 마친 시도 수 (저장 + 중복 + 드롭)
    pub fn completed(&self) -> u64 {
        self.recorded() + self.duplicates() + self.dropped()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// SSH 접속 시도 엔진
///
/// # 사용 예시
/// ```ignore
/// use std::sync::Arc;
/// use sshwatch_tracker::{AttemptEngineBuilder, SqliteStore};
///
/// let store = Arc::new(SqliteStore::open("/var/log/ssh_attempts.db", busy_timeout)?);
/// let mut engine = AttemptEngineBuilder::new()
///     .config(config)
///     .store(store)
///     .build()?;
///
/// engine.start().await?;
/// ```
pub struct AttemptEngine {
    config: TrackerConfig,
    state: EngineState,
    resolver: Arc<GeoResolver>,
    sink: Arc<AttemptSink>,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
    ingest_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl AttemptEngine {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    /// 처리 카운터를 반환합니다.
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// 지오로케이션 리졸버를 반환합니다.
    pub fn resolver(&self) -> &Arc<GeoResolver> {
        &self.resolver
    }

    /// 엔진 설정을 반환합니다.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    async fn spawn_tasks(&mut self) -> Result<(), TrackerError> {
        let positions = PositionStore::new(&self.config.position_file);
        let checkpoint = positions.load().await?;
        if let Some(pos) = &checkpoint {
            info!(
                path = %positions.path().display(),
                offset = pos.offset,
                "loaded position checkpoint"
            );
        }

        let source = LogSource::open(self.config.file_source_config(), checkpoint).await?;
        let parser = SshdParser::new()?
            .with_max_line_length(self.config.max_line_length)
            .with_year_tolerance(Duration::from_secs(self.config.year_rollover_tolerance_secs));
        let correlator = Correlator::new(self.config.session_config());

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        let (attempt_tx, attempt_rx) = mpsc::channel(self.config.attempt_channel_capacity);
        let in_flight = InFlightPositions::new();

        let ingest = IngestTask {
            source,
            parser,
            correlator,
            positions,
            last_saved: checkpoint,
            attempt_tx,
            in_flight,
            stats: Arc::clone(&self.stats),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
        };
        let sweep = ticker(Duration::from_secs(self.config.sweep_interval_secs));
        let checkpoint_tick = ticker(Duration::from_secs(self.config.checkpoint_interval_secs));
        self.ingest_task = Some(tokio::spawn(ingest.run(
            cancel.clone(),
            sweep,
            checkpoint_tick,
        )));

        let enrichment = EnrichmentTask {
            resolver: Arc::clone(&self.resolver),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
            semaphore: Arc::new(Semaphore::new(self.config.max_concurrent)),
        };
        let prune = ticker(Duration::from_secs(self.config.cache_prune_interval_secs));
        self.tasks.push(tokio::spawn(enrichment.run(attempt_rx, prune)));

        if self.config.stats_interval_secs > 0 {
            let sink = Arc::clone(&self.sink);
            let interval = ticker(Duration::from_secs(self.config.stats_interval_secs));
            self.tasks
                .push(tokio::spawn(log_stats_periodically(sink, interval, cancel)));
        }

        Ok(())
    }
}

impl Pipeline for AttemptEngine {
    async fn start(&mut self) -> Result<(), SshwatchError> {
        if self.state == EngineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            path = %self.config.source_path,
            store = self.sink.store_name(),
            geo_enabled = self.config.geo_enabled,
            "starting attempt engine"
        );

        self.spawn_tasks().await?;

        self.state = EngineState::Running;
        info!("attempt engine started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SshwatchError> {
        if self.state != EngineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping attempt engine");
        self.cancel.cancel();

        let mut handles: Vec<JoinHandle<()>> = self.ingest_task.take().into_iter().collect();
        handles.append(&mut self.tasks);
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let wait_all = async move {
            for handle in handles {
                if let Err(e) = handle.await
                    && !e.is_cancelled()
                {
                    error!(error = %e, "engine task failed");
                }
            }
        };

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "engine did not drain in time, aborting remaining tasks"
            );
            for handle in abort_handles {
                handle.abort();
            }
        }

        self.state = EngineState::Stopped;
        info!(
            lines_read = self.stats.lines_read(),
            recorded = self.stats.recorded(),
            duplicates = self.stats.duplicates(),
            dropped = self.stats.dropped(),
            "attempt engine stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EngineState::Running => {
                if self.ingest_task.as_ref().is_none_or(JoinHandle::is_finished) {
                    HealthStatus::Unhealthy("ingest task terminated".to_owned())
                } else if self.sink.last_write_failed() {
                    HealthStatus::Degraded("last storage write failed".to_owned())
                } else if self.resolver.all_providers_backing_off() {
                    HealthStatus::Degraded("all geolocation providers backing off".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            EngineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 첫 틱이 즉시 발생하지 않는 인터벌을 생성합니다.
fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

// ─── ingest task ────────────────────────────────────────────────────

struct IngestTask {
    source: LogSource,
    parser: SshdParser,
    correlator: Correlator,
    positions: PositionStore,
    last_saved: Option<LogPosition>,
    attempt_tx: mpsc::Sender<QueuedAttempt>,
    in_flight: Arc<InFlightPositions>,
    stats: Arc<EngineStats>,
    poll_interval: Duration,
}

/// 보강 태스크로 넘어가는 시도와 그 원본 위치 hold
struct QueuedAttempt {
    attempt: Attempt,
    hold: PositionHold,
}

impl IngestTask {
    async fn run(mut self, cancel: CancellationToken, mut sweep: Interval, mut checkpoint: Interval) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    // 만료 세션의 시작 위치는 스윕 전 체크포인트 위치보다 앞서지 않음
                    let origin = self.checkpoint_position();
                    for attempt in self.correlator.sweep() {
                        self.emit(attempt, origin).await;
                    }
                }
                _ = checkpoint.tick() => self.save_checkpoint().await,
                line = self.source.next_line() => match line {
                    Ok(line) => self.handle_line(line).await,
                    Err(e) => {
                        warn!(path = %self.source.path().display(), error = %e, "log read failed, retrying");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                },
            }
        }

        // 처리 중인 시도의 위치를 포함해 먼저 저장 (이후 중단되어도 유실 없음)
        self.save_checkpoint().await;

        // 보강 태스크는 채널이 열려 있는 동안 남은 시도를 계속 처리함
        if !self.in_flight.is_empty() {
            debug!(
                in_flight = self.in_flight.len(),
                "waiting for in-flight attempts before final checkpoint"
            );
        }
        self.in_flight.wait_idle().await;

        // 미종결 세션의 시작 위치가 반영되도록 drain 전에 저장
        self.save_checkpoint().await;
        let discarded = self.correlator.drain();
        if discarded > 0 {
            info!(sessions = discarded, "discarding pending sessions, they will be re-read on restart");
        }
        debug!("ingest task finished");
    }

    async fn handle_line(&mut self, line: SourceLine) {
        EngineStats::bump(&self.stats.lines_read);

        let event = self.parser.parse(&line.text);
        if !event.is_parsed() {
            EngineStats::bump(&self.stats.unparsed);
            counter!(m::PARSER_UNPARSED_TOTAL).increment(1);
            return;
        }

        // 종결된 시도는 세션을 연 라인부터 다시 읽어야 재현됨
        let origin = match event.pid.and_then(|pid| self.correlator.session_origin(pid)) {
            Some(session)
                if session.identity == line.position.identity
                    && session.offset < line.position.offset =>
            {
                session
            }
            _ => line.position,
        };
        if let Some(attempt) = self.correlator.ingest(event, Some(line.position)) {
            self.emit(attempt, origin).await;
        }
    }

    async fn emit(&mut self, attempt: Attempt, origin: LogPosition) {
        EngineStats::bump(&self.stats.attempts_emitted);
        let queued = QueuedAttempt {
            attempt,
            hold: self.in_flight.hold(origin),
        };
        if self.attempt_tx.send(queued).await.is_err() {
            warn!("enrichment task is gone, attempt discarded");
        }
    }

    /// 체크포인트 위치: 읽은 위치, 미종결 세션과 처리 중인 시도의 시작 위치 중 가장 작은 값
    fn checkpoint_position(&self) -> LogPosition {
        let current = self.source.position();
        [
            self.correlator.low_watermark(current.identity),
            self.in_flight.low_watermark(current.identity),
        ]
        .into_iter()
        .flatten()
        .filter(|&low| low < current.offset)
        .min()
        .map_or(current, |low| LogPosition::new(current.identity, low))
    }

    async fn save_checkpoint(&mut self) {
        let position = self.checkpoint_position();
        if self.last_saved == Some(position) {
            return;
        }
        match self.positions.save(&position).await {
            Ok(()) => {
                debug!(offset = position.offset, "position checkpoint saved");
                self.last_saved = Some(position);
            }
            Err(e) => warn!(error = %e, "failed to save position checkpoint"),
        }
    }
}

// ─── enrichment task ────────────────────────────────────────────────

struct EnrichmentTask {
    resolver: Arc<GeoResolver>,
    sink: Arc<AttemptSink>,
    stats: Arc<EngineStats>,
    semaphore: Arc<Semaphore>,
}

impl EnrichmentTask {
    async fn run(self, mut attempt_rx: mpsc::Receiver<QueuedAttempt>, mut prune: Interval) {
        let mut jobs = JoinSet::new();

        loop {
            tokio::select! {
                received = attempt_rx.recv() => {
                    let Some(queued) = received else { break };
                    let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                        break;
                    };
                    jobs.spawn(enrich_and_record(
                        queued,
                        Arc::clone(&self.resolver),
                        Arc::clone(&self.sink),
                        Arc::clone(&self.stats),
                        permit,
                    ));
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "enrichment job failed");
                    }
                }
                _ = prune.tick() => {
                    let pruned = self.resolver.prune_cache();
                    debug!(pruned, remaining = self.resolver.cache_len(), "pruned geolocation cache");
                }
            }
        }

        if !jobs.is_empty() {
            info!(in_flight = jobs.len(), "flushing in-flight attempts");
        }
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "enrichment job failed");
            }
        }
        debug!("enrichment task finished");
    }
}

/// 시도 하나를 보강하고 저장합니다. 결과가 나오면 원본 위치 hold가 해제됩니다.
async fn enrich_and_record(
    queued: QueuedAttempt,
    resolver: Arc<GeoResolver>,
    sink: Arc<AttemptSink>,
    stats: Arc<EngineStats>,
    _permit: OwnedSemaphorePermit,
) {
    let QueuedAttempt {
        mut attempt,
        hold: _hold,
    } = queued;
    attempt.location = resolver.resolve(attempt.ip_address).await;
    if attempt.location.is_unknown() {
        EngineStats::bump(&stats.geo_unknown);
    }

    match sink.record(&attempt).await {
        SinkOutcome::Recorded => {
            EngineStats::bump(&stats.recorded);
            info!(
                status = if attempt.success { "SUCCESS" } else { "FAILED" },
                ip = %attempt.ip_address,
                port = attempt.port,
                username = attempt.username.as_deref().unwrap_or("unknown"),
                reason = attempt.failure_reason.map(|r| r.as_str()),
                city = %attempt.location.city,
                country = %attempt.location.country,
                "{attempt}"
            );
        }
        SinkOutcome::Duplicate => {
            EngineStats::bump(&stats.duplicates);
            debug!(key = %attempt.dedup_key(), "attempt already recorded");
        }
        SinkOutcome::Dropped => EngineStats::bump(&stats.dropped),
    }
}

// ─── stats task ─────────────────────────────────────────────────────

async fn log_stats_periodically(sink: Arc<AttemptSink>, mut interval: Interval, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => match sink.stats().await {
                Ok(stats) => info!(
                    total = stats.total,
                    successful = stats.successful,
                    failed = stats.failed,
                    unique_ips = stats.unique_ips,
                    last_hour = stats.last_hour,
                    "attempt statistics"
                ),
                Err(e) => warn!(error = %e, "failed to query attempt statistics"),
            },
        }
    }
}

// ─── builder ────────────────────────────────────────────────────────

/// 시도 엔진 빌더
///
/// 저장소는 반드시 지정해야 합니다. 제공자를 지정하지 않으면
/// 설정의 `geo_providers` 목록으로 HTTP 제공자를 생성합니다.
pub struct AttemptEngineBuilder {
    config: TrackerConfig,
    store: Option<Arc<dyn AttemptStore>>,
    providers: Option<Vec<Arc<dyn DynGeoProvider>>>,
}

impl AttemptEngineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
            store: None,
            providers: None,
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// 시도 저장소를 지정합니다.
    pub fn store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 지오로케이션 제공자 목록을 우선순위 순서로 지정합니다.
    pub fn providers(mut self, providers: Vec<Arc<dyn DynGeoProvider>>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// 엔진을 빌드합니다.
    pub fn build(self) -> Result<AttemptEngine, TrackerError> {
        self.config.validate()?;

        let store = self.store.ok_or_else(|| TrackerError::Config {
            field: "store".to_owned(),
            reason: "an attempt store must be provided".to_owned(),
        })?;

        let providers = match self.providers {
            Some(providers) => providers,
            None if self.config.geo_enabled => build_providers(
                &self.config.geo_providers,
                &self.config.ipinfo_token,
                Duration::from_secs(self.config.geo_timeout_secs),
            )?,
            None => Vec::new(),
        };

        let resolver = Arc::new(GeoResolver::new(self.config.resolver_config(), providers));
        let sink = Arc::new(AttemptSink::new(store, self.config.sink_config()));

        Ok(AttemptEngine {
            config: self.config,
            state: EngineState::Initialized,
            resolver,
            sink,
            stats: Arc::new(EngineStats::default()),
            cancel: CancellationToken::new(),
            ingest_task: None,
            tasks: Vec::new(),
        })
    }
}

impl Default for AttemptEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfigBuilder;
    use crate::sink::MemoryStore;
    use std::io::Write;

    fn test_config(dir: &std::path::Path) -> TrackerConfig {
        TrackerConfigBuilder::new()
            .source_path(dir.join("auth.log").display().to_string())
            .position_file(dir.join("position.json"))
            .poll_interval_ms(20)
            .startup_wait_secs(0)
            .geo_enabled(false)
            .stats_interval_secs(0)
            .shutdown_timeout_secs(5)
            .build()
            .unwrap()
    }

    async fn wait_for(stats: &EngineStats, completed: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.completed() < completed {
            assert!(Instant::now() < deadline, "timed out waiting for {completed} attempts");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[test]
    fn builder_requires_store() {
        let result = AttemptEngineBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let config = TrackerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let result = AttemptEngineBuilder::new()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lifecycle_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("auth.log")).unwrap();
        let mut engine = AttemptEngineBuilder::new()
            .config(test_config(dir.path()))
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        assert_eq!(engine.state_name(), "initialized");
        assert!(engine.health_check().await.is_unhealthy());
        assert!(engine.stop().await.is_err());

        engine.start().await.unwrap();
        assert_eq!(engine.state_name(), "running");
        assert!(engine.health_check().await.is_healthy());
        assert!(engine.start().await.is_err());

        engine.stop().await.unwrap();
        assert_eq!(engine.state_name(), "stopped");
        assert!(engine.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn missing_log_file_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = AttemptEngineBuilder::new()
            .config(test_config(dir.path()))
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        let err = engine.start().await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert_eq!(engine.state_name(), "initialized");
    }

    #[tokio::test]
    async fn records_attempts_from_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("auth.log");
        let mut log = std::fs::File::create(&log_path).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = AttemptEngineBuilder::new()
            .config(test_config(dir.path()))
            .store(store.clone())
            .build()
            .unwrap();
        engine.start().await.unwrap();

        writeln!(log, "2024-01-15T12:00:00+00:00 host sshd[100]: Connection from 198.51.100.9 port 40000 on 10.0.0.1 port 22 rdomain \"\"").unwrap();
        writeln!(log, "2024-01-15T12:00:01+00:00 host sshd[100]: Accepted publickey for deploy from 198.51.100.9 port 40000 ssh2: ED25519 SHA256:abc").unwrap();
        writeln!(log, "2024-01-15T12:00:02+00:00 host kernel: unrelated line").unwrap();
        log.flush().unwrap();

        let stats = engine.stats();
        wait_for(&stats, 1).await;
        while stats.lines_read() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.stop().await.unwrap();

        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].username.as_deref(), Some("deploy"));
        assert_eq!(attempts[0].port, Some(40000));
        assert!(attempts[0].location.is_unknown());
        assert_eq!(stats.lines_read(), 3);
        assert_eq!(stats.unparsed(), 1);

        // 종료 시 최종 위치 저장
        let saved = PositionStore::new(dir.path().join("position.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.offset, std::fs::metadata(&log_path).unwrap().len());
    }

    #[tokio::test]
    async fn storage_failure_degrades_health() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("auth.log");
        let mut log = std::fs::File::create(&log_path).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_next(u32::MAX);
        let config = TrackerConfig {
            max_retries: 0,
            ..test_config(dir.path())
        };
        let mut engine = AttemptEngineBuilder::new()
            .config(config)
            .store(store.clone())
            .build()
            .unwrap();
        engine.start().await.unwrap();

        writeln!(log, "2024-01-15T12:00:00+00:00 host sshd[7]: Failed password for root from 198.51.100.3 port 5000 ssh2").unwrap();
        log.flush().unwrap();

        let stats = engine.stats();
        wait_for(&stats, 1).await;
        assert_eq!(stats.dropped(), 1);
        assert!(engine.health_check().await.is_degraded());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_holds_back_for_pending_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("auth.log");
        let mut log = std::fs::File::create(&log_path).unwrap();
        let first = "2024-01-15T12:00:00+00:00 host sshd[1]: Failed password for root from 198.51.100.3 port 5000 ssh2\n";
        log.write_all(first.as_bytes()).unwrap();
        log.write_all(b"2024-01-15T12:00:01+00:00 host sshd[2]: Connection from 198.51.100.4 port 6000 on 10.0.0.1 port 22\n")
            .unwrap();
        log.flush().unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = AttemptEngineBuilder::new()
            .config(test_config(dir.path()))
            .store(store.clone())
            .build()
            .unwrap();
        engine.start().await.unwrap();

        let stats = engine.stats();
        wait_for(&stats, 1).await;
        while stats.lines_read() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.stop().await.unwrap();

        // pid 2 세션이 미종결이므로 그 라인의 시작 위치에서 재개
        let saved = PositionStore::new(dir.path().join("position.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.offset, first.len() as u64);
    }
}
