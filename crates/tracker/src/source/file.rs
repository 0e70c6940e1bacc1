//! 파일 기반 로그 소스
//!
//! 인증 로그 파일을 감시하며 새로 추가된 완전한 라인을 하나씩 반환합니다.
//! `tail -F`와 유사하게 동작합니다.
//!
//! # 로테이션 감지
//! EOF에 도달했을 때 경로를 다시 확인합니다.
//! - device/inode 변경 (logrotate rename + create): 이전 핸들을 끝까지 읽은 뒤 새 파일을 오프셋 0부터 읽음
//! - 파일 크기 축소 (copytruncate): 오프셋 0으로 되감음

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use metrics::counter;
use sshwatch_core::metrics as m;
use tokio::time::Instant;

use super::position::{FileIdentity, LogPosition};
use crate::error::TrackerError;

/// 파일 소스 설정
#[derive(Debug, Clone)]
pub struct FileSourceConfig {
    /// 감시할 파일 경로
    pub path: PathBuf,
    /// 새 데이터가 없을 때 대기 주기
    pub poll_interval: Duration,
    /// 최대 라인 길이 (바이트, 개행 제외)
    pub max_line_length: usize,
    /// 시작 시 파일이 나타나기를 기다리는 최대 시간
    pub startup_wait: Duration,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/auth.log"),
            poll_interval: Duration::from_secs(1),
            max_line_length: 64 * 1024, // 64KB
            startup_wait: Duration::from_secs(30),
        }
    }
}

/// 소스에서 읽은 완전한 라인
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 개행 문자를 제거한 라인 내용
    pub text: String,
    /// 라인 시작 위치
    pub position: LogPosition,
}

/// 논블로킹 읽기 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 완전한 라인 하나
    Line(SourceLine),
    /// 아직 새 라인이 없음
    Pending,
}

/// 파일 기반 로그 소스
///
/// 읽기 상태(부분 라인 버퍼 포함)를 모두 구조체에 보관하므로
/// [`next_line`](Self::next_line)은 `tokio::select!`에서 취소되어도 데이터를 잃지 않습니다.
pub struct LogSource {
    /// 소스 설정
    config: FileSourceConfig,
    /// 현재 열린 핸들 (읽기 에러 후에는 None, 다음 폴링에서 다시 엶)
    reader: Option<BufReader<File>>,
    /// 현재 파일 식별자
    identity: FileIdentity,
    /// 완전히 반환된 마지막 라인 다음 오프셋
    offset: u64,
    /// 실제 읽은 위치 (offset + 부분 라인 바이트)
    read_pos: u64,
    /// 개행을 기다리는 부분 라인
    partial: Vec<u8>,
    /// 최대 길이를 넘은 라인을 건너뛰는 중
    oversized: bool,
}

impl LogSource {
    /// 로그 파일을 열고 체크포인트 위치로 이동합니다.
    ///
    /// 파일이 없으면 `startup_wait` 동안 기다리며, 그래도 없으면
    /// [`TrackerError::SourceUnavailable`]을 반환합니다.
    /// 체크포인트의 파일 식별자가 다르거나 오프셋이 현재 크기보다 크면
    /// 오프셋 0부터 읽습니다.
    pub async fn open(
        config: FileSourceConfig,
        checkpoint: Option<LogPosition>,
    ) -> Result<Self, TrackerError> {
        let deadline = Instant::now() + config.startup_wait;
        let file = loop {
            match File::open(&config.path) {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if Instant::now() >= deadline {
                        return Err(TrackerError::SourceUnavailable {
                            path: config.path.display().to_string(),
                            waited_secs: config.startup_wait.as_secs(),
                        });
                    }
                    tracing::debug!(path = %config.path.display(), "waiting for log file to appear");
                    tokio::time::sleep(config.poll_interval).await;
                }
                Err(e) => {
                    return Err(TrackerError::Source {
                        path: config.path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        };

        let meta = file.metadata()?;
        let identity = FileIdentity::from_metadata(&meta);
        let start = match checkpoint {
            Some(pos) if pos.identity != identity => {
                tracing::info!(
                    path = %config.path.display(),
                    "log file changed since last checkpoint, reading new file from the beginning"
                );
                0
            }
            Some(pos) if pos.offset > meta.len() => {
                tracing::warn!(
                    path = %config.path.display(),
                    checkpoint = pos.offset,
                    size = meta.len(),
                    "log file shorter than checkpoint, assuming truncation"
                );
                0
            }
            Some(pos) => pos.offset,
            None => 0,
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(start))?;

        tracing::info!(
            path = %config.path.display(),
            offset = start,
            "log source opened"
        );

        Ok(Self {
            config,
            reader: Some(reader),
            identity,
            offset: start,
            read_pos: start,
            partial: Vec::new(),
            oversized: false,
        })
    }

    /// 다음 완전한 라인을 반환합니다. 새 데이터가 없으면 폴링 주기만큼 대기합니다.
    ///
    /// 취소 안전(cancel-safe)합니다.
    pub async fn next_line(&mut self) -> Result<SourceLine, TrackerError> {
        loop {
            match self.poll_line()? {
                ReadOutcome::Line(line) => return Ok(line),
                ReadOutcome::Pending => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// 대기 없이 다음 라인을 읽습니다.
    ///
    /// 개행으로 끝나지 않은 마지막 조각은 작성자가 라인을 완성할 때까지 보류됩니다.
    pub fn poll_line(&mut self) -> Result<ReadOutcome, TrackerError> {
        loop {
            if self.reader.is_none() && !self.reopen()? {
                return Ok(ReadOutcome::Pending);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(ReadOutcome::Pending);
            };

            let limit = (self.config.max_line_length + 1).saturating_sub(self.partial.len());
            let mut chunk = Vec::new();
            let read = reader
                .by_ref()
                .take(limit.max(1) as u64)
                .read_until(b'\n', &mut chunk);

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    counter!(m::SOURCE_READ_ERRORS_TOTAL).increment(1);
                    // 다음 폴링에서 커밋된 오프셋부터 다시 읽음
                    self.reader = None;
                    self.partial.clear();
                    self.oversized = false;
                    self.read_pos = self.offset;
                    return Err(TrackerError::Source {
                        path: self.config.path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            if n == 0 {
                if self.check_rotation()? {
                    continue;
                }
                return Ok(ReadOutcome::Pending);
            }

            self.read_pos += n as u64;
            let complete = chunk.last() == Some(&b'\n');

            if self.oversized {
                if complete {
                    self.oversized = false;
                    self.offset = self.read_pos;
                }
                continue;
            }

            self.partial.extend_from_slice(&chunk);
            let content_len = self.partial.len() - usize::from(complete);
            if content_len > self.config.max_line_length {
                tracing::warn!(
                    path = %self.config.path.display(),
                    offset = self.offset,
                    max_line_length = self.config.max_line_length,
                    "skipping oversized log line"
                );
                self.partial.clear();
                if complete {
                    self.offset = self.read_pos;
                } else {
                    self.oversized = true;
                }
                continue;
            }

            if !complete {
                continue;
            }

            let start = self.offset;
            self.offset = self.read_pos;
            let mut bytes = std::mem::take(&mut self.partial);
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }

            counter!(m::SOURCE_LINES_READ_TOTAL).increment(1);
            return Ok(ReadOutcome::Line(SourceLine {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                position: LogPosition::new(self.identity, start),
            }));
        }
    }

    /// 마지막으로 반환된 라인 다음 위치를 반환합니다.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.identity, self.offset)
    }

    /// 감시 중인 경로를 반환합니다.
    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }

    /// EOF에서 로테이션/트렁케이션을 확인하고, 감지되면 새 위치로 전환합니다.
    fn check_rotation(&mut self) -> Result<bool, TrackerError> {
        let meta = match std::fs::metadata(&self.config.path) {
            Ok(meta) => meta,
            // rename 직후 새 파일이 아직 없음: 이전 핸들 유지
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(TrackerError::Source {
                    path: self.config.path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let identity = FileIdentity::from_metadata(&meta);
        if identity != self.identity {
            tracing::info!(path = %self.config.path.display(), "log rotation detected, switching to new file");
            self.discard_partial();
            self.reader = None;
            self.identity = identity;
            self.offset = 0;
            self.read_pos = 0;
            counter!(m::SOURCE_ROTATIONS_TOTAL).increment(1);
            return self.reopen();
        }

        if meta.len() < self.read_pos {
            tracing::warn!(
                path = %self.config.path.display(),
                offset = self.read_pos,
                size = meta.len(),
                "log truncation detected, rewinding to start"
            );
            self.discard_partial();
            self.offset = 0;
            self.read_pos = 0;
            if let Some(reader) = self.reader.as_mut() {
                reader.seek(SeekFrom::Start(0))?;
            }
            counter!(m::SOURCE_ROTATIONS_TOTAL).increment(1);
            return Ok(true);
        }

        Ok(false)
    }

    /// 경로를 다시 열고 커밋된 오프셋으로 이동합니다.
    ///
    /// 파일이 없으면 `false`를 반환합니다. 식별자가 바뀌었으면 오프셋 0부터 읽습니다.
    fn reopen(&mut self) -> Result<bool, TrackerError> {
        let file = match File::open(&self.config.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(TrackerError::Source {
                    path: self.config.path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let meta = file.metadata()?;
        let identity = FileIdentity::from_metadata(&meta);
        if identity != self.identity || meta.len() < self.offset {
            self.identity = identity;
            self.offset = 0;
        }
        self.read_pos = self.offset;

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;
        self.reader = Some(reader);
        Ok(true)
    }

    fn discard_partial(&mut self) {
        if !self.partial.is_empty() {
            tracing::warn!(
                bytes = self.partial.len(),
                "discarding unterminated line from previous file"
            );
        }
        self.partial.clear();
        self.oversized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_for(path: PathBuf) -> FileSourceConfig {
        FileSourceConfig {
            path,
            poll_interval: Duration::from_millis(10),
            max_line_length: 1024,
            startup_wait: Duration::from_millis(50),
        }
    }

    fn append(path: &std::path::Path, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn expect_line(outcome: ReadOutcome) -> SourceLine {
        match outcome {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Pending => panic!("expected a line"),
        }
    }

    #[test]
    fn default_config() {
        let config = FileSourceConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_line_length, 64 * 1024);
    }

    #[tokio::test]
    async fn reads_complete_lines_with_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "first\nsecond\n");

        let mut source = LogSource::open(config_for(path), None).await.unwrap();
        let first = expect_line(source.poll_line().unwrap());
        assert_eq!(first.text, "first");
        assert_eq!(first.position.offset, 0);

        let second = expect_line(source.poll_line().unwrap());
        assert_eq!(second.text, "second");
        assert_eq!(second.position.offset, 6);
        assert_eq!(source.position().offset, 13);
        assert_eq!(source.poll_line().unwrap(), ReadOutcome::Pending);
    }

    #[tokio::test]
    async fn holds_back_partial_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "complete\nparti");

        let mut source = LogSource::open(config_for(path.clone()), None).await.unwrap();
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "complete");
        assert_eq!(source.poll_line().unwrap(), ReadOutcome::Pending);
        // 커밋된 오프셋은 라인 중간을 가리키지 않음
        assert_eq!(source.position().offset, 9);

        append(&path, "al\n");
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "partial");
        assert_eq!(source.position().offset, 17);
    }

    #[tokio::test]
    async fn strips_carriage_return() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "windows\r\n");

        let mut source = LogSource::open(config_for(path), None).await.unwrap();
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "windows");
    }

    #[tokio::test]
    async fn skips_oversized_line_but_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        let long = "x".repeat(3000);
        append(&path, &format!("{long}\nafter\n"));

        let mut source = LogSource::open(config_for(path), None).await.unwrap();
        let line = expect_line(source.poll_line().unwrap());
        assert_eq!(line.text, "after");
        assert_eq!(line.position.offset, 3001);
    }

    #[tokio::test]
    async fn resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "one\ntwo\n");

        let mut first = LogSource::open(config_for(path.clone()), None).await.unwrap();
        expect_line(first.poll_line().unwrap());
        let checkpoint = first.position();
        drop(first);

        let mut resumed = LogSource::open(config_for(path), Some(checkpoint))
            .await
            .unwrap();
        assert_eq!(expect_line(resumed.poll_line().unwrap()).text, "two");
    }

    #[tokio::test]
    async fn checkpoint_beyond_size_resets_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "short\n");
        let identity = FileIdentity::from_metadata(&std::fs::metadata(&path).unwrap());

        let mut source = LogSource::open(
            config_for(path),
            Some(LogPosition::new(identity, 10_000)),
        )
        .await
        .unwrap();
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "short");
    }

    #[tokio::test]
    async fn detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "aaaaaaaaaa\nbbbbbbbbbb\n");

        let mut source = LogSource::open(config_for(path.clone()), None).await.unwrap();
        expect_line(source.poll_line().unwrap());
        expect_line(source.poll_line().unwrap());

        // copytruncate: 같은 inode, 더 작은 크기
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        append(&path, "new\n");

        let line = expect_line(source.poll_line().unwrap());
        assert_eq!(line.text, "new");
        assert_eq!(line.position.offset, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn follows_rename_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "old-1\nold-2\n");

        let mut source = LogSource::open(config_for(path.clone()), None).await.unwrap();
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "old-1");

        std::fs::rename(&path, dir.path().join("auth.log.1")).unwrap();
        append(&path, "new-1\n");

        // 이전 핸들을 먼저 끝까지 읽음
        assert_eq!(expect_line(source.poll_line().unwrap()).text, "old-2");
        let line = expect_line(source.poll_line().unwrap());
        assert_eq!(line.text, "new-1");
        assert_eq!(line.position.offset, 0);
    }

    #[tokio::test]
    async fn missing_file_is_unavailable_after_wait() {
        let dir = tempfile::tempdir().unwrap();
        let result = LogSource::open(config_for(dir.path().join("missing.log")), None).await;
        assert!(matches!(
            result,
            Err(TrackerError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn next_line_waits_for_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, "");

        let mut source = LogSource::open(config_for(path.clone()), None).await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            append(&path, "late\n");
        });

        let line = tokio::time::timeout(Duration::from_secs(2), source.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "late");
        writer.await.unwrap();
    }
}
