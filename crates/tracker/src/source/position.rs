//! 읽기 위치 체크포인트
//!
//! [`LogPosition`]은 감시 중인 파일의 식별자(device + inode)와 바이트 오프셋입니다.
//! [`PositionStore`]는 이를 작은 JSON 문서로 저장하며, 임시 파일에 쓴 뒤
//! rename하여 원자적으로 교체합니다.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::TrackerError;

/// 파일 식별자 (device + inode)
///
/// 같은 경로라도 로테이션으로 새 파일이 생기면 식별자가 달라집니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// 디바이스 번호
    pub dev: u64,
    /// inode 번호
    pub ino: u64,
}

impl FileIdentity {
    /// 파일 메타데이터에서 식별자를 추출합니다.
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    /// 파일 메타데이터에서 식별자를 추출합니다.
    ///
    /// inode가 없는 플랫폼에서는 항상 같은 값이므로 크기 축소로만 로테이션을 감지합니다.
    #[cfg(not(unix))]
    pub fn from_metadata(_meta: &Metadata) -> Self {
        Self::default()
    }
}

/// 감시 파일 내 읽기 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    /// 파일 식별자
    pub identity: FileIdentity,
    /// 완전히 처리된 마지막 라인 다음의 바이트 오프셋
    pub offset: u64,
}

impl LogPosition {
    /// 새 위치를 생성합니다.
    pub fn new(identity: FileIdentity, offset: u64) -> Self {
        Self { identity, offset }
    }
}

/// 체크포인트 파일 저장소
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    /// 체크포인트 파일 경로로 저장소를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 체크포인트 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 저장된 위치를 로드합니다.
    ///
    /// 파일이 없으면 `None`을 반환합니다. 내용이 손상된 경우에도 경고 후
    /// `None`을 반환하여 파일 처음부터 다시 읽게 합니다 (중복은 싱크가 흡수).
    pub async fn load(&self) -> Result<Option<LogPosition>, TrackerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };

        match serde_json::from_str::<LogPosition>(&content) {
            Ok(position) => Ok(Some(position)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "corrupt position checkpoint, starting from the beginning"
                );
                Ok(None)
            }
        }
    }

    /// 위치를 원자적으로 저장합니다 (임시 파일 + rename).
    pub async fn save(&self, position: &LogPosition) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(e))?;
        }

        let body = serde_json::to_vec(position).map_err(|e| TrackerError::Position {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut out = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| self.error(e))?;
            out.write_all(&body).await.map_err(|e| self.error(e))?;
            out.sync_all().await.map_err(|e| self.error(e))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error(e))?;

        tracing::trace!(
            path = %self.path.display(),
            offset = position.offset,
            "position checkpoint saved"
        );
        Ok(())
    }

    fn error(&self, e: std::io::Error) -> TrackerError {
        TrackerError::Position {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}
