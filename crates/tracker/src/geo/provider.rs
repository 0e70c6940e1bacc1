//! 지오로케이션 제공자
//!
//! [`GeoProvider`]는 IP 하나를 국가/도시/ISP로 조회하는 외부 HTTP 서비스입니다.
//! RPITIT를 사용하므로 `dyn GeoProvider`가 불가하여, 리졸버는 blanket impl로
//! 자동 구현되는 [`DynGeoProvider`]를 통해 제공자 목록을 관리합니다.
//!
//! # 기본 제공자
//! - [`IpInfoProvider`]: `GET https://ipinfo.io/{ip}/json`
//! - [`IpApiProvider`]: `GET http://ip-api.com/json/{ip}`

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sshwatch_core::pipeline::BoxFuture;
use sshwatch_core::types::{GeoLocation, UNKNOWN};

use crate::error::{GeoError, TrackerError};

/// 지오로케이션 제공자 trait
pub trait GeoProvider: Send + Sync {
    /// 제공자 이름 (로그/메트릭 레이블)
    fn name(&self) -> &'static str;

    /// IP의 위치를 조회합니다.
    fn lookup(&self, ip: IpAddr) -> impl Future<Output = Result<GeoLocation, GeoError>> + Send;
}

/// dyn-compatible 제공자 trait
///
/// `Vec<Arc<dyn DynGeoProvider>>`로 우선순위 목록을 구성할 수 있게 합니다.
pub trait DynGeoProvider: Send + Sync {
    /// 제공자 이름
    fn name(&self) -> &'static str;

    /// IP의 위치를 조회합니다.
    fn lookup(&self, ip: IpAddr) -> BoxFuture<'_, Result<GeoLocation, GeoError>>;
}

/// GeoProvider를 구현한 타입은 자동으로 DynGeoProvider도 구현됩니다.
impl<T: GeoProvider> DynGeoProvider for T {
    fn name(&self) -> &'static str {
        GeoProvider::name(self)
    }

    fn lookup(&self, ip: IpAddr) -> BoxFuture<'_, Result<GeoLocation, GeoError>> {
        Box::pin(GeoProvider::lookup(self, ip))
    }
}

/// 설정의 제공자 이름 목록으로 제공자를 생성합니다.
///
/// 모든 제공자는 하나의 `reqwest::Client`를 공유합니다.
pub fn build_providers(
    names: &[String],
    ipinfo_token: &str,
    timeout: Duration,
) -> Result<Vec<Arc<dyn DynGeoProvider>>, TrackerError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sshwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TrackerError::Config {
            field: "geo".to_owned(),
            reason: format!("failed to construct http client: {e}"),
        })?;

    names
        .iter()
        .map(|name| -> Result<Arc<dyn DynGeoProvider>, TrackerError> {
            match name.as_str() {
                "ipinfo" => Ok(Arc::new(IpInfoProvider::new(
                    client.clone(),
                    Some(ipinfo_token).filter(|t| !t.is_empty()).map(str::to_owned),
                ))),
                "ip-api" => Ok(Arc::new(IpApiProvider::new(client.clone()))),
                other => Err(TrackerError::Config {
                    field: "geo_providers".to_owned(),
                    reason: format!("unknown provider '{other}'"),
                }),
            }
        })
        .collect()
}

fn or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_owned())
}

async fn get_json<T: for<'de> Deserialize<'de>>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, GeoError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            GeoError::Http {
                provider,
                reason: "request timed out".to_owned(),
            }
        } else {
            GeoError::Http {
                provider,
                reason: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(GeoError::Status {
            provider,
            status: status.as_u16(),
        });
    }

    response.json::<T>().await.map_err(|e| GeoError::Malformed {
        provider,
        reason: e.to_string(),
    })
}

// ─── ipinfo.io ──────────────────────────────────────────────────────

/// ipinfo.io 응답
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    country: Option<String>,
    city: Option<String>,
    org: Option<String>,
    #[serde(default)]
    bogon: bool,
}

impl IpInfoResponse {
    fn into_location(self) -> Result<GeoLocation, GeoError> {
        if self.bogon {
            return Err(GeoError::Malformed {
                provider: IpInfoProvider::NAME,
                reason: "bogon address".to_owned(),
            });
        }
        Ok(GeoLocation {
            country: or_unknown(self.country),
            city: or_unknown(self.city),
            isp: or_unknown(self.org),
        })
    }
}

/// ipinfo.io 제공자
pub struct IpInfoProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoProvider {
    const NAME: &'static str = "ipinfo";

    /// 새 제공자를 생성합니다. 토큰이 있으면 bearer 토큰으로 전송합니다.
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: "https://ipinfo.io".to_owned(),
            token,
        }
    }

    /// 기본 URL을 변경합니다.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl GeoProvider for IpInfoProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let mut request = self.client.get(format!("{}/{ip}/json", self.base_url));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        get_json::<IpInfoResponse>(Self::NAME, request)
            .await?
            .into_location()
    }
}

// ─── ip-api.com ─────────────────────────────────────────────────────

/// ip-api.com 응답
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
    isp: Option<String>,
}

impl IpApiResponse {
    fn into_location(self) -> Result<GeoLocation, GeoError> {
        if self.status != "success" {
            return Err(GeoError::Malformed {
                provider: IpApiProvider::NAME,
                reason: self
                    .message
                    .unwrap_or_else(|| format!("status '{}'", self.status)),
            });
        }
        Ok(GeoLocation {
            country: or_unknown(self.country),
            city: or_unknown(self.city),
            isp: or_unknown(self.isp),
        })
    }
}

/// ip-api.com 제공자
pub struct IpApiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiProvider {
    const NAME: &'static str = "ip-api";

    /// 새 제공자를 생성합니다.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "http://ip-api.com".to_owned(),
        }
    }

    /// 기본 URL을 변경합니다.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl GeoProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let request = self.client.get(format!("{}/json/{ip}", self.base_url));
        get_json::<IpApiResponse>(Self::NAME, request)
            .await?
            .into_location()
    }
}
