//! 로그 헤더 타임스탬프 파싱
//!
//! - RFC 3339 (`2024-01-15T12:00:00.123456+00:00`): rsyslog 고정밀 형식
//! - BSD syslog (`Jan  5 12:00:00`): 연도가 없으므로 현재 연도를 가정하고,
//!   결과가 허용 오차 이상 미래이면 한 해 전으로 되돌림

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};

/// RFC 3339 타임스탬프를 UTC로 변환합니다.
pub fn parse_rfc3339(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 연도 없는 BSD syslog 타임스탬프를 UTC로 해석합니다.
///
/// `now`의 연도를 가정하며, 그 결과가 `now + tolerance`보다 뒤이면
/// 이전 연도로 해석합니다 (12월 31일 로그를 1월 1일에 읽는 경우).
/// 현재 연도에 존재하지 않는 2월 29일은 이전 연도로 재시도합니다.
pub fn parse_bsd(timestamp: &str, now: DateTime<Utc>, tolerance: Duration) -> Option<DateTime<Utc>> {
    // "Jan  5 12:00:00"의 연속 공백 정규화
    let mut parts = timestamp.split_whitespace();
    let month = parts.next()?;
    let day = parts.next()?;
    let time = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let at_year = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{year} {month} {day} {time}"), "%Y %b %d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    };

    let year = now.year();
    let candidate = match at_year(year) {
        Some(dt) => dt,
        None => return at_year(year - 1),
    };

    if candidate > now + tolerance {
        at_year(year - 1)
    } else {
        Some(candidate)
    }
}
