//! Korean Market Session
//!
//! The backend only pushes ticks during the KRX regular session
//! (weekdays 09:00–15:30 KST). These helpers let consumers tell a quiet
//! feed apart from a broken one.

use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeZone, Timelike, Utc, Weekday};

/// Human-readable session schedule.
pub const KOREAN_MARKET_SCHEDULE_LABEL: &str = "주중 09:00~15:30 (KST)";

/// KST is UTC+9 with no daylight saving.
const KST_OFFSET_SECS: i32 = 9 * 3600;

const MARKET_OPEN_MINUTES: u32 = 9 * 60;
const MARKET_CLOSE_MINUTES: u32 = 15 * 60 + 30;

fn to_kst<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<FixedOffset> {
    // 9h is always a valid offset.
    let kst = FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    at.with_timezone(&kst)
}

/// Check if the given instant falls on a weekday in Korea.
#[must_use]
pub fn is_korean_weekday<Tz: TimeZone>(at: &DateTime<Tz>) -> bool {
    !matches!(to_kst(at).weekday(), Weekday::Sat | Weekday::Sun)
}

/// Check if the Korean regular session is open at the given instant.
///
/// Both session bounds are inclusive.
#[must_use]
pub fn is_korean_market_open<Tz: TimeZone>(at: &DateTime<Tz>) -> bool {
    if !is_korean_weekday(at) {
        return false;
    }

    let kst = to_kst(at);
    let minutes = kst.hour() * 60 + kst.minute();
    (MARKET_OPEN_MINUTES..=MARKET_CLOSE_MINUTES).contains(&minutes)
}

/// Check if the Korean regular session is open right now.
#[must_use]
pub fn is_korean_market_open_now() -> bool {
    is_korean_market_open(&Utc::now())
}
