//! Trading-day arithmetic, pinned to America/Chicago.
//!
//! Cron idempotency keys are scoped by trading day: a POST at 23:30 Chicago
//! and one at 00:30 the next Chicago morning are two different days even
//! though both may fall on the same UTC date (or vice versa).

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::Chicago;
use chrono_tz::Tz;

/// The exchange-local timezone used for all cadence decisions.
pub const TRADING_TZ: Tz = Chicago;

/// The trading day containing `now`, as a Chicago-local calendar date.
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&TRADING_TZ).date_naive()
}

/// UTC half-open interval [start, end) covering the trading day that
/// contains `now`. DST transition days resolve to the earliest valid local
/// midnight.
pub fn trading_day_bounds_utc(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = trading_day(now);
    let start_local = local_midnight(day);
    let end_local = local_midnight(day + chrono::Duration::days(1));
    (
        start_local.with_timezone(&Utc),
        end_local.with_timezone(&Utc),
    )
}

fn local_midnight(day: NaiveDate) -> chrono::DateTime<Tz> {
    use chrono::offset::LocalResult;
    let naive = day.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    match TRADING_TZ.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        // Spring-forward gap: fall back to one hour later.
        LocalResult::None => TRADING_TZ
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .expect("post-gap local time is valid"),
    }
}
