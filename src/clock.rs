use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::model::{Ms, OPEN_END};

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Calendar day of `t` in the venue timezone. The only day boundary the engine uses.
pub fn local_day(t: Ms, tz: Tz) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(t)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .with_timezone(&tz)
        .date_naive()
}

/// RFC 3339 rendering of an instant, or `open` for the sentinel.
pub fn format_instant(t: Ms) -> String {
    if t == OPEN_END {
        return "open".to_string();
    }
    match DateTime::<Utc>::from_timestamp_millis(t) {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_day_uses_venue_offset_not_utc() {
        // 2025-03-01T17:30:00Z is already 2025-03-02 in Manila (UTC+8).
        let t = 1_740_850_200_000;
        assert_eq!(local_day(t, Tz::UTC), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(
            local_day(t, chrono_tz::Asia::Manila),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
        );
    }

    #[test]
    fn format_instant_handles_sentinel() {
        assert_eq!(format_instant(OPEN_END), "open");
        assert_eq!(format_instant(0), "1970-01-01T00:00:00Z");
    }
}
