use anyhow::{bail, Result};
use chrono::{Days, Local, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// How many days ahead the platform opens a date for booking.
pub const BOOKING_WINDOW_DAYS: i64 = 4;

/// Largest accepted day offset. The vendor never lists a year ahead.
pub const MAX_DAYS_IN_ADVANCE: i64 = 365;

/// Today's date, either in the given zone or in the machine's local zone.
pub fn today(tz: Option<Tz>) -> NaiveDate {
    match tz {
        Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
        None => Local::now().date_naive(),
    }
}

/// The date the run books for: `from` plus `days_in_advance` calendar days.
pub fn target_date(from: NaiveDate, days_in_advance: i64) -> Result<NaiveDate> {
    let days = match u64::try_from(days_in_advance) {
        Ok(d) => d,
        Err(_) => bail!("Days in advance must not be negative, got {}", days_in_advance),
    };
    match from.checked_add_days(Days::new(days)) {
        Some(date) => Ok(date),
        None => bail!("{} plus {} days is out of range", from, days_in_advance),
    }
}

/// Parse a day-in-advance count the way it arrives from the environment.
pub fn parse_days_in_advance(raw: &str) -> Result<i64> {
    let days: i64 = match raw.trim().parse() {
        Ok(d) => d,
        Err(_) => bail!("DAYS_IN_ADVANCE must be an integer, got '{}'", raw),
    };
    check_days_in_advance(days)
}

pub fn check_days_in_advance(days: i64) -> Result<i64> {
    if days < 0 {
        bail!("DAYS_IN_ADVANCE must not be negative, got {}", days);
    }
    if days > MAX_DAYS_IN_ADVANCE {
        bail!(
            "DAYS_IN_ADVANCE must be at most {}, got {}",
            MAX_DAYS_IN_ADVANCE,
            days
        );
    }
    Ok(days)
}

/// Whether a start time is in the `HH:MM:SS` form the schedule usually uses.
/// Only used to warn; matching is always on the string as given.
pub fn is_vendor_time(raw: &str) -> bool {
    raw.len() == 8 && NaiveTime::parse_from_str(raw, "%H:%M:%S").is_ok()
}
