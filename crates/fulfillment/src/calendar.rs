//! Business-day arithmetic for due dates.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Returns true for Monday through Friday.
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Moves `days` business days forward from `start`, skipping weekends.
///
/// `start` itself is never counted, so zero days returns `start`.
pub fn add_business_days(start: NaiveDate, days: u32) -> NaiveDate {
    let mut date = start;
    let mut remaining = days;
    while remaining > 0 {
        date = date + Days::new(1);
        if is_business_day(date) {
            remaining -= 1;
        }
    }
    date
}
