//! Subscription access windows.

use edupay_sdk::objects::BillingCycle;
use time::{Date, Month, OffsetDateTime};

/// End of the access window for `cycle` starting at `from`.
///
/// One-time purchases have no end. Periodic cycles add whole calendar
/// months; when the target month is shorter, the day is clamped to its last
/// day (Jan 31 + 1 month = Feb 28 or 29).
pub fn end_date(cycle: BillingCycle, from: OffsetDateTime) -> Option<OffsetDateTime> {
    let months = cycle.months()?;
    add_months(from, u32::from(months))
}

pub fn add_months(from: OffsetDateTime, months: u32) -> Option<OffsetDateTime> {
    let months = i32::try_from(months).ok()?;
    let total = from.year() * 12 + i32::from(u8::from(from.month())) - 1 + months;
    let year = total.div_euclid(12);
    let month = Month::try_from(u8::try_from(total.rem_euclid(12) + 1).ok()?).ok()?;
    let day = from.day().min(days_in_month(year, month));
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(from.replace_date(date))
}

fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::February if time::util::is_leap_year(year) => 29,
        Month::February => 28,
        Month::April | Month::June | Month::September | Month::November => 30,
        _ => 31,
    }
}
