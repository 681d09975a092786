//! HTTP date parsing for `Last-Modified` headers
//!
//! Only the fixed shape servers send in practice is understood:
//! `Mon, 27 Oct 2025 14:22:01 GMT`. Anything else parses to `None`, which
//! callers treat as "freshness unknown" rather than as an error.

/// Seconds since 1970-01-01T00:00:00Z
pub type Timestamp = i64;

/// English month abbreviations, matched case-sensitively
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const SECS_PER_DAY: i64 = 86_400;

/// Parse an HTTP date into a Unix timestamp.
///
/// The weekday is split off at the first comma and never checked. The zone
/// token must be present but is not validated.
pub fn parse_http_date(text: &str) -> Option<Timestamp> {
    let (_weekday, rest) = text.trim().split_once(',')?;

    let mut tokens = rest.split_ascii_whitespace();
    let day = tokens.next()?;
    let month = tokens.next()?;
    let year = tokens.next()?;
    let clock = tokens.next()?;
    let _zone = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }

    let day: u32 = day.parse().ok()?;
    let month = month_number(month)?;
    let year: i64 = year.parse().ok()?;
    let (hours, minutes, seconds) = parse_clock(clock)?;

    if !(1..=31).contains(&day) || !(0..=9999).contains(&year) {
        return None;
    }
    if hours > 23 || minutes > 59 || seconds > 60 {
        return None;
    }

    let days = days_from_civil(year, month, day);
    Some(days * SECS_PER_DAY + hours as i64 * 3600 + minutes as i64 * 60 + seconds as i64)
}

/// Map `Jan`..`Dec` to 1..=12
fn month_number(abbrev: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == abbrev)
        .map(|idx| idx as u32 + 1)
}

/// Parse `HH:MM:SS`
fn parse_clock(clock: &str) -> Option<(u32, u32, u32)> {
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse().ok()?;
    let minutes = parts.next()?.parse().ok()?;
    let seconds = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((hours, minutes, seconds))
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
///
/// Days past the end of a month roll into the next one, like `mktime`.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = (if year >= 0 { year } else { year - 399 }) / 400;
    let year_of_era = year - era * 400;
    // March-based month so the leap day lands at the end of the year
    let month_index = (month as i64 + 9) % 12;
    let day_of_year = (153 * month_index + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}
