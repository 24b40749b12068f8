//! Human-readable timestamps for the conversation list and thread.
//!
//! Everything takes `now` explicitly; the caller decides the time zone by
//! passing `Local::now()` or any other zoned instant.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::fmt::Display;

const MINUTES_IN_DAY: i64 = 1440;
const MINUTES_IN_MONTH: i64 = 43200;

fn localize<Tz: TimeZone>(ts: DateTime<Utc>, now: &DateTime<Tz>) -> DateTime<Tz> {
    ts.with_timezone(&now.timezone())
}

/// `HH:mm` today, `Yesterday HH:mm`, otherwise `MMM dd, HH:mm`.
pub fn message_time<Tz: TimeZone>(ts: DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let local = localize(ts, now);
    let day = local.date_naive();
    let today = now.date_naive();
    if day == today {
        local.format("%H:%M").to_string()
    } else if today.pred_opt() == Some(day) {
        local.format("Yesterday %H:%M").to_string()
    } else {
        local.format("%b %d, %H:%M").to_string()
    }
}

/// `Today`, `Yesterday`, otherwise `MMMM dd, yyyy`.
pub fn date_separator<Tz: TimeZone>(ts: DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let local = localize(ts, now);
    let day = local.date_naive();
    let today = now.date_naive();
    if day == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(day) {
        "Yesterday".to_string()
    } else {
        local.format("%B %d, %Y").to_string()
    }
}

pub fn same_day<Tz: TimeZone>(a: DateTime<Utc>, b: DateTime<Utc>, zone: &DateTime<Tz>) -> bool {
    localize(a, zone).date_naive() == localize(b, zone).date_naive()
}

/// `MMMM yyyy`, as in "Member since May 2024".
pub fn member_since(ts: DateTime<Utc>) -> String {
    ts.format("%B %Y").to_string()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 { format!("1 {unit}") } else { format!("{n} {unit}s") }
}

/// Whole calendar months between two instants, in either order.
fn calendar_months(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let (early, late) = if a <= b { (a, b) } else { (b, a) };
    let mut months =
        i64::from(late.year() - early.year()) * 12 + i64::from(late.month()) - i64::from(early.month());
    if (late.day(), late.time()) < (early.day(), early.time()) {
        months -= 1;
    }
    months.max(0)
}

/// Distance between two instants in words, without direction.
pub fn distance_in_words(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let seconds = (to - from).num_seconds().abs();
    let minutes = ((seconds as f64) / 60.0).round() as i64;

    if seconds < 30 {
        return "less than a minute".to_string();
    }
    if seconds < 90 {
        return "1 minute".to_string();
    }
    if minutes < 45 {
        return plural(minutes, "minute");
    }
    if minutes < 90 {
        return "about 1 hour".to_string();
    }
    if minutes < MINUTES_IN_DAY {
        let hours = ((minutes as f64) / 60.0).round() as i64;
        return format!("about {}", plural(hours, "hour"));
    }
    if minutes < 2520 {
        return "1 day".to_string();
    }
    if minutes < MINUTES_IN_MONTH {
        let days = ((minutes as f64) / MINUTES_IN_DAY as f64).round() as i64;
        return plural(days, "day");
    }
    let nearest_month = ((minutes as f64) / MINUTES_IN_MONTH as f64).round() as i64;
    if minutes < MINUTES_IN_MONTH * 2 {
        return format!("about {}", plural(nearest_month, "month"));
    }
    let months = calendar_months(from, to);
    if months < 12 {
        return plural(nearest_month, "month");
    }
    let years = months / 12;
    let remainder = months % 12;
    if remainder < 3 {
        format!("about {}", plural(years, "year"))
    } else if remainder < 9 {
        format!("over {}", plural(years, "year"))
    } else {
        format!("almost {}", plural(years + 1, "year"))
    }
}

/// "5 minutes ago" / "in 2 days".
pub fn relative<Tz: TimeZone>(ts: DateTime<Utc>, now: &DateTime<Tz>) -> String {
    let now = now.with_timezone(&Utc);
    let words = distance_in_words(ts, now);
    if ts > now { format!("in {words}") } else { format!("{words} ago") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn message_time_labels() {
        let now = utc(2024, 5, 10, 15, 0);
        assert_eq!(message_time(utc(2024, 5, 10, 9, 5), &now), "09:05");
        assert_eq!(message_time(utc(2024, 5, 9, 23, 59), &now), "Yesterday 23:59");
        assert_eq!(message_time(utc(2024, 3, 2, 7, 30), &now), "Mar 02, 07:30");
    }

    #[test]
    fn labels_follow_callers_zone() {
        // 23:30 UTC on the 9th is already the 10th in UTC+2.
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = utc(2024, 5, 10, 10, 0).with_timezone(&zone);
        assert_eq!(message_time(utc(2024, 5, 9, 23, 30), &now), "01:30");
        assert_eq!(date_separator(utc(2024, 5, 9, 23, 30), &now), "Today");
        assert!(same_day(utc(2024, 5, 9, 23, 30), utc(2024, 5, 10, 8, 0), &now));
    }

    #[test]
    fn separator_labels() {
        let now = utc(2024, 5, 10, 15, 0);
        assert_eq!(date_separator(utc(2024, 5, 10, 0, 1), &now), "Today");
        assert_eq!(date_separator(utc(2024, 5, 9, 12, 0), &now), "Yesterday");
        assert_eq!(date_separator(utc(2023, 12, 25, 12, 0), &now), "December 25, 2023");
        assert_eq!(member_since(utc(2024, 5, 1, 0, 0)), "May 2024");
    }

    #[test]
    fn distance_buckets() {
        let now = utc(2024, 5, 10, 15, 0);
        let ago = |d: Duration| relative(now - d, &now);
        assert_eq!(ago(Duration::seconds(10)), "less than a minute ago");
        assert_eq!(ago(Duration::seconds(60)), "1 minute ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(60)), "about 1 hour ago");
        assert_eq!(ago(Duration::hours(5)), "about 5 hours ago");
        assert_eq!(ago(Duration::hours(30)), "1 day ago");
        assert_eq!(ago(Duration::days(3)), "3 days ago");
        assert_eq!(ago(Duration::days(40)), "about 1 month ago");
        assert_eq!(ago(Duration::days(120)), "4 months ago");
        assert_eq!(ago(Duration::days(359)), "12 months ago");
        assert_eq!(ago(Duration::days(366)), "about 1 year ago");
        assert_eq!(ago(Duration::days(380)), "about 1 year ago");
        assert_eq!(ago(Duration::days(365 * 2 + 180)), "over 2 years ago");
        assert_eq!(ago(Duration::days(365 + 320)), "almost 2 years ago");
        assert_eq!(relative(now + Duration::minutes(5), &now), "in 5 minutes");
    }
}
