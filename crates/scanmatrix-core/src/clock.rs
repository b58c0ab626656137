use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// Seconds elapsed since midnight in the timestamp's own zone.
pub fn seconds_since_midnight<Tz: TimeZone>(at: &DateTime<Tz>) -> u32 {
    at.num_seconds_from_midnight()
}

/// Local calendar date and seconds since local midnight.
pub fn local_now() -> (NaiveDate, u32) {
    let now = Local::now();
    (now.date_naive(), seconds_since_midnight(&now))
}

/// Hour of day at a fixed UTC offset, for jobs that follow a remote timezone.
pub fn hour_at_offset(utc: &DateTime<chrono::Utc>, offset_seconds: i32) -> u32 {
    let shifted = utc.timestamp() + i64::from(offset_seconds);
    (shifted.rem_euclid(i64::from(SECONDS_PER_DAY)) / 3_600) as u32
}

/// Calendar date at a fixed UTC offset.
pub fn date_at_offset(utc: &DateTime<chrono::Utc>, offset_seconds: i32) -> NaiveDate {
    (*utc + chrono::Duration::seconds(i64::from(offset_seconds))).date_naive()
}
