//! Slot arithmetic on the pipeline's 10-minute grid

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Timelike};

/// Length of one timestep in minutes
pub const SLOT_MINUTES: i64 = 10;

pub fn slot_duration() -> Duration {
    Duration::minutes(SLOT_MINUTES)
}

/// Truncate a timestamp down to the enclosing 10-minute boundary
pub fn truncate_to_slot<Tz: TimeZone>(ts: DateTime<Tz>) -> DateTime<Tz> {
    let minute = (ts.minute() / SLOT_MINUTES as u32) * SLOT_MINUTES as u32;
    let offset = Duration::minutes((ts.minute() - minute) as i64)
        + Duration::seconds(ts.second() as i64)
        + Duration::nanoseconds(ts.nanosecond() as i64);
    ts - offset
}

pub fn is_slot_aligned<Tz: TimeZone>(ts: &DateTime<Tz>) -> bool {
    ts.minute() % SLOT_MINUTES as u32 == 0 && ts.second() == 0 && ts.nanosecond() == 0
}

/// `count` consecutive slot timestamps starting at `start`
pub fn slot_sequence(start: DateTime<FixedOffset>, count: usize) -> Vec<DateTime<FixedOffset>> {
    (0..count as i64)
        .map(|i| start + Duration::minutes(i * SLOT_MINUTES))
        .collect()
}

/// Last minute (23:59) of the calendar day containing `ts`, in the same offset
pub fn end_of_day(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let last = ts
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN));
    ts.offset()
        .from_local_datetime(&last)
        .single()
        .unwrap_or(ts)
}

/// 12-hour clock string, e.g. `02:30 PM`
pub fn format_12h(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%I:%M %p").to_string()
}

/// 24-hour clock string, e.g. `14:30`
pub fn format_hhmm(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%H:%M").to_string()
}
