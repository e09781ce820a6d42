//! Weekly opening hours in a venue's own timezone.
//!
//! Everything here is a pure function of `(VenueHours, instant)` or
//! `(VenueHours, date)`. Local clock times are converted with the full tz
//! database, so DST transitions move the absolute instants, not the local
//! opening times.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{merge_overlapping, Ms, Span};

const SECONDS_PER_DAY: u32 = 86_400;

/// Default slot length for day grids.
pub const DEFAULT_SLOT_SECS: u32 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoursError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("bad time of day: {0} (expected HH:MM)")]
    BadTime(String),
    #[error("bad date: {0} (expected YYYY-MM-DD)")]
    BadDate(String),
    #[error("bad day of week: {0} (expected 0-6, Sunday = 0)")]
    BadDay(u8),
    #[error("day {0}: open time must be before close time")]
    InvertedWindow(u8),
}

/// One day of the weekly schedule. A close time of 23:59 means "until
/// midnight", which makes 00:00–23:59 the all-day row and lets a late
/// evening row meet the next day's 00:00 row without a gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHoursRow {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub is_closed: bool,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
}

impl WeeklyHoursRow {
    pub fn open(day_of_week: u8, open: &str, close: &str) -> Result<Self, HoursError> {
        if day_of_week > 6 {
            return Err(HoursError::BadDay(day_of_week));
        }
        let open_time = parse_clock(open)?;
        let close_time = parse_clock(close)?;
        if open_time >= close_time {
            return Err(HoursError::InvertedWindow(day_of_week));
        }
        Ok(Self {
            day_of_week,
            is_closed: false,
            open_time: Some(open_time),
            close_time: Some(close_time),
        })
    }

    pub fn closed(day_of_week: u8) -> Self {
        Self {
            day_of_week,
            is_closed: true,
            open_time: None,
            close_time: None,
        }
    }

    /// Open window as seconds from local midnight, `[open, close)`.
    fn window(&self) -> Option<(u32, u32)> {
        if self.is_closed {
            return None;
        }
        let (open, close) = (self.open_time?, self.close_time?);
        let open_s = open.num_seconds_from_midnight();
        let close_s = if close.hour() == 23 && close.minute() == 59 {
            SECONDS_PER_DAY
        } else {
            close.num_seconds_from_midnight()
        };
        (open_s < close_s).then_some((open_s, close_s))
    }

    pub fn is_all_day(&self) -> bool {
        self.window() == Some((0, SECONDS_PER_DAY))
    }

    /// "9:00 AM – 5:00 PM", "Open 24 hours" or "Closed".
    pub fn hours_text(&self) -> String {
        if self.is_all_day() {
            return "Open 24 hours".into();
        }
        match (self.window(), self.open_time, self.close_time) {
            (Some(_), Some(open), Some(close)) => {
                format!("{} – {}", format_clock(open), format_clock(close))
            }
            _ => "Closed".into(),
        }
    }
}

/// Weekly rows plus the IANA zone they are expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueHours {
    pub timezone: Tz,
    pub weekly_hours: Vec<WeeklyHoursRow>,
}

impl VenueHours {
    pub fn new(timezone: &str, weekly_hours: Vec<WeeklyHoursRow>) -> Result<Self, HoursError> {
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|_| HoursError::UnknownTimezone(timezone.to_string()))?;
        Ok(Self { timezone, weekly_hours })
    }

    pub fn row(&self, day_of_week: u8) -> Option<&WeeklyHoursRow> {
        self.weekly_hours.iter().find(|r| r.day_of_week == day_of_week)
    }

    /// Insert or replace the row for its day.
    pub fn set_row(&mut self, row: WeeklyHoursRow) {
        self.weekly_hours.retain(|r| r.day_of_week != row.day_of_week);
        self.weekly_hours.push(row);
        self.weekly_hours.sort_by_key(|r| r.day_of_week);
    }

    fn window_for(&self, date: NaiveDate) -> Option<(u32, u32)> {
        self.row(day_index(date.weekday()))?.window()
    }

    fn hours_text_for(&self, date: NaiveDate) -> String {
        self.row(day_index(date.weekday()))
            .map(WeeklyHoursRow::hours_text)
            .unwrap_or_else(|| "Closed".into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpenState {
    OpenNow,
    ClosedNow,
    OpensLater,
    ClosedToday,
}

impl OpenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenState::OpenNow => "OPEN_NOW",
            OpenState::ClosedNow => "CLOSED_NOW",
            OpenState::OpensLater => "OPENS_LATER",
            OpenState::ClosedToday => "CLOSED_TODAY",
        }
    }
}

/// Open/closed classification of a venue at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenStatus {
    pub is_open: bool,
    pub status: OpenState,
    /// Local weekday name, e.g. "Monday".
    pub today_label: String,
    pub today_hours_text: String,
    pub next_open_at: Option<Ms>,
}

pub fn open_status(hours: &VenueHours, at: Ms) -> OpenStatus {
    let tz = hours.timezone;
    let now = to_local(tz, at);
    let today = now.date_naive();
    let secs = now.num_seconds_from_midnight();

    let (status, next_open_at) = match hours.window_for(today) {
        Some((open, close)) if secs >= open && secs < close => (OpenState::OpenNow, None),
        Some((open, _)) if secs < open => {
            (OpenState::OpensLater, Some(local_instant(tz, today, open)))
        }
        Some(_) => (OpenState::ClosedNow, next_opening_after(hours, today)),
        None => (OpenState::ClosedToday, next_opening_after(hours, today)),
    };

    OpenStatus {
        is_open: status == OpenState::OpenNow,
        status,
        today_label: weekday_name(today.weekday()).to_string(),
        today_hours_text: hours.hours_text_for(today),
        next_open_at,
    }
}

/// First opening instant on a later local day, searching one week ahead.
fn next_opening_after(hours: &VenueHours, today: NaiveDate) -> Option<Ms> {
    (1..=7).find_map(|offset| {
        let date = today + Duration::days(offset);
        hours
            .window_for(date)
            .map(|(open, _)| local_instant(hours.timezone, date, open))
    })
}

/// Fixed one-hour slots covering the open window of a local calendar date.
pub fn slot_times_for_date(hours: &VenueHours, date: &str) -> Result<Vec<Span>, HoursError> {
    slot_times_for_date_with(hours, date, DEFAULT_SLOT_SECS)
}

/// Slots of `step_secs` from open to close; the last one is clipped to the
/// closing time as written, so a 23:59 close ends at 23:59 rather than
/// midnight. Empty when the day is closed.
pub fn slot_times_for_date_with(
    hours: &VenueHours,
    date: &str,
    step_secs: u32,
) -> Result<Vec<Span>, HoursError> {
    let date = parse_date(date)?;
    let Some((open, close)) = hours.window_for(date) else {
        return Ok(Vec::new());
    };
    let close = if close == SECONDS_PER_DAY { close - 60 } else { close };
    let step = step_secs.max(60);

    let mut slots = Vec::new();
    let mut cursor = open;
    while cursor < close {
        let next = (cursor + step).min(close);
        let start = local_instant(hours.timezone, date, cursor);
        let end = local_instant(hours.timezone, date, next);
        // A slot swallowed by a DST gap collapses to nothing.
        if end > start {
            slots.push(Span::new(start, end));
        }
        cursor = next;
    }
    Ok(slots)
}

/// Absolute open intervals touching `window`. Windows of adjacent local days
/// that meet at midnight are merged into one span.
pub fn open_spans(hours: &VenueHours, window: &Span) -> Vec<Span> {
    let tz = hours.timezone;
    let first = to_local(tz, window.start).date_naive() - Duration::days(1);
    let last = to_local(tz, window.end).date_naive() + Duration::days(1);

    let mut spans = Vec::new();
    let mut date = first;
    while date <= last {
        if let Some((open, close)) = hours.window_for(date) {
            let start = local_instant(tz, date, open);
            let end = local_instant(tz, date, close);
            if end > start {
                spans.push(Span::new(start, end));
            }
        }
        date += Duration::days(1);
    }
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
        .into_iter()
        .filter(|s| s.overlaps(window))
        .collect()
}

/// True when every instant of `window` falls inside opening hours.
pub fn window_within_hours(hours: &VenueHours, window: &Span) -> bool {
    open_spans(hours, window)
        .iter()
        .any(|s| s.contains_span(window))
}

/// 12-hour clock rendering of an instant in `tz`, e.g. "7:30 AM".
pub fn format_time(at: Ms, tz: Tz) -> String {
    to_local(tz, at).format("%-I:%M %p").to_string()
}

pub fn format_clock(t: NaiveTime) -> String {
    t.format("%-I:%M %p").to_string()
}

pub fn parse_clock(s: &str) -> Result<NaiveTime, HoursError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| HoursError::BadTime(s.to_string()))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, HoursError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| HoursError::BadDate(s.to_string()))
}

pub fn to_local(tz: Tz, at: Ms) -> DateTime<Tz> {
    DateTime::from_timestamp_millis(at)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .with_timezone(&tz)
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

fn day_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

/// Instant of `secs` after local midnight on `date`.
fn local_instant(tz: Tz, date: NaiveDate, secs: u32) -> Ms {
    let naive = date.and_time(NaiveTime::MIN) + Duration::seconds(i64::from(secs));
    resolve_local(tz, naive)
}

/// Ambiguous local times take the earlier instant; times inside a DST gap
/// move forward to the first valid local time after it.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Ms {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..12 {
                probe += Duration::minutes(15);
                if let Some(t) = tz.from_local_datetime(&probe).earliest() {
                    return t.timestamp_millis();
                }
            }
            tracing::warn!("cannot resolve local time {naive} in {tz}, treating as UTC");
            naive.and_utc().timestamp_millis()
        }
    }
}
