use crate::model::{Ms, DAY_MS, HOUR_MS, MINUTE_MS};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single reservation.
pub const MAX_RESERVATION_MS: Ms = 7 * DAY_MS;
/// Widest exact-window availability query.
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * DAY_MS;

pub const MAX_SEATS_PER_REQUEST: usize = 64;
pub const MAX_SEAT_COUNT: u32 = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_MESSAGE_LEN: usize = 1_024;

// ── Availability label ───────────────────────────────────────────

/// Granularity of candidate start times.
pub const LABEL_STEP_MS: Ms = 15 * MINUTE_MS;
/// How far ahead to look for a free window.
pub const LABEL_HORIZON_MS: Ms = 12 * HOUR_MS;
/// Length of the window that must be free.
pub const LABEL_WINDOW_MS: Ms = HOUR_MS;
