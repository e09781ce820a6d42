use chrono::Datelike;
use chrono_tz::Tz;

use crate::hours::{format_time, to_local, weekday_name, OpenStatus};
use crate::limits::{LABEL_HORIZON_MS, LABEL_STEP_MS, LABEL_WINDOW_MS};
use crate::model::*;

use super::conflict::booked_seats;

pub const SOLD_OUT: &str = "Sold out for now";
pub const CURRENTLY_CLOSED: &str = "Currently Closed";
pub const AVAILABLE_NOW: &str = "Available now";

#[derive(Debug, Clone, Copy)]
pub struct LabelOptions {
    pub now: Ms,
    /// Zone used to render times; UTC when absent.
    pub timezone: Option<Tz>,
}

/// Round up to the next quarter hour. An instant already on a boundary
/// (zero seconds, zero millis) is returned as is.
pub fn ceil_to_quarter(at: Ms) -> Ms {
    let rem = at.rem_euclid(LABEL_STEP_MS);
    if rem == 0 { at } else { at - rem + LABEL_STEP_MS }
}

/// The short "when can I sit down" line shown on a venue card.
pub fn availability_label(
    capacity: u32,
    reservations: &[Reservation],
    open_status: Option<&OpenStatus>,
    options: &LabelOptions,
) -> String {
    if capacity == 0 {
        return SOLD_OUT.into();
    }
    let Some(status) = open_status else {
        return CURRENTLY_CLOSED.into();
    };
    let tz = options.timezone.unwrap_or(Tz::UTC);

    if !status.is_open {
        let Some(next) = status.next_open_at else {
            return CURRENTLY_CLOSED.into();
        };
        let today = to_local(tz, options.now).date_naive();
        let opens = to_local(tz, next);
        let time = format_time(next, tz);
        return match (opens.date_naive() - today).num_days() {
            d if d <= 0 => format!("Opens at {time}"),
            1 => format!("Opens tomorrow at {time}"),
            _ => format!("Opens {} at {time}", weekday_name(opens.weekday())),
        };
    }

    let first = ceil_to_quarter(options.now);
    let steps = LABEL_HORIZON_MS / LABEL_STEP_MS;
    for step in 0..steps {
        let start = first + step * LABEL_STEP_MS;
        let window = Span::new(start, start + LABEL_WINDOW_MS);
        if booked_seats(reservations, &window) < capacity {
            return if step == 0 {
                AVAILABLE_NOW.into()
            } else {
                format!("Next availability @ {}", format_time(start, tz))
            };
        }
    }
    SOLD_OUT.into()
}
