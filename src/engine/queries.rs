use ulid::Ulid;

use crate::hours::{self, OpenStatus};
use crate::limits::*;
use crate::model::*;

use super::availability::{day_slots, partition_seats, DaySlots, WindowAvailability};
use super::label::{availability_label, ceil_to_quarter, LabelOptions};
use super::{Engine, EngineError};

impl Engine {
    /// Which seats are free for exactly `[start, end)`.
    pub async fn seat_availability(
        &self,
        venue_id: Ulid,
        start: Ms,
        end: Ms,
        seat_count: u32,
    ) -> Result<WindowAvailability, EngineError> {
        let venue = self.viewable_venue(venue_id).await?;
        let window = super::validate_window(start, end)?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let reservations = self
            .store
            .reservations_overlapping(venue_id, ResourceSelector::Venue, window, None)
            .await?;
        let blocks = self
            .store
            .seat_blocks_overlapping(venue_id, None, window)
            .await?;
        Ok(partition_seats(
            &venue,
            &window,
            seat_count.max(1),
            &reservations,
            &blocks,
        ))
    }

    /// Remaining seats per hourly slot of a local calendar date.
    pub async fn slots_for_date(&self, venue_id: Ulid, date: &str) -> Result<DaySlots, EngineError> {
        let venue = self.viewable_venue(venue_id).await?;
        let capacity = venue.capacity();
        if capacity == 0 {
            return Err(EngineError::validation(
                "NO_CAPACITY",
                "venue has no reservable seats",
            ));
        }
        let Some(hours) = venue.hours.as_ref() else {
            hours::parse_date(date)?;
            return Ok(DaySlots { capacity, slots: Vec::new() });
        };
        let slots = hours::slot_times_for_date(hours, date)?;
        let (Some(first), Some(last)) = (slots.first(), slots.last()) else {
            return Ok(DaySlots { capacity, slots: Vec::new() });
        };
        let day = Span::new(first.start, last.end);
        let reservations = self
            .store
            .reservations_overlapping(venue_id, ResourceSelector::Venue, day, None)
            .await?;
        Ok(day_slots(capacity, &slots, &reservations))
    }

    /// `None` when the venue has no hours configured.
    pub async fn open_status(&self, venue_id: Ulid, at: Ms) -> Result<Option<OpenStatus>, EngineError> {
        let venue = self.viewable_venue(venue_id).await?;
        Ok(venue.hours.as_ref().map(|h| hours::open_status(h, at)))
    }

    pub async fn venue_label(&self, venue_id: Ulid, now: Ms) -> Result<String, EngineError> {
        let venue = self.viewable_venue(venue_id).await?;
        let status = venue.hours.as_ref().map(|h| hours::open_status(h, now));
        let scan_from = ceil_to_quarter(now);
        let horizon = Span::new(scan_from, scan_from + LABEL_HORIZON_MS + LABEL_WINDOW_MS);
        let reservations = self
            .store
            .reservations_overlapping(venue_id, ResourceSelector::Venue, horizon, None)
            .await?;
        let options = LabelOptions {
            now,
            timezone: venue.hours.as_ref().map(|h| h.timezone),
        };
        Ok(availability_label(
            venue.capacity(),
            &reservations,
            status.as_ref(),
            &options,
        ))
    }
}
