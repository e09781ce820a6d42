mod availability;
mod conflict;
mod error;
mod guard;
mod label;
mod memory;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{day_slots, partition_seats, DaySlots, SeatView, SlotAvailability, WindowAvailability};
pub use conflict::{booked_seats, check_conflicts, has_overlap, ConflictWith};
pub use error::EngineError;
pub use guard::{bookability, Bookability, BookabilityStatus, BookingBlock};
pub use label::{availability_label, ceil_to_quarter, LabelOptions};
pub use memory::{run_compactor, MemoryStore};
pub use mutations::{quote, RescheduleRequest, ReservationRequest};
pub use store::{Store, StoreError};

use std::sync::Arc;

use ulid::Ulid;

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::notify::NotificationQueue;

/// Booking and availability operations over a [`Store`].
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub notify: Arc<NotificationQueue>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, notify: Arc<NotificationQueue>) -> Self {
        Self { store, notify }
    }

    /// Load a venue guests may see. Deleted venues are 404 like missing ones.
    async fn viewable_venue(&self, venue_id: Ulid) -> Result<Venue, EngineError> {
        self.store
            .find_venue(venue_id)
            .await?
            .filter(|v| !v.is_deleted())
            .ok_or(EngineError::not_found("venue", venue_id))
    }
}

/// `[start, end)` from client input: both inside the supported range and
/// `start < end`.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    for t in [start, end] {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
            return Err(EngineError::validation(
                "INVALID_TIMESTAMP",
                format!("timestamp {t} out of range"),
            ));
        }
    }
    Span::try_new(start, end).ok_or_else(|| {
        EngineError::validation("INVALID_WINDOW", "start must be before end")
    })
}
