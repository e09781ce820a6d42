use std::io;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

use super::conflict::ConflictWith;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    /// Lost the race: the write-time re-check found a conflict.
    #[error("conflict: {0}")]
    Conflict(ConflictWith),
    #[error("{0}")]
    Invalid(String),
    #[error("journal: {0}")]
    Io(String),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Persistence collaborator of the engine.
///
/// Writes re-validate conflicts atomically: of two racing inserts that
/// collide, at most one succeeds and the other gets `StoreError::Conflict`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Venue joined with its owner and tables.
    async fn find_venue(&self, venue_id: Ulid) -> Result<Option<Venue>, StoreError>;

    async fn find_account(&self, account_id: Ulid) -> Result<Option<Account>, StoreError>;

    async fn find_reservation(
        &self,
        id: Ulid,
    ) -> Result<Option<ReservationWithContext>, StoreError>;

    /// Active reservations overlapping `window`, minus `exclude`.
    async fn reservations_overlapping(
        &self,
        venue_id: Ulid,
        selector: ResourceSelector,
        window: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// With `seat_id = None`, every block in the venue; otherwise blocks on
    /// that seat plus venue-wide ones.
    async fn seat_blocks_overlapping(
        &self,
        venue_id: Ulid,
        seat_id: Option<Ulid>,
        window: Span,
    ) -> Result<Vec<SeatBlock>, StoreError>;

    /// All-or-nothing insert of reservations that share one venue.
    async fn insert_reservations(&self, reservations: Vec<Reservation>) -> Result<(), StoreError>;

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError>;

    async fn update_reservation_window(
        &self,
        id: Ulid,
        change: WindowChange,
    ) -> Result<Reservation, StoreError>;
}
