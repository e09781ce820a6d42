use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Why a venue, table or seat cannot take bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingBlock {
    VenueNotFound,
    VenueDeleted,
    VenuePaused,
    OwnerDeleted,
    TableInactive,
    SeatInactive,
}

impl BookingBlock {
    pub fn code(&self) -> &'static str {
        match self {
            BookingBlock::VenueNotFound => "VENUE_NOT_FOUND",
            BookingBlock::VenueDeleted => "VENUE_DELETED",
            BookingBlock::VenuePaused => "VENUE_PAUSED",
            BookingBlock::OwnerDeleted => "OWNER_DELETED",
            BookingBlock::TableInactive => "TABLE_INACTIVE",
            BookingBlock::SeatInactive => "SEAT_INACTIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BookabilityStatus {
    Active,
    Paused,
    Deleted,
    OwnerDeleted,
    NotFound,
}

impl BookabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookabilityStatus::Active => "ACTIVE",
            BookabilityStatus::Paused => "PAUSED",
            BookabilityStatus::Deleted => "DELETED",
            BookabilityStatus::OwnerDeleted => "OWNER_DELETED",
            BookabilityStatus::NotFound => "NOT_FOUND",
        }
    }
}

/// Display-time answer to "can this venue be booked".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookability {
    pub can_book: bool,
    pub reason: Option<String>,
    pub pause_message: Option<String>,
    pub status: BookabilityStatus,
}

/// Venue-level eligibility. Deleted wins over paused, paused over a
/// deleted owner.
pub fn venue_block(venue: &Venue) -> Option<BookingBlock> {
    if venue.is_deleted() {
        Some(BookingBlock::VenueDeleted)
    } else if venue.status == VenueStatus::Paused {
        Some(BookingBlock::VenuePaused)
    } else if !venue.owner.as_ref().is_some_and(Account::is_active) {
        Some(BookingBlock::OwnerDeleted)
    } else {
        None
    }
}

pub fn ensure_bookable(venue: Option<&Venue>) -> Result<&Venue, EngineError> {
    let Some(venue) = venue else {
        return Err(EngineError::BookingNotAllowed {
            block: BookingBlock::VenueNotFound,
            public_message: None,
        });
    };
    match venue_block(venue) {
        None => Ok(venue),
        Some(block) => Err(EngineError::BookingNotAllowed {
            block,
            public_message: match block {
                BookingBlock::VenuePaused => venue.pause_message.clone(),
                _ => None,
            },
        }),
    }
}

pub fn bookability(venue: Option<&Venue>) -> Bookability {
    let Some(venue) = venue else {
        return Bookability {
            can_book: false,
            reason: Some("Venue not found".into()),
            pause_message: None,
            status: BookabilityStatus::NotFound,
        };
    };
    let (status, reason) = match venue_block(venue) {
        None => (BookabilityStatus::Active, None),
        Some(BookingBlock::VenuePaused) => (
            BookabilityStatus::Paused,
            Some("This venue is temporarily not accepting bookings".to_string()),
        ),
        Some(BookingBlock::OwnerDeleted) => (
            BookabilityStatus::OwnerDeleted,
            Some("This venue is no longer available".to_string()),
        ),
        Some(_) => (
            BookabilityStatus::Deleted,
            Some("This venue has been removed".to_string()),
        ),
    };
    Bookability {
        can_book: status == BookabilityStatus::Active,
        reason,
        pause_message: if status == BookabilityStatus::Paused {
            venue.pause_message.clone()
        } else {
            None
        },
        status,
    }
}

/// The table (and seat) must exist in the venue and be active.
pub fn check_target(venue: &Venue, target: &Target) -> Result<(), EngineError> {
    let not_allowed = |block| EngineError::BookingNotAllowed {
        block,
        public_message: None,
    };
    match *target {
        Target::Seat { table_id, seat_id } => {
            let table = venue
                .table(table_id)
                .ok_or(EngineError::not_found("table", table_id))?;
            let seat = table
                .seat(seat_id)
                .ok_or(EngineError::not_found("seat", seat_id))?;
            if !table.is_active {
                return Err(not_allowed(BookingBlock::TableInactive));
            }
            if !seat.is_active {
                return Err(not_allowed(BookingBlock::SeatInactive));
            }
            Ok(())
        }
        Target::Table { table_id } => {
            let table = venue
                .table(table_id)
                .ok_or(EngineError::not_found("table", table_id))?;
            if !table.is_active {
                return Err(not_allowed(BookingBlock::TableInactive));
            }
            Ok(())
        }
        Target::Pool => Ok(()),
    }
}

impl Engine {
    /// Guard form: returns normally when the venue can take bookings.
    pub async fn can_book_venue(&self, venue_id: Ulid) -> Result<(), EngineError> {
        let venue = self.store.find_venue(venue_id).await?;
        ensure_bookable(venue.as_ref()).map(|_| ())
    }

    /// Query form of [`Engine::can_book_venue`] for display.
    pub async fn venue_bookability(&self, venue_id: Ulid) -> Result<Bookability, EngineError> {
        let venue = self.store.find_venue(venue_id).await?;
        Ok(bookability(venue.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> Venue {
        let owner = Account {
            id: Ulid::new(),
            email: "owner@example.com".into(),
            role: Role::Member,
            status: AccountStatus::Active,
        };
        Venue {
            id: Ulid::new(),
            name: Some("Reading Room".into()),
            owner_id: owner.id,
            owner: Some(owner),
            status: VenueStatus::Active,
            pause_message: None,
            deleted_at: None,
            hours: None,
            tables: vec![],
        }
    }

    #[test]
    fn active_venue_is_bookable() {
        let v = venue();
        assert_eq!(venue_block(&v), None);
        assert!(ensure_bookable(Some(&v)).is_ok());
        let b = bookability(Some(&v));
        assert!(b.can_book);
        assert_eq!(b.status, BookabilityStatus::Active);
    }

    #[test]
    fn missing_venue() {
        let err = ensure_bookable(None).unwrap_err();
        assert_eq!(err.code(), "VENUE_NOT_FOUND");
        assert_eq!(bookability(None).status, BookabilityStatus::NotFound);
    }

    #[test]
    fn paused_venue_carries_message() {
        let mut v = venue();
        v.status = VenueStatus::Paused;
        v.pause_message = Some("Closed for renovation".into());
        match ensure_bookable(Some(&v)) {
            Err(EngineError::BookingNotAllowed { block, public_message }) => {
                assert_eq!(block, BookingBlock::VenuePaused);
                assert_eq!(public_message.as_deref(), Some("Closed for renovation"));
            }
            other => panic!("expected VENUE_PAUSED, got {other:?}"),
        }
        let b = bookability(Some(&v));
        assert!(!b.can_book);
        assert_eq!(b.status, BookabilityStatus::Paused);
        assert_eq!(b.pause_message.as_deref(), Some("Closed for renovation"));
    }

    #[test]
    fn soft_deleted_venue() {
        let mut v = venue();
        v.deleted_at = Some(1);
        assert_eq!(venue_block(&v), Some(BookingBlock::VenueDeleted));
        v.deleted_at = None;
        v.status = VenueStatus::Deleted;
        v.pause_message = Some("ignored".into());
        assert_eq!(bookability(Some(&v)).status, BookabilityStatus::Deleted);
        assert_eq!(bookability(Some(&v)).pause_message, None);
    }

    #[test]
    fn deleted_or_missing_owner() {
        let mut v = venue();
        if let Some(owner) = v.owner.as_mut() {
            owner.status = AccountStatus::Deleted;
        }
        assert_eq!(venue_block(&v), Some(BookingBlock::OwnerDeleted));
        v.owner = None;
        assert_eq!(ensure_bookable(Some(&v)).unwrap_err().code(), "OWNER_DELETED");
    }

    #[test]
    fn inactive_table_and_seat() {
        let mut v = venue();
        let table_id = Ulid::new();
        let seat_id = Ulid::new();
        v.tables.push(Table {
            id: table_id,
            venue_id: v.id,
            name: None,
            seat_count: 1,
            booking_mode: BookingMode::Individual,
            table_price_per_hour: None,
            is_active: true,
            seats: vec![Seat {
                id: seat_id,
                table_id,
                label: None,
                price_per_hour: 0,
                is_active: false,
            }],
        });
        let seat = Target::Seat { table_id, seat_id };
        assert_eq!(check_target(&v, &seat).unwrap_err().code(), "SEAT_INACTIVE");
        v.tables[0].is_active = false;
        assert_eq!(
            check_target(&v, &Target::Table { table_id }).unwrap_err().code(),
            "TABLE_INACTIVE"
        );
        let unknown = Target::Seat { table_id, seat_id: Ulid::new() };
        assert_eq!(check_target(&v, &unknown).unwrap_err().status(), 404);
        assert!(check_target(&v, &Target::Pool).is_ok());
    }
}
