use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::hours::{VenueHours, WeeklyHoursRow};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Money in minor units (cents).
pub type Cents = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans built from user input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Wall clock in Unix milliseconds.
pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Parse an instant given either as integer milliseconds or as RFC 3339.
pub fn parse_instant(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Some(ms);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

// ── Accounts & actors ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Whoever is driving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// The configured operator login; manages venues, holds no reservations.
    System,
    Account(Account),
}

impl Actor {
    pub fn account(&self) -> Option<&Account> {
        match self {
            Actor::System => None,
            Actor::Account(a) => Some(a),
        }
    }

    pub fn is_admin(&self) -> bool {
        match self {
            Actor::System => true,
            Actor::Account(a) => a.role == Role::Admin,
        }
    }

    pub fn is(&self, account_id: Ulid) -> bool {
        self.account().is_some_and(|a| a.id == account_id)
    }
}

// ── Venues, tables, seats ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueStatus {
    Active,
    Paused,
    Deleted,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueStatus::Active => "ACTIVE",
            VenueStatus::Paused => "PAUSED",
            VenueStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(VenueStatus::Active),
            "PAUSED" => Some(VenueStatus::Paused),
            "DELETED" => Some(VenueStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingMode {
    /// The table is a container of independently bookable seats.
    Individual,
    /// The table itself is the bookable unit.
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Ulid,
    pub table_id: Ulid,
    pub label: Option<String>,
    pub price_per_hour: Cents,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: Option<String>,
    /// Declared size; only authoritative for tables without seat rows.
    pub seat_count: u32,
    pub booking_mode: BookingMode,
    pub table_price_per_hour: Option<Cents>,
    pub is_active: bool,
    pub seats: Vec<Seat>,
}

/// Uniform seat view over explicit seat rows and legacy tables that only
/// carry a `seat_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveSeats<'a> {
    Explicit(Vec<&'a Seat>),
    Synthetic(u32),
}

impl EffectiveSeats<'_> {
    pub fn count(&self) -> u32 {
        match self {
            EffectiveSeats::Explicit(seats) => seats.len() as u32,
            EffectiveSeats::Synthetic(n) => *n,
        }
    }
}

impl Table {
    pub fn effective_seats(&self) -> EffectiveSeats<'_> {
        if self.seats.is_empty() {
            EffectiveSeats::Synthetic(self.seat_count)
        } else {
            EffectiveSeats::Explicit(self.seats.iter().filter(|s| s.is_active).collect())
        }
    }

    /// Seats this table contributes to venue capacity (0 when inactive).
    pub fn capacity(&self) -> u32 {
        if self.is_active {
            self.effective_seats().count()
        } else {
            0
        }
    }

    pub fn seat(&self, seat_id: Ulid) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id == seat_id)
    }

    pub fn has_seat(&self, seat_id: Ulid) -> bool {
        self.seats.iter().any(|s| s.id == seat_id)
    }
}

/// Identifies one effective seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SeatKey {
    Seat(Ulid),
    Synthetic { table_id: Ulid, index: u32 },
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatKey::Seat(id) => write!(f, "{id}"),
            SeatKey::Synthetic { table_id, index } => write!(f, "{table_id}#{index}"),
        }
    }
}

/// Venue row as persisted; the owner is referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub id: Ulid,
    pub name: Option<String>,
    pub owner_id: Ulid,
    pub status: VenueStatus,
    pub pause_message: Option<String>,
    /// Soft-delete marker.
    pub deleted_at: Option<Ms>,
    pub hours: Option<VenueHours>,
}

/// Venue joined with its owner and tables, as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Venue {
    pub id: Ulid,
    pub name: Option<String>,
    pub owner_id: Ulid,
    pub owner: Option<Account>,
    pub status: VenueStatus,
    pub pause_message: Option<String>,
    pub deleted_at: Option<Ms>,
    pub hours: Option<VenueHours>,
    pub tables: Vec<Table>,
}

impl Venue {
    pub fn table(&self, table_id: Ulid) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    /// Find a seat and the table that holds it.
    pub fn seat(&self, seat_id: Ulid) -> Option<(&Table, &Seat)> {
        self.tables
            .iter()
            .find_map(|t| t.seat(seat_id).map(|s| (t, s)))
    }

    /// Total reservable seats across active tables.
    pub fn capacity(&self) -> u32 {
        self.tables.iter().map(Table::capacity).sum()
    }

    pub fn is_deleted(&self) -> bool {
        self.status == VenueStatus::Deleted || self.deleted_at.is_some()
    }

    pub fn is_owned_by(&self, account_id: Ulid) -> bool {
        self.owner_id == account_id
    }
}

// ── Reservations & blocks ────────────────────────────────────────

/// What a reservation holds. Exactly one of seat / table, or neither for
/// venue-level pooled capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Seat { table_id: Ulid, seat_id: Ulid },
    Table { table_id: Ulid },
    Pool,
}

impl Target {
    pub fn table_id(&self) -> Option<Ulid> {
        match self {
            Target::Seat { table_id, .. } | Target::Table { table_id } => Some(*table_id),
            Target::Pool => None,
        }
    }

    pub fn seat_id(&self) -> Option<Ulid> {
        match self {
            Target::Seat { seat_id, .. } => Some(*seat_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub account_id: Ulid,
    pub target: Target,
    pub seat_count: u32,
    pub span: Span,
    pub status: ReservationStatus,
    pub total_cents: Cents,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// A reservation together with the venue it belongs to, for call sites that
/// authorize against the venue owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationWithContext {
    pub reservation: Reservation,
    pub venue: Venue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatBlock {
    pub id: Ulid,
    pub venue_id: Ulid,
    /// `None` blocks every seat in the venue.
    pub seat_id: Option<Ulid>,
    pub span: Span,
    pub reason: Option<String>,
}

impl SeatBlock {
    pub fn is_venue_wide(&self) -> bool {
        self.seat_id.is_none()
    }

    pub fn covers_seat(&self, seat_id: Ulid) -> bool {
        self.seat_id.is_none_or(|s| s == seat_id)
    }
}

/// Narrows a reservation lookup to what a conflict check needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSelector {
    /// Every reservation in the venue.
    Venue,
    /// Reservations on the table itself or on any of its seats.
    Table(Ulid),
    /// Reservations on the seat.
    Seat(Ulid),
}

/// New window (and possibly seat) for an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowChange {
    pub span: Span,
    pub target: Target,
    pub total_cents: Cents,
}

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AccountUpserted(Account),
    VenueUpserted(VenueRecord),
    VenueStatusChanged {
        id: Ulid,
        status: VenueStatus,
        pause_message: Option<String>,
        deleted_at: Option<Ms>,
    },
    HoursRowSet {
        venue_id: Ulid,
        row: WeeklyHoursRow,
    },
    /// Seats already attached to the table are kept.
    TableUpserted(Table),
    SeatUpserted {
        venue_id: Ulid,
        seat: Seat,
    },
    SeatBlockAdded(SeatBlock),
    SeatBlockRemoved {
        id: Ulid,
        venue_id: Ulid,
    },
    ReservationsCreated {
        venue_id: Ulid,
        reservations: Vec<Reservation>,
    },
    ReservationStatusChanged {
        id: Ulid,
        venue_id: Ulid,
        status: ReservationStatus,
    },
    ReservationRescheduled {
        id: Ulid,
        venue_id: Ulid,
        change: WindowChange,
    },
}
