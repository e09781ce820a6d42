use std::collections::HashSet;
use std::fmt;

use ulid::Ulid;

use crate::model::*;

/// What a candidate window ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWith {
    Reservation(Ulid),
    Block(Ulid),
    Capacity { booked: u32, requested: u32, capacity: u32 },
}

impl fmt::Display for ConflictWith {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictWith::Reservation(id) => write!(f, "already reserved ({id})"),
            ConflictWith::Block(id) => write!(f, "blocked ({id})"),
            ConflictWith::Capacity { booked, requested, capacity } => write!(
                f,
                "{booked} of {capacity} seats taken, {requested} more requested"
            ),
        }
    }
}

/// `[start, end)` against a set of half-open intervals.
pub fn has_overlap(start: Ms, end: Ms, existing: &[Span]) -> bool {
    let candidate = Span { start, end };
    existing.iter().any(|s| s.overlaps(&candidate))
}

/// Seats held by active reservations overlapping `window`.
pub fn booked_seats(reservations: &[Reservation], window: &Span) -> u32 {
    reservations
        .iter()
        .filter(|r| r.is_active() && r.span.overlaps(window))
        .map(|r| r.seat_count)
        .sum()
}

/// Decide whether `target` can take `seat_count` seats over `window`.
///
/// `reservations` and `blocks` may be a superset of what matters; anything
/// outside the venue, outside the window, cancelled, or equal to `exclude`
/// is ignored. The store runs the same check under its write lock.
pub fn check_conflicts(
    venue: &Venue,
    target: &Target,
    window: &Span,
    seat_count: u32,
    reservations: &[Reservation],
    blocks: &[SeatBlock],
    exclude: Option<Ulid>,
) -> Result<(), ConflictWith> {
    let live: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| {
            r.is_active()
                && r.venue_id == venue.id
                && Some(r.id) != exclude
                && r.span.overlaps(window)
        })
        .collect();
    let blocks: Vec<&SeatBlock> = blocks
        .iter()
        .filter(|b| b.venue_id == venue.id && b.span.overlaps(window))
        .collect();

    if let Some(b) = blocks.iter().find(|b| b.is_venue_wide()) {
        return Err(ConflictWith::Block(b.id));
    }

    let target_check = match *target {
        Target::Seat { table_id, seat_id } => {
            if let Some(b) = blocks.iter().find(|b| b.seat_id == Some(seat_id)) {
                return Err(ConflictWith::Block(b.id));
            }
            if let Some(r) = live.iter().find(|r| r.target.seat_id() == Some(seat_id)) {
                return Err(ConflictWith::Reservation(r.id));
            }
            match venue.table(table_id) {
                None => Ok(()),
                Some(table) => match table.booking_mode {
                    BookingMode::Group => match live.iter().find(|r| r.target.table_id() == Some(table_id)) {
                        Some(r) => Err(ConflictWith::Reservation(r.id)),
                        None => Ok(()),
                    },
                    BookingMode::Individual => check_table_load(table, &live, &blocks, seat_count),
                },
            }
        }
        Target::Table { table_id } => match venue.table(table_id) {
            None => Ok(()),
            Some(table) => match table.booking_mode {
                BookingMode::Group => {
                    if let Some(b) = blocks
                        .iter()
                        .find(|b| b.seat_id.is_some_and(|s| table.has_seat(s)))
                    {
                        return Err(ConflictWith::Block(b.id));
                    }
                    match live.iter().find(|r| r.target.table_id() == Some(table_id)) {
                        Some(r) => Err(ConflictWith::Reservation(r.id)),
                        None => Ok(()),
                    }
                }
                BookingMode::Individual => check_table_load(table, &live, &blocks, seat_count),
            },
        },
        Target::Pool => Ok(()),
    };
    target_check?;
    // Pooled holds count against every target.
    check_venue_load(venue, &live, seat_count)
}

/// Sum of every overlapping hold plus `requested` against venue capacity.
fn check_venue_load(venue: &Venue, live: &[&Reservation], requested: u32) -> Result<(), ConflictWith> {
    let booked: u32 = live.iter().map(|r| r.seat_count).sum();
    let capacity = venue.capacity();
    if booked + requested > capacity {
        return Err(ConflictWith::Capacity {
            booked,
            requested,
            capacity,
        });
    }
    Ok(())
}

/// Seats of an individual-mode table that are spoken for: distinct seats
/// with their own reservation or block, plus pooled table reservations.
fn table_load(table: &Table, live: &[&Reservation], blocks: &[&SeatBlock]) -> u32 {
    let mut occupied: HashSet<Ulid> = HashSet::new();
    let mut pooled = 0u32;
    for r in live {
        match r.target {
            Target::Seat { table_id, seat_id } if table_id == table.id => {
                occupied.insert(seat_id);
            }
            Target::Table { table_id } if table_id == table.id => pooled += r.seat_count,
            _ => {}
        }
    }
    for b in blocks {
        if let Some(seat_id) = b.seat_id
            && table.has_seat(seat_id) {
                occupied.insert(seat_id);
            }
    }
    let occupied_active = table
        .seats
        .iter()
        .filter(|s| s.is_active && occupied.contains(&s.id))
        .count() as u32;
    occupied_active + pooled
}

fn check_table_load(
    table: &Table,
    live: &[&Reservation],
    blocks: &[&SeatBlock],
    requested: u32,
) -> Result<(), ConflictWith> {
    let booked = table_load(table, live, blocks);
    let capacity = table.capacity();
    if booked + requested > capacity {
        return Err(ConflictWith::Capacity {
            booked,
            requested,
            capacity,
        });
    }
    Ok(())
}
