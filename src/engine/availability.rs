use std::collections::BTreeMap;

use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::conflict::booked_seats;

/// One effective seat as shown to a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatView {
    #[serde(skip)]
    pub key: SeatKey,
    pub table_id: Ulid,
    pub label: Option<String>,
    pub price_per_hour: Cents,
}

/// Result of an exact-window query. Asking for more seats than the venue
/// has is a soft answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAvailability {
    Seats {
        available: Vec<SeatView>,
        /// Taken seats with the table they sit on.
        unavailable: BTreeMap<SeatKey, Ulid>,
    },
    CapacityExceeded {
        requested: u32,
        capacity: u32,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub span: Span,
    pub available_seats: u32,
    pub is_fully_booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySlots {
    pub capacity: u32,
    pub slots: Vec<SlotAvailability>,
}

fn seat_views(table: &Table) -> Vec<SeatView> {
    match table.effective_seats() {
        EffectiveSeats::Explicit(seats) => seats
            .into_iter()
            .map(|s| SeatView {
                key: SeatKey::Seat(s.id),
                table_id: table.id,
                label: s.label.clone(),
                price_per_hour: s.price_per_hour,
            })
            .collect(),
        EffectiveSeats::Synthetic(n) => (0..n)
            .map(|index| SeatView {
                key: SeatKey::Synthetic { table_id: table.id, index },
                table_id: table.id,
                label: None,
                price_per_hour: table.table_price_per_hour.unwrap_or(0),
            })
            .collect(),
    }
}

/// Split every effective seat of the venue's active tables into available
/// and unavailable for `window`.
///
/// A seat is unavailable when its own reservation, a group reservation of
/// its table, or a block (seat-specific or venue-wide) overlaps the window.
/// Seat counts of pooled table reservations occupy the table's first free
/// seats. Venue-level pool reservations then take the first seats still
/// free, in table order.
pub fn partition_seats(
    venue: &Venue,
    window: &Span,
    seat_count: u32,
    reservations: &[Reservation],
    blocks: &[SeatBlock],
) -> WindowAvailability {
    let capacity = venue.capacity();
    if seat_count > capacity {
        return WindowAvailability::CapacityExceeded {
            requested: seat_count,
            capacity,
            message: format!(
                "Requested {seat_count} seats but this venue only has {capacity} reservable seats"
            ),
        };
    }

    let live: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.is_active() && r.span.overlaps(window))
        .collect();
    let blocks: Vec<&SeatBlock> = blocks.iter().filter(|b| b.span.overlaps(window)).collect();
    let venue_closed = blocks.iter().any(|b| b.is_venue_wide());

    let mut available = Vec::new();
    let mut unavailable = BTreeMap::new();

    for table in venue.tables.iter().filter(|t| t.is_active) {
        let views = seat_views(table);
        let whole_table = venue_closed
            || (table.booking_mode == BookingMode::Group
                && live.iter().any(|r| r.target.table_id() == Some(table.id)));

        let mut taken: Vec<bool> = views
            .iter()
            .map(|v| {
                whole_table
                    || match v.key {
                        SeatKey::Seat(id) => {
                            live.iter().any(|r| r.target.seat_id() == Some(id))
                                || blocks.iter().any(|b| b.seat_id == Some(id))
                        }
                        SeatKey::Synthetic { .. } => false,
                    }
            })
            .collect();

        let mut pooled: u32 = live
            .iter()
            .filter(|r| matches!(r.target, Target::Table { table_id } if table_id == table.id))
            .map(|r| r.seat_count)
            .sum();
        for slot in taken.iter_mut() {
            if pooled == 0 {
                break;
            }
            if !*slot {
                *slot = true;
                pooled -= 1;
            }
        }

        for (view, is_taken) in views.into_iter().zip(taken) {
            if is_taken {
                unavailable.insert(view.key, view.table_id);
            } else {
                available.push(view);
            }
        }
    }

    let pool: u32 = live
        .iter()
        .filter(|r| r.target == Target::Pool)
        .map(|r| r.seat_count)
        .sum();
    let pinned = (pool as usize).min(available.len());
    unavailable.extend(available.drain(..pinned).map(|v| (v.key, v.table_id)));

    WindowAvailability::Seats {
        available,
        unavailable,
    }
}

/// Remaining seats per slot: `max(0, capacity - booked)`.
pub fn day_slots(capacity: u32, slots: &[Span], reservations: &[Reservation]) -> DaySlots {
    let slots = slots
        .iter()
        .map(|span| {
            let available_seats = capacity.saturating_sub(booked_seats(reservations, span));
            SlotAvailability {
                span: *span,
                available_seats,
                is_fully_booked: available_seats == 0,
            }
        })
        .collect();
    DaySlots { capacity, slots }
}
