use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, info};
use ulid::Ulid;

use crate::hours::window_within_hours;
use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationKind};
use crate::observability;

use super::conflict::check_conflicts;
use super::guard::{check_target, ensure_bookable};
use super::{validate_window, Engine, EngineError};

/// A create request as it arrives from a client. Everything is optional so
/// that missing fields surface as validation errors rather than parse
/// failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Client-chosen ids, one per row created. Generated when empty.
    pub ids: Vec<Ulid>,
    pub venue_id: Option<Ulid>,
    pub seat_ids: Vec<Ulid>,
    pub table_id: Option<Ulid>,
    pub seat_count: Option<u32>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescheduleRequest {
    pub start: Ms,
    pub end: Ms,
    /// Move a seat reservation to another seat of the same venue.
    pub seat_id: Option<Ulid>,
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::validation("MISSING_FIELD", format!("{field} is required")))
}

/// Authenticated account behind a request.
fn booker(actor: Option<&Actor>) -> Result<&Account, EngineError> {
    match actor {
        None => Err(EngineError::Unauthenticated),
        Some(Actor::System) => Err(EngineError::Forbidden(
            "the operator login cannot hold reservations",
        )),
        Some(Actor::Account(a)) if !a.is_active() => Err(EngineError::Unauthenticated),
        Some(Actor::Account(a)) => Ok(a),
    }
}

fn can_manage(actor: &Actor, venue: &Venue) -> bool {
    actor.is_admin() || actor.is(venue.owner_id)
}

/// Resolve a seat for booking: it must exist and sit on an individual table.
fn seat_target(venue: &Venue, seat_id: Ulid, table_hint: Option<Ulid>) -> Result<Target, EngineError> {
    let (table, _) = venue
        .seat(seat_id)
        .ok_or(EngineError::not_found("seat", seat_id))?;
    if table_hint.is_some_and(|t| t != table.id) {
        return Err(EngineError::validation(
            "SEAT_TABLE_MISMATCH",
            format!("seat {seat_id} does not belong to table {}", table.id),
        ));
    }
    if table.booking_mode == BookingMode::Group {
        return Err(EngineError::validation(
            "GROUP_TABLE",
            "seats of a group table are booked with the whole table",
        ));
    }
    Ok(Target::Seat { table_id: table.id, seat_id })
}

/// Price of holding `target` for `span`: hourly rate prorated by the
/// millisecond.
pub fn quote(venue: &Venue, target: &Target, seat_count: u32, span: &Span) -> Cents {
    let hourly: Cents = match *target {
        Target::Seat { seat_id, .. } => venue.seat(seat_id).map_or(0, |(_, s)| s.price_per_hour),
        Target::Table { table_id } => match venue.table(table_id) {
            None => 0,
            Some(table) => match (table.booking_mode, table.effective_seats()) {
                (BookingMode::Group, seats) => table.table_price_per_hour.unwrap_or(match seats {
                    EffectiveSeats::Explicit(s) => s.iter().map(|s| s.price_per_hour).sum(),
                    EffectiveSeats::Synthetic(_) => 0,
                }),
                (BookingMode::Individual, EffectiveSeats::Explicit(s)) => s
                    .iter()
                    .take(seat_count as usize)
                    .map(|s| s.price_per_hour)
                    .sum(),
                (BookingMode::Individual, EffectiveSeats::Synthetic(_)) => {
                    table.table_price_per_hour.unwrap_or(0) * Cents::from(seat_count)
                }
            },
        },
        Target::Pool => 0,
    };
    hourly * span.duration_ms() / HOUR_MS
}

impl Engine {
    /// Book one or more seats, a table, or pooled venue capacity.
    ///
    /// Several seat ids are booked together or not at all.
    pub async fn create_reservation(
        &self,
        actor: Option<&Actor>,
        request: ReservationRequest,
        now: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let account = booker(actor)?;

        let venue_id = require(request.venue_id, "venue_id")?;
        if request.seat_ids.is_empty() && request.table_id.is_none() && request.seat_count.is_none() {
            return Err(EngineError::validation(
                "MISSING_FIELD",
                "one of seat_ids, table_id or seat_count is required",
            ));
        }
        let window = validate_window(require(request.start, "start")?, require(request.end, "end")?)?;
        if window.duration_ms() > MAX_RESERVATION_MS {
            return Err(EngineError::LimitExceeded("reservation too long"));
        }
        if window.start < now {
            return Err(EngineError::PastTime);
        }

        let found = self.store.find_venue(venue_id).await?;
        let venue = ensure_bookable(found.as_ref())?;

        let targets = self.resolve_targets(venue, &request)?;
        for (target, _) in &targets {
            check_target(venue, target)?;
        }

        if let Some(hours) = venue.hours.as_ref()
            && !window_within_hours(hours, &window) {
                return Err(EngineError::validation(
                    "OUTSIDE_HOURS",
                    "the requested time is outside the venue's opening hours",
                ));
            }

        let ids: Vec<Ulid> = if request.ids.is_empty() {
            targets.iter().map(|_| Ulid::new()).collect()
        } else if request.ids.len() == targets.len() {
            request.ids.clone()
        } else {
            return Err(EngineError::validation(
                "ID_COUNT_MISMATCH",
                format!("{} ids supplied for {} reservations", request.ids.len(), targets.len()),
            ));
        };

        let rows: Vec<Reservation> = targets
            .iter()
            .zip(ids)
            .map(|((target, seat_count), id)| Reservation {
                id,
                venue_id,
                account_id: account.id,
                target: *target,
                seat_count: *seat_count,
                span: window,
                status: ReservationStatus::Active,
                total_cents: quote(venue, target, *seat_count, &window),
                created_at: now,
            })
            .collect();

        // Early answer for the common case; the store decides for real.
        let blocks = self
            .store
            .seat_blocks_overlapping(venue_id, None, window)
            .await?;
        let mut existing = self
            .store
            .reservations_overlapping(venue_id, ResourceSelector::Venue, window, None)
            .await?;
        for row in &rows {
            if let Err(with) =
                check_conflicts(venue, &row.target, &window, row.seat_count, &existing, &blocks, None)
            {
                debug!("reservation for {venue_id} rejected: {with}");
                return Err(EngineError::Conflict(with));
            }
            existing.push(row.clone());
        }

        self.store.insert_reservations(rows.clone()).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(rows.len() as u64);
        info!(
            "reservation {} created: {} row(s) at venue {venue_id} for {}",
            rows[0].id,
            rows.len(),
            account.id
        );

        self.notify_created(venue, account, &rows);
        Ok(rows)
    }

    /// Targets and authoritative seat counts for a create request.
    fn resolve_targets(
        &self,
        venue: &Venue,
        request: &ReservationRequest,
    ) -> Result<Vec<(Target, u32)>, EngineError> {
        if !request.seat_ids.is_empty() {
            if request.seat_ids.len() > MAX_SEATS_PER_REQUEST {
                return Err(EngineError::LimitExceeded("too many seats in one request"));
            }
            let mut seen = HashSet::new();
            return request
                .seat_ids
                .iter()
                .map(|&seat_id| {
                    if !seen.insert(seat_id) {
                        return Err(EngineError::validation(
                            "DUPLICATE_SEAT",
                            format!("seat {seat_id} listed twice"),
                        ));
                    }
                    Ok((seat_target(venue, seat_id, request.table_id)?, 1))
                })
                .collect();
        }

        let requested = request.seat_count.unwrap_or(1);
        if requested == 0 || requested > MAX_SEAT_COUNT {
            return Err(EngineError::validation(
                "INVALID_SEAT_COUNT",
                format!("seat_count must be between 1 and {MAX_SEAT_COUNT}"),
            ));
        }

        let Some(table_id) = request.table_id else {
            let capacity = venue.capacity();
            if requested > capacity {
                return Err(EngineError::CapacityExceeded {
                    requested,
                    available: capacity,
                });
            }
            return Ok(vec![(Target::Pool, requested)]);
        };

        let table = venue
            .table(table_id)
            .ok_or(EngineError::not_found("table", table_id))?;
        let capacity = table.capacity();
        let seat_count = match table.booking_mode {
            // The whole table, whatever the client asked for.
            BookingMode::Group => capacity,
            BookingMode::Individual => requested,
        };
        if seat_count == 0 || seat_count > capacity {
            return Err(EngineError::CapacityExceeded {
                requested: seat_count.max(requested),
                available: capacity,
            });
        }
        Ok(vec![(Target::Table { table_id }, seat_count)])
    }

    fn notify_created(&self, venue: &Venue, account: &Account, rows: &[Reservation]) {
        let Some(first) = rows.first() else { return };
        let payload = json!({
            "reservation_ids": rows.iter().map(|r| r.id.to_string()).collect::<Vec<_>>(),
            "venue_id": venue.id.to_string(),
            "venue_name": venue.name,
            "start": first.span.start,
            "end": first.span.end,
            "seat_count": rows.iter().map(|r| r.seat_count).sum::<u32>(),
            "total_cents": rows.iter().map(|r| r.total_cents).sum::<Cents>(),
        });
        self.notify.enqueue(Notification::new(
            NotificationKind::ReservationConfirmed,
            first.id,
            account.email.clone(),
            payload.clone(),
        ));
        if let Some(owner) = venue.owner.as_ref().filter(|o| o.is_active()) {
            self.notify.enqueue(Notification::new(
                NotificationKind::ReservationReceived,
                first.id,
                owner.email.clone(),
                payload,
            ));
        }
    }

    /// Cancel as the booker, the venue owner or an admin. Cancelling twice
    /// returns the cancelled row again.
    pub async fn cancel_reservation(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let actor = actor.ok_or(EngineError::Unauthenticated)?;
        let ReservationWithContext { reservation, venue } = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::not_found("reservation", id))?;
        if !actor.is(reservation.account_id) && !can_manage(actor, &venue) {
            return Err(EngineError::Forbidden(
                "only the booker or the venue owner can cancel",
            ));
        }
        if !reservation.is_active() {
            return Ok(reservation);
        }

        let cancelled = self
            .store
            .update_reservation_status(id, ReservationStatus::Cancelled)
            .await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!("reservation {id} cancelled");

        if let Some(guest) = self.store.find_account(cancelled.account_id).await? {
            self.notify.enqueue(Notification::new(
                NotificationKind::ReservationCancelled,
                id,
                guest.email,
                json!({
                    "reservation_id": id.to_string(),
                    "venue_id": venue.id.to_string(),
                    "venue_name": venue.name,
                    "start": cancelled.span.start,
                    "end": cancelled.span.end,
                }),
            ));
        }
        Ok(cancelled)
    }

    /// Move a reservation to a new window (and optionally a new seat). Only
    /// the venue owner or an admin may do this; guests cancel instead.
    pub async fn reschedule_reservation(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        change: RescheduleRequest,
    ) -> Result<Reservation, EngineError> {
        let actor = actor.ok_or(EngineError::Unauthenticated)?;
        let ReservationWithContext { reservation, venue } = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::not_found("reservation", id))?;
        if !can_manage(actor, &venue) {
            return Err(EngineError::Forbidden(
                "only the venue owner can change a reservation",
            ));
        }
        if !reservation.is_active() {
            return Err(EngineError::validation(
                "RESERVATION_CANCELLED",
                "a cancelled reservation cannot be changed",
            ));
        }

        let window = validate_window(change.start, change.end)?;
        if window.duration_ms() > MAX_RESERVATION_MS {
            return Err(EngineError::LimitExceeded("reservation too long"));
        }

        let target = match (change.seat_id, reservation.target) {
            (None, current) => current,
            (Some(seat_id), Target::Seat { .. }) => seat_target(&venue, seat_id, None)?,
            (Some(_), _) => {
                return Err(EngineError::validation(
                    "NOT_A_SEAT_RESERVATION",
                    "only seat reservations can move to another seat",
                ));
            }
        };
        check_target(&venue, &target)?;

        if let Some(hours) = venue.hours.as_ref()
            && !window_within_hours(hours, &window) {
                return Err(EngineError::validation(
                    "OUTSIDE_HOURS",
                    "the requested time is outside the venue's opening hours",
                ));
            }

        let existing = self
            .store
            .reservations_overlapping(venue.id, ResourceSelector::Venue, window, Some(id))
            .await?;
        let blocks = self
            .store
            .seat_blocks_overlapping(venue.id, None, window)
            .await?;
        check_conflicts(
            &venue,
            &target,
            &window,
            reservation.seat_count,
            &existing,
            &blocks,
            Some(id),
        )
        .map_err(EngineError::Conflict)?;

        let updated = self
            .store
            .update_reservation_window(
                id,
                WindowChange {
                    span: window,
                    target,
                    total_cents: quote(&venue, &target, reservation.seat_count, &window),
                },
            )
            .await?;
        metrics::counter!(observability::RESERVATIONS_RESCHEDULED_TOTAL).increment(1);
        info!("reservation {id} moved to [{}, {})", window.start, window.end);

        if let Some(guest) = self.store.find_account(updated.account_id).await? {
            self.notify.enqueue(Notification::new(
                NotificationKind::ReservationRescheduled,
                format!("{id}:{}", window.start),
                guest.email,
                json!({
                    "reservation_id": id.to_string(),
                    "venue_id": venue.id.to_string(),
                    "start": window.start,
                    "end": window.end,
                    "seat_id": target.seat_id().map(|s| s.to_string()),
                }),
            ));
        }
        Ok(updated)
    }
}
