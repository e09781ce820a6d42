use std::path::PathBuf;

use super::*;
use crate::hours::{OpenState, VenueHours, WeeklyHoursRow};
use crate::notify::NotificationKind;

const H: Ms = HOUR_MS;
const M: Ms = MINUTE_MS;
/// Monday 2025-02-03 00:00 UTC.
const MONDAY: Ms = 1_738_540_800_000;
const NOW: Ms = MONDAY + 8 * H;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("venuebook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn account(email: &str, role: Role) -> Account {
    Account {
        id: Ulid::new(),
        email: email.into(),
        role,
        status: AccountStatus::Active,
    }
}

/// One venue: an individual table with two priced seats and a legacy group
/// table of four seats with no seat rows. Capacity 6.
struct World {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    owner: Account,
    guest: Account,
    admin: Account,
    venue_id: Ulid,
    table_id: Ulid,
    seats: Vec<Ulid>,
    group_id: Ulid,
}

impl World {
    fn owner(&self) -> Actor {
        Actor::Account(self.owner.clone())
    }

    fn guest(&self) -> Actor {
        Actor::Account(self.guest.clone())
    }

    fn seat_request(&self, seat_ids: Vec<Ulid>, start: Ms, end: Ms) -> ReservationRequest {
        ReservationRequest {
            venue_id: Some(self.venue_id),
            seat_ids,
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }
}

async fn world_with(store: Arc<MemoryStore>) -> World {
    let owner = account("owner@example.com", Role::Member);
    let guest = account("guest@example.com", Role::Member);
    let admin = account("admin@example.com", Role::Admin);
    for a in [&owner, &guest, &admin] {
        store.upsert_account(a.clone()).await.unwrap();
    }

    let venue_id = Ulid::new();
    store
        .upsert_venue(VenueRecord {
            id: venue_id,
            name: Some("Corner Cafe".into()),
            owner_id: owner.id,
            status: VenueStatus::Active,
            pause_message: None,
            deleted_at: None,
            hours: None,
        })
        .await
        .unwrap();

    let table_id = Ulid::new();
    store
        .upsert_table(Table {
            id: table_id,
            venue_id,
            name: Some("Bar".into()),
            seat_count: 2,
            booking_mode: BookingMode::Individual,
            table_price_per_hour: None,
            is_active: true,
            seats: vec![],
        })
        .await
        .unwrap();
    let mut seats = Vec::new();
    for label in ["B1", "B2"] {
        let id = Ulid::new();
        store
            .upsert_seat(Seat {
                id,
                table_id,
                label: Some(label.into()),
                price_per_hour: 1_000,
                is_active: true,
            })
            .await
            .unwrap();
        seats.push(id);
    }

    let group_id = Ulid::new();
    store
        .upsert_table(Table {
            id: group_id,
            venue_id,
            name: Some("Family".into()),
            seat_count: 4,
            booking_mode: BookingMode::Group,
            table_price_per_hour: Some(6_000),
            is_active: true,
            seats: vec![],
        })
        .await
        .unwrap();

    let engine = Arc::new(Engine::new(store.clone(), Arc::new(crate::notify::NotificationQueue::new())));
    World {
        engine,
        store,
        owner,
        guest,
        admin,
        venue_id,
        table_id,
        seats,
        group_id,
    }
}

async fn world() -> World {
    world_with(Arc::new(MemoryStore::ephemeral())).await
}

/// Mondays 09:00–17:00 UTC.
async fn with_weekday_hours(w: &World) {
    w.store
        .set_hours(
            w.venue_id,
            VenueHours::new("UTC", vec![WeeklyHoursRow::open(1, "09:00", "17:00").unwrap()]).unwrap(),
        )
        .await
        .unwrap();
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_seat_reservation() {
    let w = world().await;
    let mut rx = w.engine.notify.subscribe();
    let rows = w
        .engine
        .create_reservation(Some(&w.guest()), w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H), NOW)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r.status, ReservationStatus::Active);
    assert_eq!(r.account_id, w.guest.id);
    assert_eq!(r.seat_count, 1);
    assert_eq!(r.total_cents, 1_000);
    assert_eq!(r.target, Target::Seat { table_id: w.table_id, seat_id: w.seats[0] });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, NotificationKind::ReservationConfirmed);
    assert_eq!(first.to_email, "guest@example.com");
    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, NotificationKind::ReservationReceived);
    assert_eq!(second.to_email, "owner@example.com");
}

#[tokio::test]
async fn create_requires_an_account() {
    let w = world().await;
    let req = w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H);
    let err = w.engine.create_reservation(None, req.clone(), NOW).await.unwrap_err();
    assert_eq!(err.status(), 401);
    let err = w
        .engine
        .create_reservation(Some(&Actor::System), req, NOW)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 403);
}

#[tokio::test]
async fn create_validates_fields() {
    let w = world().await;
    let guest = w.guest();

    let no_venue = ReservationRequest {
        venue_id: None,
        ..w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H)
    };
    let err = w.engine.create_reservation(Some(&guest), no_venue, NOW).await.unwrap_err();
    assert_eq!(err.code(), "MISSING_FIELD");

    let no_target = w.seat_request(vec![], NOW + H, NOW + 2 * H);
    let err = w.engine.create_reservation(Some(&guest), no_target, NOW).await.unwrap_err();
    assert_eq!(err.code(), "MISSING_FIELD");

    let inverted = w.seat_request(vec![w.seats[0]], NOW + 2 * H, NOW + H);
    let err = w.engine.create_reservation(Some(&guest), inverted, NOW).await.unwrap_err();
    assert_eq!((err.status(), err.code()), (400, "INVALID_WINDOW"));

    let dup = w.seat_request(vec![w.seats[0], w.seats[0]], NOW + H, NOW + 2 * H);
    let err = w.engine.create_reservation(Some(&guest), dup, NOW).await.unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_SEAT");

    let unknown = w.seat_request(vec![Ulid::new()], NOW + H, NOW + 2 * H);
    let err = w.engine.create_reservation(Some(&guest), unknown, NOW).await.unwrap_err();
    assert_eq!(err.status(), 404);
}

#[tokio::test]
async fn past_start_is_rejected_but_now_is_fine() {
    let w = world().await;
    let err = w
        .engine
        .create_reservation(Some(&w.guest()), w.seat_request(vec![w.seats[0]], NOW - 1, NOW + H), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PastTime));
    assert_eq!((err.status(), err.code()), (400, "PAST_TIME"));

    w.engine
        .create_reservation(Some(&w.guest()), w.seat_request(vec![w.seats[0]], NOW, NOW + H), NOW)
        .await
        .unwrap();
}

#[tokio::test]
async fn guard_blocks_paused_and_orphaned_venues() {
    let w = world().await;
    let req = w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H);

    w.store
        .set_venue_status(w.venue_id, VenueStatus::Paused, Some("Back in March".into()), NOW)
        .await
        .unwrap();
    match w.engine.create_reservation(Some(&w.guest()), req.clone(), NOW).await {
        Err(EngineError::BookingNotAllowed { block, public_message }) => {
            assert_eq!(block, BookingBlock::VenuePaused);
            assert_eq!(public_message.as_deref(), Some("Back in March"));
        }
        other => panic!("expected VENUE_PAUSED, got {other:?}"),
    }

    w.store
        .set_venue_status(w.venue_id, VenueStatus::Active, None, NOW)
        .await
        .unwrap();
    w.store
        .upsert_account(Account {
            status: AccountStatus::Deleted,
            ..w.owner.clone()
        })
        .await
        .unwrap();
    let err = w.engine.create_reservation(Some(&w.guest()), req.clone(), NOW).await.unwrap_err();
    assert_eq!(err.code(), "OWNER_DELETED");

    let elsewhere = ReservationRequest { venue_id: Some(Ulid::new()), ..req };
    let err = w.engine.create_reservation(Some(&w.guest()), elsewhere, NOW).await.unwrap_err();
    assert_eq!(err.code(), "VENUE_NOT_FOUND");
}

#[tokio::test]
async fn overlapping_seat_booking_conflicts() {
    let w = world().await;
    let guest = w.guest();
    w.engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H), NOW)
        .await
        .unwrap();

    let err = w
        .engine
        .create_reservation(
            Some(&guest),
            w.seat_request(vec![w.seats[0]], NOW + H + 30 * M, NOW + 3 * H),
            NOW,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);

    // Back-to-back and other seats are fine.
    w.engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[0]], NOW + 2 * H, NOW + 3 * H), NOW)
        .await
        .unwrap();
    w.engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[1]], NOW + H, NOW + 2 * H), NOW)
        .await
        .unwrap();
}

#[tokio::test]
async fn multi_seat_is_all_or_nothing() {
    let w = world().await;
    let guest = w.guest();
    w.engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[0]], NOW + H, NOW + 2 * H), NOW)
        .await
        .unwrap();

    let err = w
        .engine
        .create_reservation(
            Some(&guest),
            w.seat_request(vec![w.seats[1], w.seats[0]], NOW + H, NOW + 2 * H),
            NOW,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);

    // Seat 2 was not taken by the failed batch.
    let rows = w
        .engine
        .create_reservation(
            Some(&guest),
            w.seat_request(vec![w.seats[1]], NOW + H, NOW + 2 * H),
            NOW,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn both_seats_in_one_request() {
    let w = world().await;
    let rows = w
        .engine
        .create_reservation(
            Some(&w.guest()),
            w.seat_request(w.seats.clone(), NOW + H, NOW + 3 * H),
            NOW,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.total_cents == 2_000));
}

#[tokio::test]
async fn group_table_seat_count_is_authoritative() {
    let w = world().await;
    let req = ReservationRequest {
        venue_id: Some(w.venue_id),
        table_id: Some(w.group_id),
        seat_count: Some(1),
        start: Some(NOW + H),
        end: Some(NOW + 2 * H),
        ..Default::default()
    };
    let rows = w
        .engine
        .create_reservation(Some(&w.guest()), req.clone(), NOW)
        .await
        .unwrap();
    assert_eq!(rows[0].seat_count, 4);
    assert_eq!(rows[0].total_cents, 6_000);
    assert_eq!(rows[0].target, Target::Table { table_id: w.group_id });

    let err = w
        .engine
        .create_reservation(Some(&w.guest()), req, NOW)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);
}

#[tokio::test]
async fn pooled_request_over_capacity_is_a_hard_error() {
    let w = world().await;
    let req = ReservationRequest {
        venue_id: Some(w.venue_id),
        seat_count: Some(7),
        start: Some(NOW + H),
        end: Some(NOW + 2 * H),
        ..Default::default()
    };
    match w.engine.create_reservation(Some(&w.guest()), req, NOW).await {
        Err(EngineError::CapacityExceeded { requested, available }) => {
            assert_eq!((requested, available), (7, 6));
        }
        other => panic!("expected CAPACITY_EXCEEDED, got {other:?}"),
    }
}

#[tokio::test]
async fn pooled_capacity_fills_up() {
    let w = world().await;
    let pooled = |n| ReservationRequest {
        venue_id: Some(w.venue_id),
        seat_count: Some(n),
        start: Some(NOW + H),
        end: Some(NOW + 2 * H),
        ..Default::default()
    };
    let guest = w.guest();
    w.engine.create_reservation(Some(&guest), pooled(4), NOW).await.unwrap();
    w.engine.create_reservation(Some(&guest), pooled(2), NOW).await.unwrap();
    let err = w.engine.create_reservation(Some(&guest), pooled(1), NOW).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictWith::Capacity { .. })));
}

#[tokio::test]
async fn full_pool_leaves_no_seat_or_table() {
    let w = world().await;
    let (start, end) = (NOW + H, NOW + 2 * H);
    let pooled = ReservationRequest {
        venue_id: Some(w.venue_id),
        seat_count: Some(6),
        start: Some(start),
        end: Some(end),
        ..Default::default()
    };
    let guest = w.guest();
    w.engine.create_reservation(Some(&guest), pooled, NOW).await.unwrap();

    let err = w
        .engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[0]], start, end), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictWith::Capacity { booked: 6, .. })));

    let group = ReservationRequest {
        venue_id: Some(w.venue_id),
        table_id: Some(w.group_id),
        start: Some(start),
        end: Some(end),
        ..Default::default()
    };
    let err = w.engine.create_reservation(Some(&guest), group, NOW).await.unwrap_err();
    assert_eq!(err.status(), 409);

    let result = w.engine.seat_availability(w.venue_id, start, end, 1).await.unwrap();
    let WindowAvailability::Seats { available, unavailable } = result else {
        panic!("expected seats");
    };
    assert!(available.is_empty());
    assert_eq!(unavailable.len(), 6);
}

#[tokio::test]
async fn seats_and_tables_shrink_the_pool() {
    let w = world().await;
    let (start, end) = (NOW + H, NOW + 2 * H);
    let guest = w.guest();
    booked(&w, 0, start, end).await;
    let group = ReservationRequest {
        venue_id: Some(w.venue_id),
        table_id: Some(w.group_id),
        start: Some(start),
        end: Some(end),
        ..Default::default()
    };
    w.engine.create_reservation(Some(&guest), group, NOW).await.unwrap();

    let pooled = |n| ReservationRequest {
        venue_id: Some(w.venue_id),
        seat_count: Some(n),
        start: Some(start),
        end: Some(end),
        ..Default::default()
    };
    let err = w.engine.create_reservation(Some(&guest), pooled(2), NOW).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictWith::Capacity { booked: 5, requested: 2, capacity: 6 })
    ));
    w.engine.create_reservation(Some(&guest), pooled(1), NOW).await.unwrap();

    // The last free seat went to the pool.
    let err = w
        .engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[1]], start, end), NOW)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);
}

#[tokio::test]
async fn outside_hours_is_rejected() {
    let w = world().await;
    with_weekday_hours(&w).await;
    let guest = w.guest();
    // 08:00–09:30 starts before opening.
    let err = w
        .engine
        .create_reservation(Some(&guest), w.seat_request(vec![w.seats[0]], NOW, NOW + 90 * M), NOW)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OUTSIDE_HOURS");
    w.engine
        .create_reservation(
            Some(&guest),
            w.seat_request(vec![w.seats[0]], MONDAY + 16 * H, MONDAY + 17 * H),
            NOW,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn venue_wide_block_conflicts_and_hides_seats() {
    let w = world().await;
    w.store
        .add_seat_block(SeatBlock {
            id: Ulid::new(),
            venue_id: w.venue_id,
            seat_id: None,
            span: Span::new(NOW + 60 * M, NOW + 120 * M),
            reason: Some("private event".into()),
        })
        .await
        .unwrap();

    let err = w
        .engine
        .create_reservation(
            Some(&w.guest()),
            w.seat_request(vec![w.seats[1]], NOW + 90 * M, NOW + 150 * M),
            NOW,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictWith::Block(_))));

    let result = w
        .engine
        .seat_availability(w.venue_id, NOW + 60 * M, NOW + 120 * M, 1)
        .await
        .unwrap();
    match result {
        WindowAvailability::Seats { available, unavailable } => {
            assert!(available.is_empty());
            assert_eq!(unavailable.len(), 6);
        }
        other => panic!("expected seats, got {other:?}"),
    }
}

/// Exactly one of many racing creates on one seat wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_have_one_winner() {
    let w = world().await;
    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = w.engine.clone();
        let guest = w.guest();
        let req = w.seat_request(vec![w.seats[0]], NOW + H + i * M, NOW + 2 * H + i * M);
        handles.push(tokio::spawn(async move {
            engine.create_reservation(Some(&guest), req, NOW).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) if e.status() == 409 => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((wins, conflicts), (1, 9));
}

// ── Cancel & reschedule ──────────────────────────────────

async fn booked(w: &World, seat: usize, start: Ms, end: Ms) -> Reservation {
    w.engine
        .create_reservation(Some(&w.guest()), w.seat_request(vec![w.seats[seat]], start, end), NOW)
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn booker_cancels_idempotently() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    let mut rx = w.engine.notify.subscribe();

    let once = w.engine.cancel_reservation(Some(&w.guest()), r.id).await.unwrap();
    assert_eq!(once.status, ReservationStatus::Cancelled);
    let twice = w.engine.cancel_reservation(Some(&w.guest()), r.id).await.unwrap();
    assert_eq!(twice.status, ReservationStatus::Cancelled);

    let n = rx.recv().await.unwrap();
    assert_eq!(n.kind, NotificationKind::ReservationCancelled);
    assert!(rx.try_recv().is_err());

    // The seat is free again.
    booked(&w, 0, NOW + H, NOW + 2 * H).await;
}

#[tokio::test]
async fn cancel_authorization() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;

    let err = w.engine.cancel_reservation(None, r.id).await.unwrap_err();
    assert_eq!(err.status(), 401);
    let stranger = Actor::Account(account("stranger@example.com", Role::Member));
    let err = w.engine.cancel_reservation(Some(&stranger), r.id).await.unwrap_err();
    assert_eq!(err.status(), 403);
    let err = w.engine.cancel_reservation(Some(&w.owner()), Ulid::new()).await.unwrap_err();
    assert_eq!(err.status(), 404);

    w.engine.cancel_reservation(Some(&w.owner()), r.id).await.unwrap();
    let other = booked(&w, 1, NOW + H, NOW + 2 * H).await;
    w.engine
        .cancel_reservation(Some(&Actor::Account(w.admin.clone())), other.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn only_the_venue_side_reschedules() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    let change = RescheduleRequest { start: NOW + 3 * H, end: NOW + 4 * H, seat_id: None };

    let err = w
        .engine
        .reschedule_reservation(Some(&w.guest()), r.id, change)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 403);

    let moved = w
        .engine
        .reschedule_reservation(Some(&w.owner()), r.id, change)
        .await
        .unwrap();
    assert_eq!(moved.span, Span::new(NOW + 3 * H, NOW + 4 * H));
    assert_eq!(moved.status, ReservationStatus::Active);
}

#[tokio::test]
async fn reschedule_overlapping_itself_is_not_a_conflict() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    let moved = w
        .engine
        .reschedule_reservation(
            Some(&w.owner()),
            r.id,
            RescheduleRequest { start: NOW + H + 30 * M, end: NOW + 2 * H + 30 * M, seat_id: None },
        )
        .await
        .unwrap();
    assert_eq!(moved.span.start, NOW + H + 30 * M);
}

#[tokio::test]
async fn reschedule_into_someone_else_conflicts() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    booked(&w, 0, NOW + 3 * H, NOW + 4 * H).await;
    let err = w
        .engine
        .reschedule_reservation(
            Some(&w.owner()),
            r.id,
            RescheduleRequest { start: NOW + 2 * H, end: NOW + 3 * H + 1, seat_id: None },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);
}

#[tokio::test]
async fn reschedule_to_another_seat() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    let moved = w
        .engine
        .reschedule_reservation(
            Some(&w.owner()),
            r.id,
            RescheduleRequest { start: NOW + H, end: NOW + 2 * H, seat_id: Some(w.seats[1]) },
        )
        .await
        .unwrap();
    assert_eq!(moved.target.seat_id(), Some(w.seats[1]));
    // The original seat is free for the same window now.
    booked(&w, 0, NOW + H, NOW + 2 * H).await;
}

#[tokio::test]
async fn cancelled_reservations_stay_cancelled() {
    let w = world().await;
    let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
    w.engine.cancel_reservation(Some(&w.guest()), r.id).await.unwrap();
    let err = w
        .engine
        .reschedule_reservation(
            Some(&w.owner()),
            r.id,
            RescheduleRequest { start: NOW + 3 * H, end: NOW + 4 * H, seat_id: None },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RESERVATION_CANCELLED");
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn seat_query_reports_reserved_seat() {
    let w = world().await;
    booked(&w, 0, NOW + 60 * M, NOW + 120 * M).await;
    let result = w
        .engine
        .seat_availability(w.venue_id, NOW + 60 * M, NOW + 120 * M, 1)
        .await
        .unwrap();
    let WindowAvailability::Seats { available, unavailable } = result else {
        panic!("expected seats");
    };
    assert_eq!(unavailable.get(&SeatKey::Seat(w.seats[0])), Some(&w.table_id));
    assert!(available.iter().any(|s| s.key == SeatKey::Seat(w.seats[1])));
    // Group table seats are synthetic and free.
    assert_eq!(available.len(), 5);
}

#[tokio::test]
async fn seat_query_soft_capacity_error() {
    let w = world().await;
    let result = w
        .engine
        .seat_availability(w.venue_id, NOW + H, NOW + 2 * H, 10)
        .await
        .unwrap();
    assert!(matches!(
        result,
        WindowAvailability::CapacityExceeded { requested: 10, capacity: 6, .. }
    ));
    let err = w
        .engine
        .seat_availability(Ulid::new(), NOW + H, NOW + 2 * H, 1)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 404);
    let err = w
        .engine
        .seat_availability(w.venue_id, NOW + H, NOW + H, 1)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn day_slots_subtract_booked_seats() {
    let w = world().await;
    with_weekday_hours(&w).await;
    let req = ReservationRequest {
        venue_id: Some(w.venue_id),
        seat_count: Some(2),
        start: Some(MONDAY + 10 * H),
        end: Some(MONDAY + 10 * H + 15 * M),
        ..Default::default()
    };
    w.engine.create_reservation(Some(&w.guest()), req, NOW).await.unwrap();

    let day = w.engine.slots_for_date(w.venue_id, "2025-02-03").await.unwrap();
    assert_eq!(day.capacity, 6);
    assert_eq!(day.slots.len(), 8);
    assert_eq!(day.slots[0].span, Span::new(MONDAY + 9 * H, MONDAY + 10 * H));
    assert_eq!(day.slots[1].available_seats, 4);
    assert!(day.slots.iter().enumerate().all(|(i, s)| i == 1 || s.available_seats == 6));

    // Tuesday has no row.
    let closed = w.engine.slots_for_date(w.venue_id, "2025-02-04").await.unwrap();
    assert!(closed.slots.is_empty());
    let err = w.engine.slots_for_date(w.venue_id, "Feb 3").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_DATE");
}

#[tokio::test]
async fn day_slots_need_capacity() {
    let w = world().await;
    let empty = Ulid::new();
    w.store
        .upsert_venue(VenueRecord {
            id: empty,
            name: None,
            owner_id: w.owner.id,
            status: VenueStatus::Active,
            pause_message: None,
            deleted_at: None,
            hours: None,
        })
        .await
        .unwrap();
    let err = w.engine.slots_for_date(empty, "2025-02-03").await.unwrap_err();
    assert_eq!((err.status(), err.code()), (400, "NO_CAPACITY"));
}

#[tokio::test]
async fn open_status_and_label() {
    let w = world().await;
    assert_eq!(w.engine.open_status(w.venue_id, NOW).await.unwrap(), None);
    assert_eq!(w.engine.venue_label(w.venue_id, NOW).await.unwrap(), "Currently Closed");

    with_weekday_hours(&w).await;
    let before = w.engine.open_status(w.venue_id, NOW).await.unwrap().unwrap();
    assert_eq!(before.status, OpenState::OpensLater);
    assert_eq!(w.engine.venue_label(w.venue_id, NOW).await.unwrap(), "Opens at 9:00 AM");

    let noon = MONDAY + 12 * H;
    assert_eq!(w.engine.venue_label(w.venue_id, noon).await.unwrap(), "Available now");
}

#[tokio::test]
async fn bookability_mirrors_guard() {
    let w = world().await;
    let b = w.engine.venue_bookability(w.venue_id).await.unwrap();
    assert!(b.can_book);
    w.engine.can_book_venue(w.venue_id).await.unwrap();

    w.store
        .set_venue_status(w.venue_id, VenueStatus::Deleted, None, NOW)
        .await
        .unwrap();
    let b = w.engine.venue_bookability(w.venue_id).await.unwrap();
    assert_eq!(b.status, BookabilityStatus::Deleted);
    assert_eq!(
        w.engine.can_book_venue(w.venue_id).await.unwrap_err().code(),
        "VENUE_DELETED"
    );
}

#[tokio::test]
async fn deleted_venue_is_hidden_from_queries() {
    let w = world().await;
    with_weekday_hours(&w).await;
    w.store
        .set_venue_status(w.venue_id, VenueStatus::Deleted, None, NOW)
        .await
        .unwrap();

    let noon = MONDAY + 12 * H;
    let err = w
        .engine
        .seat_availability(w.venue_id, noon, noon + H, 1)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 404);
    let err = w.engine.slots_for_date(w.venue_id, "2025-02-03").await.unwrap_err();
    assert_eq!(err.status(), 404);
    let err = w.engine.open_status(w.venue_id, noon).await.unwrap_err();
    assert_eq!(err.status(), 404);
    let err = w.engine.venue_label(w.venue_id, noon).await.unwrap_err();
    assert_eq!(err.status(), 404);
}

#[test]
fn bookability_of_unknown_venue() {
    let engine = Engine::new(
        Arc::new(MemoryStore::ephemeral()),
        Arc::new(crate::notify::NotificationQueue::new()),
    );
    let b = tokio_test::block_on(engine.venue_bookability(Ulid::new())).unwrap();
    assert!(!b.can_book);
    assert_eq!(b.status, BookabilityStatus::NotFound);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn reservations_survive_restart() {
    let path = test_journal_path("restart.journal");
    let (venue_id, seat, guest, id) = {
        let w = world_with(Arc::new(MemoryStore::open(&path).await.unwrap())).await;
        let r = booked(&w, 0, NOW + H, NOW + 2 * H).await;
        (w.venue_id, w.seats[0], w.guest.clone(), r.id)
    };

    let store = Arc::new(MemoryStore::open(&path).await.unwrap());
    let engine = Engine::new(store.clone(), Arc::new(crate::notify::NotificationQueue::new()));
    assert!(store.find_reservation(id).await.unwrap().is_some());

    let again = ReservationRequest {
        venue_id: Some(venue_id),
        seat_ids: vec![seat],
        start: Some(NOW + H),
        end: Some(NOW + 2 * H),
        ..Default::default()
    };
    let err = engine
        .create_reservation(Some(&Actor::Account(guest)), again, NOW)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);
    let _ = std::fs::remove_file(&path);
}
