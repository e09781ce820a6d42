use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::hours::{VenueHours, WeeklyHoursRow};
use crate::journal::Journal;
use crate::model::*;
use crate::observability;

use super::conflict::check_conflicts;
use super::store::{Store, StoreError};

/// Everything that belongs to one venue. Reservations and blocks are kept
/// sorted by start so window lookups can cut off with `partition_point`.
#[derive(Debug, Clone)]
pub struct VenueState {
    pub record: VenueRecord,
    pub tables: Vec<Table>,
    pub reservations: Vec<Reservation>,
    pub blocks: Vec<SeatBlock>,
}

impl VenueState {
    fn new(record: VenueRecord) -> Self {
        Self {
            record,
            tables: Vec::new(),
            reservations: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn venue(&self, owner: Option<Account>) -> Venue {
        Venue {
            id: self.record.id,
            name: self.record.name.clone(),
            owner_id: self.record.owner_id,
            owner,
            status: self.record.status,
            pause_message: self.record.pause_message.clone(),
            deleted_at: self.record.deleted_at,
            hours: self.record.hours.clone(),
            tables: self.tables.clone(),
        }
    }

    /// Active reservations overlapping `window`.
    fn reservations_in(&self, window: &Span) -> impl Iterator<Item = &Reservation> + '_ {
        let window = *window;
        let cut = self.reservations.partition_point(|r| r.span.start < window.end);
        self.reservations[..cut]
            .iter()
            .filter(move |r| r.is_active() && r.span.end > window.start)
    }

    fn blocks_in(&self, window: &Span) -> impl Iterator<Item = &SeatBlock> + '_ {
        let window = *window;
        let cut = self.blocks.partition_point(|b| b.span.start < window.end);
        self.blocks[..cut]
            .iter()
            .filter(move |b| b.span.end > window.start)
    }

    fn insert_reservation(&mut self, r: Reservation) {
        let pos = self.reservations.partition_point(|x| x.span.start <= r.span.start);
        self.reservations.insert(pos, r);
    }

    fn take_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    fn table_mut(&mut self, table_id: Ulid) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == table_id)
    }

    fn has_seat(&self, seat_id: Ulid) -> bool {
        self.tables.iter().any(|t| t.has_seat(seat_id))
    }

    /// Events that rebuild this venue from nothing.
    fn snapshot(&self, out: &mut Vec<Event>) {
        out.push(Event::VenueUpserted(self.record.clone()));
        for table in &self.tables {
            out.push(Event::TableUpserted(Table {
                seats: Vec::new(),
                ..table.clone()
            }));
            for seat in &table.seats {
                out.push(Event::SeatUpserted {
                    venue_id: self.record.id,
                    seat: seat.clone(),
                });
            }
        }
        for block in &self.blocks {
            out.push(Event::SeatBlockAdded(block.clone()));
        }
        if !self.reservations.is_empty() {
            out.push(Event::ReservationsCreated {
                venue_id: self.record.id,
                reservations: self.reservations.clone(),
            });
        }
    }
}

pub type SharedVenueState = Arc<RwLock<VenueState>>;

/// Venue a journal event belongs to, for events applied under a venue lock.
fn event_venue_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::VenueStatusChanged { id, .. } => Some(*id),
        Event::TableUpserted(t) => Some(t.venue_id),
        Event::SeatBlockAdded(b) => Some(b.venue_id),
        Event::HoursRowSet { venue_id, .. }
        | Event::SeatUpserted { venue_id, .. }
        | Event::SeatBlockRemoved { venue_id, .. }
        | Event::ReservationsCreated { venue_id, .. }
        | Event::ReservationStatusChanged { venue_id, .. }
        | Event::ReservationRescheduled { venue_id, .. } => Some(*venue_id),
        Event::AccountUpserted(_) | Event::VenueUpserted(_) => None,
    }
}

/// In-process store: per-venue state behind async `RwLock`s, made durable
/// by the journal.
///
/// Lock order is journal, then venue. Every write holds the journal lock
/// for its whole check-append-apply step, so two writes never interleave.
pub struct MemoryStore {
    venues: DashMap<Ulid, SharedVenueState>,
    accounts: DashMap<Ulid, Account>,
    reservation_venue: DashMap<Ulid, Ulid>,
    table_venue: DashMap<Ulid, Ulid>,
    block_venue: DashMap<Ulid, Ulid>,
    journal: Mutex<Option<Journal>>,
}

impl MemoryStore {
    /// A store with no journal. State dies with the process.
    pub fn ephemeral() -> Self {
        Self {
            venues: DashMap::new(),
            accounts: DashMap::new(),
            reservation_venue: DashMap::new(),
            table_venue: DashMap::new(),
            block_venue: DashMap::new(),
            journal: Mutex::new(None),
        }
    }

    /// Replay the journal at `path`, then keep appending to it.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let events = Journal::replay(path)?;
        let store = Self::ephemeral();
        for event in &events {
            store.apply(event).await;
        }
        *store.journal.lock().await = Some(Journal::open(path)?);
        info!(
            "journal {} replayed: {} events, {} venues",
            path.display(),
            events.len(),
            store.venues.len()
        );
        Ok(store)
    }

    fn venue_state(&self, venue_id: Ulid) -> Result<SharedVenueState, StoreError> {
        self.venues
            .get(&venue_id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { entity: "venue", id: venue_id })
    }

    fn owner_of(&self, record: &VenueRecord) -> Option<Account> {
        self.accounts.get(&record.owner_id).map(|a| a.value().clone())
    }

    /// Apply an event outside the write path (replay).
    async fn apply(&self, event: &Event) {
        match event {
            Event::AccountUpserted(account) => {
                self.accounts.insert(account.id, account.clone());
            }
            Event::VenueUpserted(record) => self.apply_venue_upsert(record).await,
            other => {
                let state = event_venue_id(other).and_then(|id| self.venue_state(id).ok());
                match state {
                    Some(state) => {
                        let mut vs = state.write().await;
                        self.apply_locked(&mut vs, other);
                    }
                    None => warn!("journal event for unknown venue skipped: {other:?}"),
                }
            }
        }
    }

    async fn apply_venue_upsert(&self, record: &VenueRecord) {
        let existing = self.venues.get(&record.id).map(|e| e.value().clone());
        match existing {
            Some(state) => state.write().await.record = record.clone(),
            None => {
                self.venues.insert(
                    record.id,
                    Arc::new(RwLock::new(VenueState::new(record.clone()))),
                );
            }
        }
    }

    /// Apply a venue-scoped event. The caller holds the venue's write lock.
    fn apply_locked(&self, vs: &mut VenueState, event: &Event) {
        match event {
            Event::VenueStatusChanged {
                status,
                pause_message,
                deleted_at,
                ..
            } => {
                vs.record.status = *status;
                vs.record.pause_message = pause_message.clone();
                vs.record.deleted_at = *deleted_at;
            }
            Event::HoursRowSet { row, .. } => {
                if let Some(hours) = vs.record.hours.as_mut() {
                    hours.set_row(row.clone());
                }
            }
            Event::TableUpserted(table) => {
                self.table_venue.insert(table.id, table.venue_id);
                match vs.table_mut(table.id) {
                    Some(existing) => {
                        let seats = std::mem::take(&mut existing.seats);
                        *existing = Table { seats, ..table.clone() };
                    }
                    None => vs.tables.push(Table {
                        seats: Vec::new(),
                        ..table.clone()
                    }),
                }
            }
            Event::SeatUpserted { seat, .. } => {
                if let Some(table) = vs.table_mut(seat.table_id) {
                    match table.seats.iter_mut().find(|s| s.id == seat.id) {
                        Some(existing) => *existing = seat.clone(),
                        None => table.seats.push(seat.clone()),
                    }
                }
            }
            Event::SeatBlockAdded(block) => {
                self.block_venue.insert(block.id, block.venue_id);
                let pos = vs.blocks.partition_point(|b| b.span.start <= block.span.start);
                vs.blocks.insert(pos, block.clone());
            }
            Event::SeatBlockRemoved { id, .. } => {
                vs.blocks.retain(|b| b.id != *id);
                self.block_venue.remove(id);
            }
            Event::ReservationsCreated { reservations, .. } => {
                for r in reservations {
                    self.reservation_venue.insert(r.id, r.venue_id);
                    vs.insert_reservation(r.clone());
                }
            }
            Event::ReservationStatusChanged { id, status, .. } => {
                if let Some(r) = vs.reservations.iter_mut().find(|r| r.id == *id) {
                    r.status = *status;
                }
            }
            Event::ReservationRescheduled { id, change, .. } => {
                if let Some(mut r) = vs.take_reservation(*id) {
                    r.span = change.span;
                    r.target = change.target;
                    r.total_cents = change.total_cents;
                    vs.insert_reservation(r);
                }
            }
            Event::AccountUpserted(_) | Event::VenueUpserted(_) => {}
        }
    }

    /// Durably journal `events`. Caller holds the journal lock.
    fn append(journal: &mut Option<Journal>, events: &[Event]) -> Result<(), StoreError> {
        let Some(journal) = journal.as_mut() else {
            return Ok(());
        };
        let started = Instant::now();
        let result = journal.commit(events);
        metrics::histogram!(observability::JOURNAL_COMMIT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::histogram!(observability::JOURNAL_COMMIT_BATCH_SIZE).record(events.len() as f64);
        result.map_err(|e| {
            tracing::error!("journal commit failed: {e}");
            StoreError::from(e)
        })
    }

    /// Journal and apply one venue-scoped event.
    async fn write_venue_event(&self, venue_id: Ulid, event: Event) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        let state = self.venue_state(venue_id)?;
        let mut vs = state.write().await;
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply_locked(&mut vs, &event);
        Ok(())
    }

    // ── Management ───────────────────────────────────────────

    pub async fn upsert_account(&self, account: Account) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        let event = Event::AccountUpserted(account);
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply(&event).await;
        Ok(())
    }

    /// Create or replace a venue row. Weekly rows survive when the timezone
    /// is unchanged.
    pub async fn upsert_venue(&self, mut record: VenueRecord) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        let existing = self.venues.get(&record.id).map(|e| e.value().clone());
        if let Some(state) = existing {
            let vs = state.read().await;
            if let (Some(new), Some(old)) = (record.hours.as_mut(), vs.record.hours.as_ref())
                && new.timezone == old.timezone && new.weekly_hours.is_empty() {
                    new.weekly_hours = old.weekly_hours.clone();
                }
        }
        let event = Event::VenueUpserted(record);
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply(&event).await;
        Ok(())
    }

    /// Change lifecycle status. Moving to `Deleted` stamps `deleted_at`
    /// once; any other status clears it.
    pub async fn set_venue_status(
        &self,
        venue_id: Ulid,
        status: VenueStatus,
        pause_message: Option<String>,
        now: Ms,
    ) -> Result<(), StoreError> {
        let previous = self.venue_state(venue_id)?.read().await.record.deleted_at;
        let deleted_at = match status {
            VenueStatus::Deleted => previous.or(Some(now)),
            _ => None,
        };
        self.write_venue_event(
            venue_id,
            Event::VenueStatusChanged {
                id: venue_id,
                status,
                pause_message,
                deleted_at,
            },
        )
        .await
    }

    pub async fn set_hours_row(&self, venue_id: Ulid, row: WeeklyHoursRow) -> Result<(), StoreError> {
        let has_hours = self.venue_state(venue_id)?.read().await.record.hours.is_some();
        if !has_hours {
            return Err(StoreError::Invalid(format!(
                "venue {venue_id} has no timezone; set one before adding hours"
            )));
        }
        self.write_venue_event(venue_id, Event::HoursRowSet { venue_id, row }).await
    }

    /// Replace the venue's schedule wholesale.
    pub async fn set_hours(&self, venue_id: Ulid, hours: VenueHours) -> Result<(), StoreError> {
        let mut record = self.venue_state(venue_id)?.read().await.record.clone();
        record.hours = Some(hours);
        let mut journal = self.journal.lock().await;
        let event = Event::VenueUpserted(record);
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply(&event).await;
        Ok(())
    }

    pub async fn upsert_table(&self, table: Table) -> Result<(), StoreError> {
        let venue_id = table.venue_id;
        self.write_venue_event(venue_id, Event::TableUpserted(Table { seats: Vec::new(), ..table }))
            .await
    }

    pub async fn upsert_seat(&self, seat: Seat) -> Result<(), StoreError> {
        let venue_id = self
            .table_venue
            .get(&seat.table_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound { entity: "table", id: seat.table_id })?;
        self.write_venue_event(venue_id, Event::SeatUpserted { venue_id, seat }).await
    }

    pub async fn add_seat_block(&self, block: SeatBlock) -> Result<(), StoreError> {
        if let Some(seat_id) = block.seat_id {
            let known = self.venue_state(block.venue_id)?.read().await.has_seat(seat_id);
            if !known {
                return Err(StoreError::NotFound { entity: "seat", id: seat_id });
            }
        }
        let venue_id = block.venue_id;
        self.write_venue_event(venue_id, Event::SeatBlockAdded(block)).await
    }

    pub async fn remove_seat_block(&self, id: Ulid) -> Result<(), StoreError> {
        let venue_id = self
            .block_venue
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound { entity: "seat block", id })?;
        self.write_venue_event(venue_id, Event::SeatBlockRemoved { id, venue_id }).await
    }

    // ── Compaction ───────────────────────────────────────────

    pub async fn appends_since_compact(&self) -> u64 {
        self.journal
            .lock()
            .await
            .as_ref()
            .map_or(0, Journal::appends_since_compact)
    }

    /// Rewrite the journal as the minimal event list for the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        let Some(journal) = journal.as_mut() else {
            return Ok(());
        };
        let mut snapshot: Vec<Event> = self
            .accounts
            .iter()
            .map(|a| Event::AccountUpserted(a.value().clone()))
            .collect();
        let states: Vec<SharedVenueState> = self.venues.iter().map(|e| e.value().clone()).collect();
        for state in states {
            state.read().await.snapshot(&mut snapshot);
        }
        journal.rewrite(&snapshot)?;
        metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
        info!("journal compacted to {} events", snapshot.len());
        Ok(())
    }
}

/// Background task: compact once enough appends have piled up.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if store.appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = store.compact().await {
            tracing::error!("journal compaction failed: {e}");
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_venue(&self, venue_id: Ulid) -> Result<Option<Venue>, StoreError> {
        let Ok(state) = self.venue_state(venue_id) else {
            return Ok(None);
        };
        let vs = state.read().await;
        Ok(Some(vs.venue(self.owner_of(&vs.record))))
    }

    async fn find_account(&self, account_id: Ulid) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&account_id).map(|a| a.value().clone()))
    }

    async fn find_reservation(
        &self,
        id: Ulid,
    ) -> Result<Option<ReservationWithContext>, StoreError> {
        let Some(venue_id) = self.reservation_venue.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let state = self.venue_state(venue_id)?;
        let vs = state.read().await;
        Ok(vs.reservation(id).map(|r| ReservationWithContext {
            reservation: r.clone(),
            venue: vs.venue(self.owner_of(&vs.record)),
        }))
    }

    async fn reservations_overlapping(
        &self,
        venue_id: Ulid,
        selector: ResourceSelector,
        window: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let state = self.venue_state(venue_id)?;
        let vs = state.read().await;
        Ok(vs
            .reservations_in(&window)
            .filter(|r| Some(r.id) != exclude)
            .filter(|r| match selector {
                ResourceSelector::Venue => true,
                ResourceSelector::Table(table_id) => r.target.table_id() == Some(table_id),
                ResourceSelector::Seat(seat_id) => r.target.seat_id() == Some(seat_id),
            })
            .cloned()
            .collect())
    }

    async fn seat_blocks_overlapping(
        &self,
        venue_id: Ulid,
        seat_id: Option<Ulid>,
        window: Span,
    ) -> Result<Vec<SeatBlock>, StoreError> {
        let state = self.venue_state(venue_id)?;
        let vs = state.read().await;
        Ok(vs
            .blocks_in(&window)
            .filter(|b| seat_id.is_none_or(|s| b.covers_seat(s)))
            .cloned()
            .collect())
    }

    async fn insert_reservations(&self, reservations: Vec<Reservation>) -> Result<(), StoreError> {
        let Some(venue_id) = reservations.first().map(|r| r.venue_id) else {
            return Err(StoreError::Invalid("no reservations to insert".into()));
        };
        if reservations.iter().any(|r| r.venue_id != venue_id) {
            return Err(StoreError::Invalid("reservations span more than one venue".into()));
        }

        let mut journal = self.journal.lock().await;
        let state = self.venue_state(venue_id)?;
        let mut vs = state.write().await;
        let venue = vs.venue(None);

        let mut accepted: Vec<Reservation> = Vec::with_capacity(reservations.len());
        for r in &reservations {
            if self.reservation_venue.contains_key(&r.id) || accepted.iter().any(|a| a.id == r.id) {
                return Err(StoreError::Invalid(format!("reservation {} already exists", r.id)));
            }
            let mut existing: Vec<Reservation> = vs.reservations_in(&r.span).cloned().collect();
            existing.extend(accepted.iter().cloned());
            let blocks: Vec<SeatBlock> = vs.blocks_in(&r.span).cloned().collect();
            if let Err(with) =
                check_conflicts(&venue, &r.target, &r.span, r.seat_count, &existing, &blocks, None)
            {
                debug!("insert of {} lost at write time: {with}", r.id);
                metrics::counter!(observability::WRITE_CONFLICTS_TOTAL).increment(1);
                return Err(StoreError::Conflict(with));
            }
            accepted.push(r.clone());
        }

        let event = Event::ReservationsCreated {
            venue_id,
            reservations: accepted,
        };
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply_locked(&mut vs, &event);
        Ok(())
    }

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let venue_id = self
            .reservation_venue
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound { entity: "reservation", id })?;

        let mut journal = self.journal.lock().await;
        let state = self.venue_state(venue_id)?;
        let mut vs = state.write().await;
        let current = vs
            .reservation(id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "reservation", id })?;
        if current.status == status {
            return Ok(current);
        }
        if status == ReservationStatus::Active {
            let venue = vs.venue(None);
            let existing: Vec<Reservation> = vs.reservations_in(&current.span).cloned().collect();
            let blocks: Vec<SeatBlock> = vs.blocks_in(&current.span).cloned().collect();
            check_conflicts(
                &venue,
                &current.target,
                &current.span,
                current.seat_count,
                &existing,
                &blocks,
                Some(id),
            )
            .map_err(StoreError::Conflict)?;
        }

        let event = Event::ReservationStatusChanged { id, venue_id, status };
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply_locked(&mut vs, &event);
        Ok(Reservation { status, ..current })
    }

    async fn update_reservation_window(
        &self,
        id: Ulid,
        change: WindowChange,
    ) -> Result<Reservation, StoreError> {
        let venue_id = self
            .reservation_venue
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound { entity: "reservation", id })?;

        let mut journal = self.journal.lock().await;
        let state = self.venue_state(venue_id)?;
        let mut vs = state.write().await;
        let current = vs
            .reservation(id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "reservation", id })?;
        if !current.is_active() {
            return Err(StoreError::Invalid(format!("reservation {id} is cancelled")));
        }

        let venue = vs.venue(None);
        let existing: Vec<Reservation> = vs.reservations_in(&change.span).cloned().collect();
        let blocks: Vec<SeatBlock> = vs.blocks_in(&change.span).cloned().collect();
        if let Err(with) = check_conflicts(
            &venue,
            &change.target,
            &change.span,
            current.seat_count,
            &existing,
            &blocks,
            Some(id),
        ) {
            metrics::counter!(observability::WRITE_CONFLICTS_TOTAL).increment(1);
            return Err(StoreError::Conflict(with));
        }

        let event = Event::ReservationRescheduled { id, venue_id, change };
        Self::append(&mut journal, std::slice::from_ref(&event))?;
        self.apply_locked(&mut vs, &event);
        Ok(Reservation {
            span: change.span,
            target: change.target,
            total_cents: change.total_cents,
            ..current
        })
    }
}
