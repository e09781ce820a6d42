use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::{resolve_actor, VenuebookAuthSource};
use crate::engine::{Engine, EngineError, MemoryStore, WindowAvailability};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

/// Everything a connection needs, shared across connections.
pub struct WireContext {
    pub engine: Arc<Engine>,
    /// Same store the engine reads; management statements write to it
    /// directly.
    pub store: Arc<MemoryStore>,
    pub admin_user: String,
    pub password: String,
}

pub struct VenuebookHandler {
    ctx: Arc<WireContext>,
    query_parser: Arc<VenuebookQueryParser>,
}

impl VenuebookHandler {
    pub fn new(ctx: Arc<WireContext>) -> Self {
        Self {
            ctx,
            query_parser: Arc::new(VenuebookQueryParser),
        }
    }

    async fn resolve<C: ClientInfo>(&self, client: &C) -> Result<Option<Actor>, EngineError> {
        let user = client.metadata().get("user").cloned();
        let actor =
            resolve_actor(user.as_deref(), &self.ctx.admin_user, self.ctx.store.as_ref()).await?;
        if actor.is_none() && user.is_some() {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        }
        Ok(actor)
    }

    /// Resolve the caller, run one statement and record its metrics.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = match self.resolve(client).await {
            Ok(actor) => self.execute_command(actor.as_ref(), cmd).await,
            Err(e) => Err(e),
        };

        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        actor: Option<&Actor>,
        cmd: Command,
    ) -> Result<Response, EngineError> {
        let engine = &self.ctx.engine;
        let store = &self.ctx.store;
        match cmd {
            Command::UpsertAccount(account) => {
                require_admin(actor)?;
                store.upsert_account(account).await?;
                Ok(execution("INSERT", 1))
            }
            Command::UpsertVenue(record) => {
                require_admin(actor)?;
                store.upsert_venue(record).await?;
                Ok(execution("INSERT", 1))
            }
            Command::SetVenueStatus {
                id,
                status,
                pause_message,
            } => {
                require_admin(actor)?;
                store
                    .set_venue_status(id, status, pause_message, now_ms())
                    .await?;
                Ok(execution("UPDATE", 1))
            }
            Command::UpsertTable(table) => {
                require_admin(actor)?;
                store.upsert_table(table).await?;
                Ok(execution("INSERT", 1))
            }
            Command::UpsertSeat(seat) => {
                require_admin(actor)?;
                store.upsert_seat(seat).await?;
                Ok(execution("INSERT", 1))
            }
            Command::SetHoursRow { venue_id, row } => {
                require_admin(actor)?;
                store.set_hours_row(venue_id, row).await?;
                Ok(execution("INSERT", 1))
            }
            Command::InsertSeatBlock(block) => {
                require_admin(actor)?;
                store.add_seat_block(block).await?;
                Ok(execution("INSERT", 1))
            }
            Command::DeleteSeatBlock { id } => {
                require_admin(actor)?;
                store.remove_seat_block(id).await?;
                Ok(execution("DELETE", 1))
            }

            Command::InsertReservations(request) => {
                let rows = engine.create_reservation(actor, request, now_ms()).await?;
                Ok(execution("INSERT", rows.len()))
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(actor, id).await?;
                Ok(execution("UPDATE", 1))
            }
            Command::RescheduleReservation { id, change } => {
                engine.reschedule_reservation(actor, id, change).await?;
                Ok(execution("UPDATE", 1))
            }

            Command::SelectOpenStatus { venue_id, at } => {
                let status = engine
                    .open_status(venue_id, at.unwrap_or_else(now_ms))
                    .await?;
                let vid = venue_id.to_string();
                Ok(query(open_status_schema(), status, |enc, s| {
                    enc.encode_field(&vid)?;
                    enc.encode_field(&s.is_open)?;
                    enc.encode_field(&s.status.as_str())?;
                    enc.encode_field(&s.today_label)?;
                    enc.encode_field(&s.today_hours_text)?;
                    enc.encode_field(&s.next_open_at)
                }))
            }
            Command::SelectBookability { venue_id } => {
                let b = engine.venue_bookability(venue_id).await?;
                let vid = venue_id.to_string();
                Ok(query(bookability_schema(), [b], |enc, b| {
                    enc.encode_field(&vid)?;
                    enc.encode_field(&b.can_book)?;
                    enc.encode_field(&b.status.as_str())?;
                    enc.encode_field(&b.reason)?;
                    enc.encode_field(&b.pause_message)
                }))
            }
            Command::SelectAvailability {
                venue_id,
                start,
                end,
                seat_count,
            } => {
                let result = engine
                    .seat_availability(venue_id, start, end, seat_count.unwrap_or(1))
                    .await?;
                let (available, unavailable) = match result {
                    WindowAvailability::Seats {
                        available,
                        unavailable,
                    } => (available, unavailable),
                    WindowAvailability::CapacityExceeded { message, .. } => {
                        return Err(EngineError::validation("CAPACITY_EXCEEDED", message));
                    }
                };
                let rows = available
                    .into_iter()
                    .map(|s| {
                        (s.key, true, Some(s.table_id), s.label, Some(s.price_per_hour))
                    })
                    .chain(
                        unavailable
                            .into_iter()
                            .map(|(key, table_id)| (key, false, Some(table_id), None, None)),
                    );
                Ok(query(availability_schema(), rows, |enc, (key, free, table_id, label, price)| {
                    enc.encode_field(&key.to_string())?;
                    enc.encode_field(&free)?;
                    enc.encode_field(&table_id.map(|t| t.to_string()))?;
                    enc.encode_field(&label)?;
                    enc.encode_field(&price)
                }))
            }
            Command::SelectSlots { venue_id, date } => {
                let day = engine.slots_for_date(venue_id, &date).await?;
                let capacity = i64::from(day.capacity);
                Ok(query(slots_schema(), day.slots, |enc, slot| {
                    enc.encode_field(&slot.span.start)?;
                    enc.encode_field(&slot.span.end)?;
                    enc.encode_field(&i64::from(slot.available_seats))?;
                    enc.encode_field(&slot.is_fully_booked)?;
                    enc.encode_field(&capacity)
                }))
            }
            Command::SelectLabel { venue_id, at } => {
                let label = engine
                    .venue_label(venue_id, at.unwrap_or_else(now_ms))
                    .await?;
                let vid = venue_id.to_string();
                Ok(query(label_schema(), [label], |enc, label| {
                    enc.encode_field(&vid)?;
                    enc.encode_field(&label)
                }))
            }
        }
    }
}

fn require_admin(actor: Option<&Actor>) -> Result<(), EngineError> {
    match actor {
        None => Err(EngineError::Unauthenticated),
        Some(a) if a.is_admin() => Ok(()),
        Some(_) => Err(EngineError::Forbidden("management statements need an admin login")),
    }
}

fn execution(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

fn query<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn open_status_schema() -> Vec<FieldInfo> {
    vec![
        field("venue_id", Type::VARCHAR),
        field("is_open", Type::BOOL),
        field("status", Type::VARCHAR),
        field("today_label", Type::VARCHAR),
        field("today_hours_text", Type::VARCHAR),
        field("next_open_at", Type::INT8),
    ]
}

fn bookability_schema() -> Vec<FieldInfo> {
    vec![
        field("venue_id", Type::VARCHAR),
        field("can_book", Type::BOOL),
        field("status", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("pause_message", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("seat", Type::VARCHAR),
        field("available", Type::BOOL),
        field("table_id", Type::VARCHAR),
        field("label", Type::VARCHAR),
        field("price_per_hour", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("available_seats", Type::INT8),
        field("is_fully_booked", Type::BOOL),
        field("capacity", Type::INT8),
    ]
}

fn label_schema() -> Vec<FieldInfo> {
    vec![field("venue_id", Type::VARCHAR), field("label", Type::VARCHAR)]
}

/// Columns a statement returns, judged from its FROM table.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    if !sql.trim_start().get(..6).is_some_and(|s| s.eq_ignore_ascii_case("select")) {
        return vec![];
    }
    match sql::select_table(sql).as_deref() {
        Some("open_status") => open_status_schema(),
        Some("bookability") => bookability_schema(),
        Some("availability") => availability_schema(),
        Some("slots") => slots_schema(),
        Some("label") => label_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for VenuebookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VenuebookQueryParser;

#[async_trait]
impl QueryParser for VenuebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for VenuebookHandler {
    type Statement = String;
    type QueryParser = VenuebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.clone();

    // Highest index first so that $1 does not clobber $10.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct VenuebookFactory {
    handler: Arc<VenuebookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<VenuebookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl VenuebookFactory {
    pub fn new(ctx: Arc<WireContext>) -> Self {
        let auth_source = VenuebookAuthSource::new(ctx.password.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(VenuebookHandler::new(ctx)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VenuebookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    ctx: Arc<WireContext>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, VenuebookFactory::new(ctx)).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each failure class.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e.status() {
        400 => "22023",
        401 => "28000",
        403 => "42501",
        404 => "P0002",
        409 => "23P01",
        _ => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.status() >= 500 {
        error!("statement failed: {e}");
    } else {
        debug!("statement rejected: {e}");
    }
    let message = match &e {
        EngineError::BookingNotAllowed {
            public_message: Some(public),
            ..
        } => format!("{}: {e} ({public})", e.code()),
        _ => format!("{}: {e}", e.code()),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        message,
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
