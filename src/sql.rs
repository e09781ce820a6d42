use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{RescheduleRequest, ReservationRequest};
use crate::hours::{VenueHours, WeeklyHoursRow};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    // Management (admin only).
    UpsertAccount(Account),
    UpsertVenue(VenueRecord),
    SetVenueStatus {
        id: Ulid,
        status: VenueStatus,
        pause_message: Option<String>,
    },
    UpsertTable(Table),
    UpsertSeat(Seat),
    SetHoursRow {
        venue_id: Ulid,
        row: WeeklyHoursRow,
    },
    InsertSeatBlock(SeatBlock),
    DeleteSeatBlock {
        id: Ulid,
    },

    // Bookings.
    InsertReservations(ReservationRequest),
    CancelReservation {
        id: Ulid,
    },
    RescheduleReservation {
        id: Ulid,
        change: RescheduleRequest,
    },

    // Queries.
    SelectOpenStatus {
        venue_id: Ulid,
        at: Option<Ms>,
    },
    SelectBookability {
        venue_id: Ulid,
    },
    SelectAvailability {
        venue_id: Ulid,
        start: Ms,
        end: Ms,
        seat_count: Option<u32>,
    },
    SelectSlots {
        venue_id: Ulid,
        date: String,
    },
    SelectLabel {
        venue_id: Ulid,
        at: Option<Ms>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = insert_rows(insert)?;

    if table == "reservations" {
        return parse_insert_reservations(&rows);
    }
    let [row] = rows.as_slice() else {
        return Err(SqlError::Unsupported(format!(
            "multi-row INSERT into {table}"
        )));
    };

    match table.as_str() {
        "accounts" => Ok(Command::UpsertAccount(Account {
            id: row.ulid("id")?,
            email: row.string("email")?,
            role: match row.opt_string("role")?.as_deref() {
                None | Some("member") => Role::Member,
                Some("admin") => Role::Admin,
                Some(other) => return Err(SqlError::Parse(format!("bad role: {other}"))),
            },
            status: match row.opt_string("status")?.as_deref() {
                None | Some("active") => AccountStatus::Active,
                Some("deleted") => AccountStatus::Deleted,
                Some(other) => return Err(SqlError::Parse(format!("bad account status: {other}"))),
            },
        })),
        "venues" => {
            let hours = row
                .opt_string("timezone")?
                .map(|tz| VenueHours::new(&tz, Vec::new()))
                .transpose()
                .map_err(|e| SqlError::Parse(e.to_string()))?;
            Ok(Command::UpsertVenue(VenueRecord {
                id: row.ulid("id")?,
                name: row.opt_string("name")?,
                owner_id: row.ulid("owner_id")?,
                status: VenueStatus::Active,
                pause_message: None,
                deleted_at: None,
                hours,
            }))
        }
        "tables" => Ok(Command::UpsertTable(Table {
            id: row.ulid("id")?,
            venue_id: row.ulid("venue_id")?,
            name: row.opt_string("name")?,
            seat_count: row.opt_u32("seat_count")?.unwrap_or(0),
            booking_mode: match row.opt_string("booking_mode")?.as_deref() {
                None | Some("individual") => BookingMode::Individual,
                Some("group") => BookingMode::Group,
                Some(other) => return Err(SqlError::Parse(format!("bad booking_mode: {other}"))),
            },
            table_price_per_hour: row.opt_i64("table_price_per_hour")?,
            is_active: row.opt_bool("is_active")?.unwrap_or(true),
            seats: Vec::new(),
        })),
        "seats" => Ok(Command::UpsertSeat(Seat {
            id: row.ulid("id")?,
            table_id: row.ulid("table_id")?,
            label: row.opt_string("label")?,
            price_per_hour: row.opt_i64("price_per_hour")?.unwrap_or(0),
            is_active: row.opt_bool("is_active")?.unwrap_or(true),
        })),
        "hours" => {
            let venue_id = row.ulid("venue_id")?;
            let day = row.opt_i64("day_of_week")?.ok_or(SqlError::MissingColumn("day_of_week"))?;
            let day = u8::try_from(day).map_err(|_| SqlError::Parse(format!("bad day_of_week: {day}")))?;
            let open = row.opt_string("open_time")?;
            let close = row.opt_string("close_time")?;
            let row = match (row.opt_bool("is_closed")?.unwrap_or(false), open, close) {
                (false, Some(open), Some(close)) => WeeklyHoursRow::open(day, &open, &close)
                    .map_err(|e| SqlError::Parse(e.to_string()))?,
                _ => WeeklyHoursRow::closed(day),
            };
            Ok(Command::SetHoursRow { venue_id, row })
        }
        "seat_blocks" => Ok(Command::InsertSeatBlock(SeatBlock {
            id: row.ulid("id")?,
            venue_id: row.ulid("venue_id")?,
            seat_id: row.opt_ulid("seat_id")?,
            span: Span::try_new(row.ms("start")?, row.ms("end")?)
                .ok_or_else(|| SqlError::Parse("block start must be before end".into()))?,
            reason: row.opt_string("reason")?,
        })),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Several rows book several seats together; they must agree on venue and
/// window.
fn parse_insert_reservations(rows: &[Columns<'_>]) -> Result<Command, SqlError> {
    let first = &rows[0];
    let mut request = ReservationRequest {
        venue_id: first.opt_ulid("venue_id")?,
        table_id: first.opt_ulid("table_id")?,
        seat_count: first.opt_u32("seat_count")?,
        start: first.opt_ms("start")?,
        end: first.opt_ms("end")?,
        ..Default::default()
    };
    for (i, row) in rows.iter().enumerate() {
        let shared = (row.opt_ulid("venue_id")?, row.opt_ms("start")?, row.opt_ms("end")?);
        if shared != (request.venue_id, request.start, request.end) {
            return Err(SqlError::Parse(format!(
                "row {i}: every row must share venue_id, start and end"
            )));
        }
        if let Some(id) = row.opt_ulid("id")? {
            request.ids.push(id);
        }
        match row.opt_ulid("seat_id")? {
            Some(seat_id) => request.seat_ids.push(seat_id),
            None if rows.len() > 1 => {
                return Err(SqlError::Parse(format!("row {i}: seat_id required in multi-row INSERT")));
            }
            None => {}
        }
    }
    Ok(Command::InsertReservations(request))
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }
    let set = Columns(set);

    match table.as_str() {
        "venues" => {
            let status = set.string("status")?;
            let status = VenueStatus::parse(&status)
                .ok_or_else(|| SqlError::Parse(format!("bad venue status: {status}")))?;
            Ok(Command::SetVenueStatus {
                id,
                status,
                pause_message: set.opt_string("pause_message")?,
            })
        }
        "reservations" => match set.opt_string("status")?.as_deref() {
            Some("cancelled") => Ok(Command::CancelReservation { id }),
            Some(other) => Err(SqlError::Unsupported(format!("reservation status {other}"))),
            None => Ok(Command::RescheduleReservation {
                id,
                change: RescheduleRequest {
                    start: set.ms("start")?,
                    end: set.ms("end")?,
                    seat_id: set.opt_ulid("seat_id")?,
                },
            }),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        "seat_blocks" => Ok(Command::DeleteSeatBlock { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// WHERE clause flattened into `column op value` conjuncts.
#[derive(Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
    start: Option<&'a Expr>,
    end: Option<&'a Expr>,
}

impl<'a> Filters<'a> {
    fn collect(&mut self, expr: &'a Expr) {
        let Expr::BinaryOp { left, op, right } = expr else {
            return;
        };
        match op {
            ast::BinaryOperator::And => {
                self.collect(left);
                self.collect(right);
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    self.eq.push((col, right));
                }
            }
            ast::BinaryOperator::GtEq if expr_column_name(left).as_deref() == Some("start") => {
                self.start = Some(right);
            }
            ast::BinaryOperator::LtEq if expr_column_name(left).as_deref() == Some("end") => {
                self.end = Some(right);
            }
            _ => {}
        }
    }

    fn columns(&self) -> Columns<'a> {
        Columns(self.eq.clone())
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection);
    }
    let eq = filters.columns();
    let venue_id = eq
        .opt_ulid("venue_id")?
        .ok_or(SqlError::MissingFilter("venue_id"))?;

    match table.as_str() {
        "open_status" => Ok(Command::SelectOpenStatus {
            venue_id,
            at: eq.opt_ms("at")?,
        }),
        "bookability" => Ok(Command::SelectBookability { venue_id }),
        "availability" => {
            let start = filters.start.or_else(|| eq.get("start"));
            let end = filters.end.or_else(|| eq.get("end"));
            Ok(Command::SelectAvailability {
                venue_id,
                start: parse_ms_expr(start.ok_or(SqlError::MissingFilter("start"))?)?,
                end: parse_ms_expr(end.ok_or(SqlError::MissingFilter("end"))?)?,
                seat_count: eq.opt_u32("seat_count")?,
            })
        }
        "slots" => Ok(Command::SelectSlots {
            venue_id,
            date: eq.opt_string("date")?.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "label" => Ok(Command::SelectLabel {
            venue_id,
            at: eq.opt_ms("at")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Table a SELECT reads from, without parsing the whole statement. Used to
/// describe result columns before parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| t.eq_ignore_ascii_case("from"))?;
    tokens
        .next()
        .map(|t| t.trim_matches(|c| c == '"' || c == ';').to_lowercase())
}

// ── Column access ─────────────────────────────────────────────

/// Named values of one INSERT row, SET list or WHERE clause. NULL reads as
/// absent.
struct Columns<'a>(Vec<(String, &'a Expr)>);

impl<'a> Columns<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, expr)| *expr)
            .filter(|expr| !matches!(extract_value(expr), Some(Value::Null)))
    }

    fn opt<T>(
        &self,
        col: &str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.get(col)
            .map(|expr| parse(expr).map_err(|e| SqlError::Parse(format!("{col}: {e}"))))
            .transpose()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.opt_ulid(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.opt(col, parse_ulid_expr)
    }

    fn ms(&self, col: &'static str) -> Result<Ms, SqlError> {
        self.opt_ms(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_ms(&self, col: &str) -> Result<Option<Ms>, SqlError> {
        self.opt(col, parse_ms_expr)
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.opt(col, parse_i64_expr)
    }

    fn opt_u32(&self, col: &str) -> Result<Option<u32>, SqlError> {
        self.opt(col, |expr| {
            let v = parse_i64_expr(expr)?;
            u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
        })
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        self.opt_string(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.opt(col, parse_string_expr)
    }

    fn opt_bool(&self, col: &str) -> Result<Option<bool>, SqlError> {
        self.opt(col, parse_bool)
    }
}

fn insert_rows(insert: &ast::Insert) -> Result<Vec<Columns<'_>>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let names: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = body.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    if values.rows.is_empty() {
        return Err(SqlError::Parse("empty VALUES".into()));
    }
    values
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != names.len() {
                return Err(SqlError::Parse(format!(
                    "row {i}: {} columns but {} values",
                    names.len(),
                    row.len()
                )));
            }
            Ok(Columns(names.iter().cloned().zip(row.iter()).collect()))
        })
        .collect()
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Integer milliseconds, or an RFC 3339 string.
fn parse_ms_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_instant(s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
        }
        _ => parse_i64_expr(expr),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
