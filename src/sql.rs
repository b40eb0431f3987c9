use std::collections::BTreeSet;

use sqlparser::ast::{
    self, Assignment, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_IN_FILTER_ITEMS;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        profile: RoomProfile,
    },
    UpdateRoom {
        id: Ulid,
        changes: RoomChanges,
    },
    InsertUser {
        user: UserInfo,
    },
    InsertReservation {
        request: NewReservation,
    },
    InsertSeries {
        request: NewSeries,
    },
    CancelReservation {
        id: Ulid,
    },
    DeleteSeries {
        id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
    SelectFreeSlots {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    SelectAvailableRooms {
        start: Ms,
        end: Ms,
        filter: RoomFilter,
    },
    SelectRooms {
        filter: RoomFilter,
    },
    SelectUsers,
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectSeries {
        id: Ulid,
    },
}

/// Columns set by `UPDATE rooms`; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomChanges {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub hourly_rate_cents: Option<u64>,
    pub equipment: Option<BTreeSet<String>>,
    pub floor: Option<Option<i32>>,
    pub description: Option<Option<String>>,
    pub active: Option<bool>,
}

impl RoomChanges {
    pub fn apply(self, mut profile: RoomProfile) -> RoomProfile {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(capacity) = self.capacity {
            profile.capacity = capacity;
        }
        if let Some(rate) = self.hourly_rate_cents {
            profile.hourly_rate_cents = rate;
        }
        if let Some(equipment) = self.equipment {
            profile.equipment = equipment;
        }
        if let Some(floor) = self.floor {
            profile.floor = floor;
        }
        if let Some(description) = self.description {
            profile.description = description;
        }
        if let Some(active) = self.active {
            profile.active = active;
        }
        profile
    }
}

/// Row shape a statement answers with, for Describe in the extended protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Availability,
    FreeSlots,
    Rooms,
    Users,
    Reservations,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmt = parse_one(sql)?;
    match &stmt {
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

/// Which rows a statement returns, if any. Placeholders are fine here.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let stmt = parse_one(sql).ok()?;
    match &stmt {
        Statement::Insert(insert) => match insert_table_name(insert).ok()?.as_str() {
            "reservations" | "series" => Some(ResultShape::Reservations),
            _ => None,
        },
        Statement::Delete(delete) => match delete_table_name(delete).ok()?.as_str() {
            "reservations" => Some(ResultShape::Reservations),
            _ => None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            match table.as_str() {
                "availability" => Some(ResultShape::Availability),
                "free_slots" => Some(ResultShape::FreeSlots),
                "rooms" | "available_rooms" => Some(ResultShape::Rooms),
                "users" => Some(ResultShape::Users),
                "reservations" | "series" => Some(ResultShape::Reservations),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_one(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let v = Positional::new(&table, &values);

    match table.as_str() {
        "rooms" => {
            v.require(3)?;
            let mut profile = RoomProfile::new(parse_string(v.at(1))?, parse_u32(v.at(2))?);
            if let Some(e) = v.opt(3) {
                profile.hourly_rate_cents = parse_cents_or_null(e)?.unwrap_or(0);
            }
            if let Some(e) = v.opt(4) {
                profile.equipment = parse_list_or_null(e)?.into_iter().collect();
            }
            if let Some(e) = v.opt(5) {
                profile.floor = parse_i32_or_null(e)?;
            }
            if let Some(e) = v.opt(6) {
                profile.description = parse_string_or_null(e)?;
            }
            if let Some(e) = v.opt(7) {
                profile.active = parse_bool(e)?;
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(v.at(0))?,
                profile,
            })
        }
        "users" => {
            v.require(3)?;
            Ok(Command::InsertUser {
                user: UserInfo {
                    id: parse_ulid(v.at(0))?,
                    name: parse_string(v.at(1))?,
                    email: parse_string(v.at(2))?,
                    department: v.opt(3).map(parse_string_or_null).transpose()?.flatten(),
                    is_admin: v.opt(4).map(parse_bool).transpose()?.unwrap_or(false),
                },
            })
        }
        "reservations" => {
            v.require(5)?;
            Ok(Command::InsertReservation {
                request: parse_new_reservation(&v, 5)?,
            })
        }
        "series" => {
            v.require(7)?;
            let frequency = parse_string(v.at(5))?
                .parse::<Frequency>()
                .map_err(SqlError::Parse)?;
            Ok(Command::InsertSeries {
                request: NewSeries {
                    first: parse_new_reservation(&v, 7)?,
                    frequency,
                    occurrences: parse_u32(v.at(6))?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(room_id, user_id, title, start, "end", ..)` with attendees and description
/// in the two positions starting at `tail`.
fn parse_new_reservation(v: &Positional<'_>, tail: usize) -> Result<NewReservation, SqlError> {
    Ok(NewReservation {
        room_id: parse_ulid(v.at(0))?,
        user_id: parse_ulid(v.at(1))?,
        title: parse_string(v.at(2))?,
        start: parse_i64(v.at(3))?,
        end: parse_i64(v.at(4))?,
        attendees: v.opt(tail).map(parse_u32).transpose()?.unwrap_or(1),
        description: v.opt(tail + 1).map(parse_string_or_null).transpose()?.flatten(),
    })
}

/// Positional VALUES with arity checking.
struct Positional<'a> {
    table: &'a str,
    values: &'a [Expr],
}

impl<'a> Positional<'a> {
    fn new(table: &'a str, values: &'a [Expr]) -> Self {
        Self { table, values }
    }

    fn require(&self, n: usize) -> Result<(), SqlError> {
        if self.values.len() < n {
            return Err(SqlError::WrongArity(self.table.to_string(), n, self.values.len()));
        }
        Ok(())
    }

    /// Only call after `require` covered `i`.
    fn at(&self, i: usize) -> &'a Expr {
        &self.values[i]
    }

    fn opt(&self, i: usize) -> Option<&'a Expr> {
        self.values.get(i)
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    if table != "rooms" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut changes = RoomChanges::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        let e = &assignment.value;
        match column.as_str() {
            "name" => changes.name = Some(parse_string(e)?),
            "capacity" => changes.capacity = Some(parse_u32(e)?),
            "hourly_rate" => changes.hourly_rate_cents = Some(parse_cents_or_null(e)?.unwrap_or(0)),
            "equipment" => {
                changes.equipment = Some(parse_list_or_null(e)?.into_iter().collect())
            }
            "floor" => changes.floor = Some(parse_i32_or_null(e)?),
            "description" => changes.description = Some(parse_string_or_null(e)?),
            "active" => changes.active = Some(parse_bool(e)?),
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }
    Ok(Command::UpdateRoom { id, changes })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        "series" => Ok(Command::DeleteSeries { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column <op> value` conjunct of a WHERE clause.
struct Filter<'a> {
    column: String,
    op: BinaryOperator,
    value: &'a Expr,
}

/// Flatten an AND-tree of simple comparisons. Anything else is rejected
/// rather than silently ignored.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            if out.len() >= MAX_IN_FILTER_ITEMS {
                return Err(SqlError::Parse("too many filter terms".into()));
            }
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// Pulls typed values out of collected filters by column and operator.
struct Filters<'a> {
    items: Vec<Filter<'a>>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut items = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut items)?;
        }
        Ok(Self { items })
    }

    fn find(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.items
            .iter()
            .find(|f| f.column == column && &f.op == op)
            .map(|f| f.value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &BinaryOperator::Eq)
    }

    fn start(&self) -> Result<Option<Ms>, SqlError> {
        self.find("start", &BinaryOperator::GtEq).map(parse_i64).transpose()
    }

    fn end(&self) -> Result<Option<Ms>, SqlError> {
        self.find("end", &BinaryOperator::LtEq).map(parse_i64).transpose()
    }

    fn room_filter(&self) -> Result<RoomFilter, SqlError> {
        Ok(RoomFilter {
            min_capacity: self
                .find("capacity", &BinaryOperator::GtEq)
                .map(parse_u32)
                .transpose()?,
            equipment: self
                .eq("equipment")
                .map(parse_list_or_null)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let f = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_id: parse_ulid(f.eq("room_id").ok_or(SqlError::MissingFilter("room_id"))?)?,
            start: f.start()?.ok_or(SqlError::MissingFilter("start"))?,
            end: f.end()?.ok_or(SqlError::MissingFilter("end"))?,
            exclude: f.eq("exclude").map(parse_ulid).transpose()?,
        }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            room_id: parse_ulid(f.eq("room_id").ok_or(SqlError::MissingFilter("room_id"))?)?,
            start: f.start()?.ok_or(SqlError::MissingFilter("start"))?,
            end: f.end()?.ok_or(SqlError::MissingFilter("end"))?,
            min_duration: f.eq("min_duration").map(parse_i64).transpose()?,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            start: f.start()?.ok_or(SqlError::MissingFilter("start"))?,
            end: f.end()?.ok_or(SqlError::MissingFilter("end"))?,
            filter: f.room_filter()?,
        }),
        "rooms" => Ok(Command::SelectRooms {
            filter: f.room_filter()?,
        }),
        "users" => Ok(Command::SelectUsers),
        "reservations" => {
            let window = match (f.start()?, f.end()?) {
                (None, None) => None,
                (start, end) => {
                    let start = start.unwrap_or(Ms::MIN);
                    let end = end.unwrap_or(Ms::MAX);
                    if start >= end {
                        return Err(SqlError::Parse(format!("empty window [{start}, {end})")));
                    }
                    Some(Span::new(start, end))
                }
            };
            Ok(Command::SelectReservations {
                filter: ReservationFilter {
                    room_id: f.eq("room_id").map(parse_ulid).transpose()?,
                    user_id: f.eq("user_id").map(parse_ulid).transpose()?,
                    status: f
                        .eq("status")
                        .map(|e| {
                            parse_string(e)?
                                .parse::<ReservationStatus>()
                                .map_err(SqlError::Parse)
                        })
                        .transpose()?,
                    window,
                },
            })
        }
        "series" => Ok(Command::SelectSeries {
            id: parse_ulid(f.eq("id").ok_or(SqlError::MissingFilter("id"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Quoted strings and bare numbers both read as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i32_or_null(expr: &Expr) -> Result<Option<i32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let v = parse_i64(expr)?;
    i32::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Comma-separated list; blanks are dropped.
fn parse_list_or_null(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if is_null(expr) {
        return Ok(Vec::new());
    }
    Ok(parse_string(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_cents_or_null(expr: &Expr) -> Result<Option<u64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_cents(&parse_text(expr)?).map(Some)
}

/// Decimal money text with at most two fractional digits, in cents.
pub fn parse_cents(text: &str) -> Result<u64, SqlError> {
    let bad = || SqlError::Parse(format!("bad amount: {text:?}"));
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(bad());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
        || frac.len() > 2
    {
        return Err(bad());
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad())?
    };
    let frac: u64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().map_err(|_| bad())? * 10,
        _ => frac.parse().map_err(|_| bad())?,
    };
    whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(bad)
}

/// Cents as decimal text, e.g. `4550` → `"45.50"`.
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(String, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
