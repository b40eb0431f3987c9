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

use crate::auth::RoomBookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, format_cents, Command, ResultShape, SqlError};

pub struct RoomBookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomBookQueryParser>,
}

impl RoomBookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomBookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { id, profile } => {
                engine.create_room(id, profile).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, changes } => {
                let current = engine
                    .get_room_state(&id)
                    .ok_or_else(|| engine_err(EngineError::ResourceNotFound(id)))?
                    .read()
                    .await
                    .profile
                    .clone();
                engine
                    .update_room(id, changes.apply(current))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertUser { user } => {
                engine.register_user(user).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation { request } => {
                let r = engine.create_reservation(request).await.map_err(engine_err)?;
                Ok(reservation_rows(vec![r]))
            }
            Command::InsertSeries { request } => {
                let (_, created) = engine.create_series(request).await.map_err(engine_err)?;
                Ok(reservation_rows(created))
            }
            Command::CancelReservation { id } => {
                let r = engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(reservation_rows(vec![r]))
            }
            Command::DeleteSeries { id } => {
                let n = engine.delete_series(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(n)))
            }
            Command::SelectAvailability {
                room_id,
                start,
                end,
                exclude,
            } => {
                let available = engine
                    .is_available(room_id, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&start)?;
                encoder.encode_field(&end)?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectFreeSlots {
                room_id,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .free_slots(room_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_slots_schema());
                let rid = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailableRooms { start, end, filter } => {
                let rooms = engine
                    .list_available_rooms(start, end, &filter)
                    .await
                    .map_err(engine_err)?;
                Ok(room_rows(rooms))
            }
            Command::SelectRooms { filter } => Ok(room_rows(engine.list_active_rooms(&filter).await)),
            Command::SelectUsers => Ok(user_rows(engine.list_users())),
            Command::SelectReservations { filter } => {
                Ok(reservation_rows(engine.list_reservations(&filter).await))
            }
            Command::SelectSeries { id } => Ok(reservation_rows(engine.get_series(id).await)),
        }
    }
}

// ── Row schemas and encoders ─────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("available", Type::BOOL),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("floor", Type::INT4),
        field("description", Type::VARCHAR),
        field("active", Type::BOOL),
        field("hourly_rate", Type::VARCHAR),
        field("equipment", Type::VARCHAR),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("department", Type::VARCHAR),
        field("is_admin", Type::BOOL),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("attendees", Type::INT8),
        field("series_id", Type::VARCHAR),
        field("recurrence", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn shape_schema(shape: Option<ResultShape>) -> Vec<FieldInfo> {
    match shape {
        Some(ResultShape::Availability) => availability_schema(),
        Some(ResultShape::FreeSlots) => free_slots_schema(),
        Some(ResultShape::Rooms) => room_schema(),
        Some(ResultShape::Users) => user_schema(),
        Some(ResultShape::Reservations) => reservation_schema(),
        None => vec![],
    }
}

fn encode_rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn room_rows(rooms: Vec<RoomInfo>) -> Response {
    encode_rows(room_schema(), rooms, |e, r| {
        e.encode_field(&r.id.to_string())?;
        e.encode_field(&r.name)?;
        e.encode_field(&(r.capacity as i64))?;
        e.encode_field(&r.floor)?;
        e.encode_field(&r.description)?;
        e.encode_field(&r.active)?;
        e.encode_field(&format_cents(r.hourly_rate_cents))?;
        e.encode_field(&r.equipment.join(","))
    })
}

fn user_rows(users: Vec<UserInfo>) -> Response {
    encode_rows(user_schema(), users, |e, u| {
        e.encode_field(&u.id.to_string())?;
        e.encode_field(&u.name)?;
        e.encode_field(&u.email)?;
        e.encode_field(&u.department)?;
        e.encode_field(&u.is_admin)
    })
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    encode_rows(reservation_schema(), reservations, |e, r| {
        e.encode_field(&r.id.to_string())?;
        e.encode_field(&r.room_id.to_string())?;
        e.encode_field(&r.user_id.to_string())?;
        e.encode_field(&r.title)?;
        e.encode_field(&r.description)?;
        e.encode_field(&r.span.start)?;
        e.encode_field(&r.span.end)?;
        e.encode_field(&r.status.to_string())?;
        e.encode_field(&(r.attendees as i64))?;
        e.encode_field(&r.series_id().map(|id| id.to_string()))?;
        e.encode_field(&r.series.map(|s| s.frequency.to_string()))?;
        e.encode_field(&r.created_at)?;
        e.encode_field(&r.updated_at)
    })
}

#[async_trait]
impl SimpleQueryHandler for RoomBookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomBookQueryParser;

#[async_trait]
impl QueryParser for RoomBookQueryParser {
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
        Ok(shape_schema(sql::result_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomBookHandler {
    type Statement = String;
    type QueryParser = RoomBookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql).await
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
        let schema = shape_schema(sql::result_shape(&target.statement));
        Ok(DescribeStatementResponse::new(param_types, schema))
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
        let schema = shape_schema(sql::result_shape(&target.statement.statement));
        Ok(DescribePortalResponse::new(schema))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with bound parameter values (text format), highest first
/// so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.clone();
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

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomBookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RoomBookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomBookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomBookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<RoomBookFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.kind().sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
