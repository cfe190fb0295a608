use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::{Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::auth::CarrelAuthSource;
use crate::calendar::{self, now_ms, Slot};
use crate::engine::{Engine, EngineError, Rejection};
use crate::model::*;
use crate::notify;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Query handler for one client connection. Holds the connection's LISTEN
/// subscriptions so they go away with it.
pub struct CarrelHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CarrelQueryParser>,
    listening: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl CarrelHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CarrelQueryParser),
            listening: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("library error: {e}")))
    }

    /// Take every notification queued on this connection's channels.
    fn pending_notifications(&self) -> Vec<(String, String)> {
        let Ok(mut listening) = self.listening.lock() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        for (channel, rx) in listening.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => pending.push((channel.clone(), notify::payload(&event))),
                    Err(TryRecvError::Lagged(skipped)) => {
                        tracing::warn!("listener on {channel} lagged, {skipped} notifications dropped");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        pending
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for (channel, payload) in self.pending_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    0, channel, payload,
                )))
                .await?;
        }
        Ok(())
    }

    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        self.deliver_notifications(client).await?;
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
            sql_err(e)
        })?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSeats { seats } => {
                let count = seats.len();
                engine.create_seats(seats).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::UpdateSeatStatus {
                seat_id,
                physical_status,
            } => {
                engine
                    .set_physical_status(&seat_id, physical_status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSeats { seat_id, now_slot } => {
                let now = slot_or_now(now_slot);
                let seats: Vec<SeatInfo> = match seat_id {
                    Some(id) => engine.seat_info(&id, now).await.into_iter().collect(),
                    None => engine.list_seats(now).await,
                };
                let schema = Arc::new(seats_schema());
                let rows: Vec<PgWireResult<_>> = seats
                    .iter()
                    .map(|seat| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&seat.seat_id)?;
                        encoder.encode_field(&seat.physical_status.as_str())?;
                        encoder.encode_field(&today_bookings_json(&seat.today_bookings))?;
                        encoder.encode_field(&seat.next_booking_start.map(i32::from))?;
                        encoder.encode_field(&seat.next_booking_start.map(calendar::slot_to_label))?;
                        encoder.encode_field(&seat.phantom.map(|p| i32::from(p.start)))?;
                        encoder.encode_field(&seat.phantom.map(|p| i32::from(p.end)))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertBooking(req) => {
                let booking = engine.create_booking(req).await.map_err(engine_err)?;
                Ok(vec![bookings_response(vec![booking])])
            }
            Command::SelectBookings { student_id } => {
                let bookings = match student_id {
                    Some(id) => engine.student_bookings(&id),
                    None => engine.all_bookings(),
                };
                Ok(vec![bookings_response(bookings)])
            }
            Command::DeleteBooking(req) => {
                let cancelled = engine.cancel_booking(req).await.map_err(engine_err)?;
                let schema = Arc::new(cancel_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&cancelled.booking_id.to_string())?;
                encoder.encode_field(&cancelled.status.as_str())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::CheckIn {
                seat_id,
                pin_code,
                now_slot,
            } => {
                let now = match now_slot {
                    Some(slot) => calendar::with_slot(now_ms(), slot),
                    None => now_ms(),
                };
                let booking = engine
                    .check_in_at(&seat_id, &pin_code, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![bookings_response(vec![booking])])
            }
            Command::SelectAvailability {
                seat_id,
                start,
                end,
                now_slot,
            } => {
                let described = engine
                    .describe_availability(seat_id.as_deref(), start, end, slot_or_now(now_slot))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = described
                    .iter()
                    .map(|(seat_id, a)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(seat_id)?;
                        encoder.encode_field(&a.available)?;
                        encoder.encode_field(&a.blocked_by.map(|b| b.kind()))?;
                        encoder.encode_field(&a.blocked_by.map(|b| i32::from(b.slot().start)))?;
                        encoder.encode_field(&a.blocked_by.map(|b| i32::from(b.slot().end)))?;
                        encoder.encode_field(&a.next_free.map(i32::from))?;
                        encoder.encode_field(&a.next_free.map(calendar::slot_to_label))?;
                        encoder.encode_field(&a.next_booking.map(i32::from))?;
                        encoder.encode_field(&a.next_booking.map(calendar::slot_to_label))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectFreeSlots { seat_id, now_slot } => {
                let free = engine
                    .seat_free_slots(&seat_id, slot_or_now(now_slot))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_slots_schema());
                let rows: Vec<PgWireResult<_>> = free
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&seat_id)?;
                        encoder.encode_field(&i32::from(slot.start))?;
                        encoder.encode_field(&i32::from(slot.end))?;
                        encoder.encode_field(&calendar::slot_to_label(slot.start))?;
                        encoder.encode_field(&calendar::slot_to_label(slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Listen { channel } => {
                let seat_id = notify::seat_from_channel(&channel).ok_or_else(|| {
                    user_error("42000", format!("invalid channel: {channel} (expected seat_{{id}})"))
                })?;
                if engine.get_seat(seat_id).is_none() {
                    return Err(engine_err(Rejection::SeatNotFound(seat_id.to_string()).into()));
                }
                let rx = engine.notify.subscribe(seat_id);
                self.subscriptions()?.insert(channel, rx);
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                self.subscriptions()?.remove(&channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.subscriptions()?.clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    fn subscriptions(&self) -> PgWireResult<std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<Event>>>> {
        self.listening
            .lock()
            .map_err(|_| user_error("XX000", "listener state poisoned".into()))
    }
}

fn slot_or_now(now_slot: Option<Slot>) -> Slot {
    now_slot.unwrap_or_else(|| calendar::current_slot(now_ms()))
}

/// `[{"startSlot":20,"endSlot":24}, ...]`, the seat's bookings as `TimeSlot`s.
fn today_bookings_json(slots: &[TimeSlot]) -> String {
    serde_json::to_string(slots).unwrap_or_else(|_| "[]".into())
}

fn bookings_response(bookings: Vec<BookingInfo>) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.booking_id.to_string())?;
            encoder.encode_field(&b.seat_id)?;
            encoder.encode_field(&b.student_id)?;
            encoder.encode_field(&i32::from(b.start_slot))?;
            encoder.encode_field(&i32::from(b.end_slot))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.checked_in)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Row schemas ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn seats_schema() -> Vec<FieldInfo> {
    vec![
        field("seat_id", Type::VARCHAR),
        field("physical_status", Type::VARCHAR),
        field("today_bookings", Type::VARCHAR),
        field("next_booking_start", Type::INT4),
        field("next_booking_label", Type::VARCHAR),
        field("phantom_start", Type::INT4),
        field("phantom_end", Type::INT4),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("booking_id", Type::VARCHAR),
        field("seat_id", Type::VARCHAR),
        field("student_id", Type::VARCHAR),
        field("start_slot", Type::INT4),
        field("end_slot", Type::INT4),
        field("status", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("checked_in", Type::BOOL),
    ]
}

fn cancel_schema() -> Vec<FieldInfo> {
    vec![field("booking_id", Type::VARCHAR), field("status", Type::VARCHAR)]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("seat_id", Type::VARCHAR),
        field("available", Type::BOOL),
        field("blocked_by", Type::VARCHAR),
        field("blocked_start", Type::INT4),
        field("blocked_end", Type::INT4),
        field("next_free", Type::INT4),
        field("next_free_label", Type::VARCHAR),
        field("next_booking", Type::INT4),
        field("next_booking_label", Type::VARCHAR),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![
        field("seat_id", Type::VARCHAR),
        field("start_slot", Type::INT4),
        field("end_slot", Type::INT4),
        field("start_label", Type::VARCHAR),
        field("end_label", Type::VARCHAR),
    ]
}

/// Result columns a statement will produce, guessed from its text.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    let table = |name: &str| upper.contains(name);
    if upper.starts_with("SELECT") {
        if table("FREE_SLOTS") {
            free_slots_schema()
        } else if table("AVAILABILITY") {
            availability_schema()
        } else if table("SEATS") {
            seats_schema()
        } else if table("BOOKINGS") {
            bookings_schema()
        } else {
            vec![]
        }
    } else if upper.starts_with("DELETE") && table("BOOKINGS") {
        cancel_schema()
    } else if (upper.starts_with("INSERT") || upper.starts_with("UPDATE")) && table("BOOKINGS") {
        bookings_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CarrelHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CarrelQueryParser;

#[async_trait]
impl QueryParser for CarrelQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CarrelHandler {
    type Statement = String;
    type QueryParser = CarrelQueryParser;

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
        let sql = inline_params(&portal.statement.statement, &portal.parameters);
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split a statement into literal text and `$N` placeholders. Quoted string
/// literals stay text, so `'$1'` is never a placeholder.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let (mut i, mut text_start, mut quoted) = (0, 0, false);
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                quoted = !quoted;
                i += 1;
            }
            b'$' if !quoted => {
                let digits_end = bytes[i + 1..]
                    .iter()
                    .position(|b| !b.is_ascii_digit())
                    .map_or(bytes.len(), |p| i + 1 + p);
                let Ok(n) = sql[i + 1..digits_end].parse::<usize>() else {
                    i += 1;
                    continue;
                };
                if text_start < i {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                }
                pieces.push(Piece::Param(n));
                text_start = digits_end;
                i = digits_end;
            }
            _ => i += 1,
        }
    }
    if text_start < bytes.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass over the
/// statement. Substituted values are never rescanned.
fn inline_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match n.checked_sub(1).and_then(|k| params.get(k)) {
                Some(Some(bytes)) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => out.push_str(&format!("${n}")),
            },
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CarrelFactory {
    handler: Arc<CarrelHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<CarrelAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CarrelFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(CarrelHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                CarrelAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CarrelFactory {
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

/// Serve one client socket until it disconnects. Each connection gets its
/// own handler, so LISTEN state is per connection.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CarrelFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for a rejected operation.
fn sqlstate(rejection: &Rejection) -> &'static str {
    match rejection {
        Rejection::InvalidRange { .. } => "22003",
        Rejection::InvalidPin => "22023",
        Rejection::SeatNotFound(_) | Rejection::NotFound(_) | Rejection::NoActiveBooking(_) => "P0002",
        Rejection::Overlap(_) | Rejection::WalkInOccupied(_) => "23P01",
        Rejection::StudentMismatch | Rejection::WrongPin => "28P01",
        Rejection::AlreadyCancelled(_) | Rejection::SlotStarted { .. } => "55000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Rejected(rejection) => sqlstate(rejection),
        EngineError::AlreadyExists(_) | EngineError::LimitExceeded(_) | EngineError::WalError(_) => "P0001",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
