use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use rust_decimal::Decimal;
use tokio::net::TcpStream;

use crate::alerts::{Alert, AlertEngine};
use crate::auth::DeskbookAuthSource;
use crate::billing::{Outstanding, round_money};
use crate::clock::now_ms;
use crate::engine::{Availability, BookingView, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, AttendanceAction, Command};
use crate::view::OccupancyView;

/// Everything a connection needs, shared across all of them.
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub alerts: Arc<AlertEngine>,
    pub view: Arc<OccupancyView>,
}

pub struct DeskbookHandler {
    state: ServerState,
    query_parser: Arc<DeskbookQueryParser>,
}

impl DeskbookHandler {
    pub fn new(state: ServerState) -> Self {
        Self {
            state,
            query_parser: Arc::new(DeskbookQueryParser),
        }
    }

    /// Login user name, recorded as the staff member behind each change.
    fn staff<C: ClientInfo>(client: &C) -> Option<String> {
        client
            .metadata()
            .get("user")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }

    async fn run(&self, staff: Option<String>, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(staff, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, staff: Option<String>, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.state.engine;
        let now = now_ms();
        match cmd {
            Command::InsertBooking { mut request } => {
                request.created_by = staff;
                engine.create_booking(request, now).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertPromoBooking { mut request } => {
                request.created_by = staff;
                engine
                    .create_promo_booking(request, now)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::StopBooking { id } => {
                engine.stop_booking(id, now).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id, now).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::PurgeBooking { id } => {
                engine
                    .purge_booking(id, staff.as_deref())
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertPayment { booking_id, edit } => {
                engine
                    .record_payment(booking_id, edit)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertDownPayment { booking_id, amount } => {
                engine
                    .set_down_payment(booking_id, amount)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertDiscount {
                booking_id,
                discount,
            } => {
                engine
                    .apply_discount(booking_id, discount)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetPaid { booking_id, paid } => {
                engine.set_paid(booking_id, paid).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::RegenerateCode { booking_id } => {
                let code = engine
                    .regenerate_code(booking_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(promo_code_schema());
                let row = encode_promo_code(&schema, &code);
                Ok(query_response(schema, vec![row]))
            }
            Command::Attendance { code, action } => {
                let entry = match action {
                    AttendanceAction::In => engine.check_in(&code, now).await,
                    AttendanceAction::Out => engine.check_out(&code, now).await,
                }
                .map_err(engine_err)?;
                let left = engine
                    .promo_code(&entry.code)
                    .map(|c| i64::from(c.attempts_left));
                let schema = Arc::new(attendance_schema());
                let row = encode_attendance(&schema, &entry, left);
                Ok(query_response(schema, vec![row]))
            }
            Command::SelectBookings { id, active_only } => {
                let views = match id {
                    Some(id) => vec![engine.booking_view(id, now).await.map_err(engine_err)?],
                    None => engine
                        .list_bookings(now, !active_only)
                        .await
                        .into_iter()
                        .filter(|v| !active_only || v.status != Status::Finished)
                        .collect(),
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<DataRow>> =
                    views.iter().map(|v| encode_booking(&schema, v)).collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAvailability {
                area,
                resources,
                start,
                end,
            } => {
                let verdict = engine
                    .is_available(area, &resources, Span::new(start, end), None)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let row = encode_availability(&schema, &verdict);
                Ok(query_response(schema, vec![row]))
            }
            Command::SelectFreeSlots {
                resource,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .free_slots(&resource, Span::new(start, end), min_duration.unwrap_or(0))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_slots_schema());
                let rows: Vec<PgWireResult<DataRow>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&resource)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectBlockedTime {
                resources,
                start,
                end,
            } => {
                let records = engine
                    .query_overlaps(&resources, Span::new(start, end))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(blocked_time_schema());
                let rows: Vec<PgWireResult<DataRow>> = records
                    .iter()
                    .map(|info| encode_block(&schema, None, info))
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectOccupancy => {
                let view = &self.state.view;
                if view.revision() < engine.revision() {
                    view.refresh(&engine.occupancy(now).await);
                }
                let revision = view.revision() as i64;
                let schema = Arc::new(occupancy_schema());
                let rows: Vec<PgWireResult<DataRow>> = view
                    .occupied(now)
                    .iter()
                    .map(|info| encode_block(&schema, Some(revision), info))
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAlerts => {
                let schema = Arc::new(alerts_schema());
                let rows: Vec<PgWireResult<DataRow>> = self
                    .state
                    .alerts
                    .pending()
                    .iter()
                    .map(|a| encode_alert(&schema, a))
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::AckAlert {
                booking_id,
                threshold,
            } => {
                let cleared = self.state.alerts.ack(booking_id, threshold);
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(cleared)),
                ))
            }
        }
    }
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text(name: &str) -> FieldInfo {
    field(name, Type::VARCHAR)
}

fn int(name: &str) -> FieldInfo {
    field(name, Type::INT8)
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("kind"),
        text("customer"),
        text("phone"),
        text("area"),
        text("resources"),
        int("start"),
        int("end"),
        text("status"),
        int("elapsed_ms"),
        text("base_cost"),
        text("discount_kind"),
        text("discount_value"),
        text("discount_amount"),
        text("discounted_cost"),
        text("down_payment"),
        text("gcash"),
        text("cash"),
        text("balance"),
        text("change"),
        field("paid", Type::BOOL),
        text("package"),
        text("promo_code"),
        text("created_by"),
        int("cancelled_at"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("available", Type::BOOL),
        text("resource"),
        int("occupied_start"),
        int("occupied_end"),
        text("booking_id"),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![text("resource"), int("start"), int("end")]
}

fn blocked_time_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("resource"),
        int("start"),
        int("end"),
        text("source"),
        text("note"),
        text("booking_id"),
    ]
}

/// `display` is false for reservation auto-blocks and temp mirrors, which a
/// board may skip. Enforcement is unaffected.
fn occupancy_schema() -> Vec<FieldInfo> {
    let mut schema = vec![int("revision")];
    schema.extend(blocked_time_schema());
    schema.push(field("display", Type::BOOL));
    schema
}

fn alerts_schema() -> Vec<FieldInfo> {
    vec![
        text("booking_id"),
        int("threshold"),
        text("customer"),
        text("resources"),
        int("end"),
        int("raised_at"),
    ]
}

fn promo_code_schema() -> Vec<FieldInfo> {
    vec![
        text("booking_id"),
        text("code"),
        int("max_attempts"),
        int("attempts_left"),
        int("validity_end_at"),
    ]
}

fn attendance_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("booking_id"),
        text("code"),
        text("local_day"),
        int("in_at"),
        int("out_at"),
        int("attempts_left"),
    ]
}

/// Result columns a statement will produce, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let after = |keyword: &str| {
        words
            .windows(2)
            .find(|w| w[0] == keyword)
            .map(|w| w[1].trim_matches('"'))
    };
    match words.first().copied() {
        Some("select") => match after("from") {
            Some("bookings") => bookings_schema(),
            Some("availability") => availability_schema(),
            Some("free_slots") => free_slots_schema(),
            Some("blocked_time") => blocked_time_schema(),
            Some("occupancy") => occupancy_schema(),
            Some("alerts") => alerts_schema(),
            _ => vec![],
        },
        Some("insert") => match after("into") {
            Some("promo_codes") => promo_code_schema(),
            Some("attendance") => attendance_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

/// Amounts always carry two decimals on the wire.
fn money(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, view: &BookingView) -> PgWireResult<DataRow> {
    let b = &view.booking;
    let s = &view.settlement;
    let (balance, change) = match s.outstanding {
        Outstanding::Balance(d) => (d, Decimal::ZERO),
        Outstanding::Change(d) => (Decimal::ZERO, d),
    };
    let package = match &b.kind {
        BookingKind::Promo(terms) => Some(terms.name.clone()),
        _ => None,
    };
    let end = (!b.open).then_some(b.end);

    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.kind.as_str().to_string())?;
    encoder.encode_field(&b.customer.name)?;
    encoder.encode_field(&b.customer.phone)?;
    encoder.encode_field(&b.area.as_str().to_string())?;
    encoder.encode_field(&b.resources.join(","))?;
    encoder.encode_field(&b.start)?;
    encoder.encode_field(&end)?;
    encoder.encode_field(&view.status.as_str().to_string())?;
    encoder.encode_field(&view.elapsed_ms)?;
    encoder.encode_field(&money(b.bill.base_cost))?;
    encoder.encode_field(&b.bill.discount.kind.as_str().to_string())?;
    encoder.encode_field(&money(b.bill.discount.value))?;
    encoder.encode_field(&money(s.discount_amount))?;
    encoder.encode_field(&money(s.discounted_cost))?;
    encoder.encode_field(&money(b.bill.down_payment))?;
    encoder.encode_field(&money(b.bill.gcash))?;
    encoder.encode_field(&money(b.bill.cash))?;
    encoder.encode_field(&money(balance))?;
    encoder.encode_field(&money(change))?;
    encoder.encode_field(&b.bill.paid)?;
    encoder.encode_field(&package)?;
    encoder.encode_field(&b.promo_code)?;
    encoder.encode_field(&b.created_by)?;
    encoder.encode_field(&b.cancelled_at)?;
    Ok(encoder.take_row())
}

fn encode_availability(
    schema: &Arc<Vec<FieldInfo>>,
    verdict: &Availability,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    match verdict {
        Availability::Ok => {
            encoder.encode_field(&true)?;
            encoder.encode_field(&None::<String>)?;
            encoder.encode_field(&None::<i64>)?;
            encoder.encode_field(&None::<i64>)?;
            encoder.encode_field(&None::<String>)?;
        }
        Availability::Conflict(reason) => {
            encoder.encode_field(&false)?;
            encoder.encode_field(&reason.resource)?;
            encoder.encode_field(&reason.occupied.start)?;
            encoder.encode_field(&reason.occupied.end)?;
            encoder.encode_field(&reason.booking_id.map(|id| id.to_string()))?;
        }
    }
    Ok(encoder.take_row())
}

fn encode_block(
    schema: &Arc<Vec<FieldInfo>>,
    revision: Option<i64>,
    info: &BlockInfo,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    if let Some(revision) = revision {
        encoder.encode_field(&revision)?;
    }
    encoder.encode_field(&info.id.to_string())?;
    encoder.encode_field(&info.resource)?;
    encoder.encode_field(&info.start)?;
    encoder.encode_field(&info.end)?;
    encoder.encode_field(&info.source.as_str().to_string())?;
    encoder.encode_field(&info.note.as_str().to_string())?;
    encoder.encode_field(&info.booking_id.map(|id| id.to_string()))?;
    if revision.is_some() {
        encoder.encode_field(&!info.note.hidden_from_display())?;
    }
    Ok(encoder.take_row())
}

fn encode_alert(schema: &Arc<Vec<FieldInfo>>, alert: &Alert) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&alert.booking_id.to_string())?;
    encoder.encode_field(&i64::from(alert.threshold))?;
    encoder.encode_field(&alert.customer)?;
    encoder.encode_field(&alert.resources.join(","))?;
    encoder.encode_field(&alert.end)?;
    encoder.encode_field(&alert.raised_at)?;
    Ok(encoder.take_row())
}

fn encode_promo_code(schema: &Arc<Vec<FieldInfo>>, code: &PromoCode) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&code.booking_id.to_string())?;
    encoder.encode_field(&code.code)?;
    encoder.encode_field(&i64::from(code.max_attempts))?;
    encoder.encode_field(&i64::from(code.attempts_left))?;
    encoder.encode_field(&code.validity_end_at)?;
    Ok(encoder.take_row())
}

fn encode_attendance(
    schema: &Arc<Vec<FieldInfo>>,
    entry: &AttendanceEntry,
    attempts_left: Option<i64>,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&entry.id.to_string())?;
    encoder.encode_field(&entry.booking_id.to_string())?;
    encoder.encode_field(&entry.code)?;
    encoder.encode_field(&entry.local_day.to_string())?;
    encoder.encode_field(&entry.in_at)?;
    encoder.encode_field(&entry.out_at)?;
    encoder.encode_field(&attempts_left)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for DeskbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let staff = Self::staff(client);
        Ok(vec![self.run(staff, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct DeskbookQueryParser;

#[async_trait]
impl QueryParser for DeskbookQueryParser {
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
impl ExtendedQueryHandler for DeskbookHandler {
    type Statement = String;
    type QueryParser = DeskbookQueryParser;

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
        let staff = Self::staff(client);
        let sql = substitute_params(portal);
        self.run(staff, &sql).await
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never eats the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| {
            p.as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        })
        .collect();
    bind_text_params(&portal.statement.statement, &params)
}

fn bind_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct DeskbookFactory {
    handler: Arc<DeskbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<DeskbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl DeskbookFactory {
    pub fn new(state: ServerState, password: String) -> Self {
        let auth_source = DeskbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(DeskbookHandler::new(state)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for DeskbookFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    state: ServerState,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = DeskbookFactory::new(state, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Promo(_) => "P0002",
        EngineError::InconsistentState { .. } => "XX001",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    match &e {
        EngineError::InconsistentState { .. } | EngineError::WalError(_) => {
            tracing::error!("{e}");
        }
        _ => tracing::debug!("{e}"),
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.user_message(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
