use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::billing::PaymentEdit;
use crate::engine::{NewBooking, NewPromoBooking};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceAction {
    In,
    Out,
}

/// Parsed command from SQL input. Staff attribution is filled in by the
/// connection, never taken from the statement.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        request: NewBooking,
    },
    InsertPromoBooking {
        request: NewPromoBooking,
    },
    StopBooking {
        id: Ulid,
    },
    CancelBooking {
        id: Ulid,
    },
    PurgeBooking {
        id: Ulid,
    },
    InsertPayment {
        booking_id: Ulid,
        edit: PaymentEdit,
    },
    InsertDownPayment {
        booking_id: Ulid,
        amount: Decimal,
    },
    InsertDiscount {
        booking_id: Ulid,
        discount: Discount,
    },
    SetPaid {
        booking_id: Ulid,
        paid: bool,
    },
    RegenerateCode {
        booking_id: Ulid,
    },
    Attendance {
        code: String,
        action: AttendanceAction,
    },
    SelectBookings {
        id: Option<Ulid>,
        active_only: bool,
    },
    SelectAvailability {
        area: Area,
        resources: Vec<ResourceKey>,
        start: Ms,
        end: Ms,
    },
    SelectFreeSlots {
        resource: ResourceKey,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    SelectBlockedTime {
        resources: Vec<ResourceKey>,
        start: Ms,
        end: Ms,
    },
    SelectOccupancy,
    SelectAlerts,
    AckAlert {
        booking_id: Ulid,
        threshold: u32,
    },
}

const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "kind",
    "customer",
    "phone",
    "area",
    "resources",
    "start",
    "end",
    "down_payment",
];
const PROMO_COLUMNS: &[&str] = &[
    "id",
    "customer",
    "phone",
    "area",
    "resources",
    "start",
    "package",
    "price",
    "duration_days",
    "max_attempts",
    "validity_days",
    "down_payment",
];
const STOP_COLUMNS: &[&str] = &["booking_id"];
const PAYMENT_COLUMNS: &[&str] = &["booking_id", "gcash", "cash"];
const DOWN_PAYMENT_COLUMNS: &[&str] = &["booking_id", "amount"];
const DISCOUNT_COLUMNS: &[&str] = &["booking_id", "kind", "value"];
const PAID_COLUMNS: &[&str] = &["booking_id", "paid"];
const CODE_COLUMNS: &[&str] = &["booking_id"];
const ATTENDANCE_COLUMNS: &[&str] = &["code", "action"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name. Without a column list, values are
/// taken positionally in the table's documented order.
struct Row<'a> {
    table: &'static str,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        known: &'static [&'static str],
        columns: &[String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            if values.len() > known.len() {
                return Err(SqlError::WrongArity(table, known.len(), values.len()));
            }
            known.iter().map(|c| c.to_string()).collect()
        } else {
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            if let Some(unknown) = columns.iter().find(|c| !known.contains(&c.as_str())) {
                return Err(SqlError::UnknownColumn(table, unknown.clone()));
            }
            columns.to_vec()
        };
        Ok(Self {
            table,
            values: names.into_iter().zip(values.iter()).collect(),
        })
    }

    /// The value for `column`, treating NULL as absent.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values.get(column).copied().filter(|e| !is_null(e))
    }

    fn req(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();

    match table.as_str() {
        "bookings" => parse_booking(&Row::new("bookings", BOOKING_COLUMNS, &columns, values)?),
        "promo_bookings" => {
            parse_promo_booking(&Row::new("promo_bookings", PROMO_COLUMNS, &columns, values)?)
        }
        "stops" => {
            let row = Row::new("stops", STOP_COLUMNS, &columns, values)?;
            Ok(Command::StopBooking {
                id: parse_ulid(row.req("booking_id")?)?,
            })
        }
        "payments" => {
            let row = Row::new("payments", PAYMENT_COLUMNS, &columns, values)?;
            let gcash = row.get("gcash").map(parse_decimal).transpose()?;
            let cash = row.get("cash").map(parse_decimal).transpose()?;
            let edit = match (gcash, cash) {
                (Some(gcash), Some(cash)) => PaymentEdit::Split { gcash, cash },
                (Some(gcash), None) => PaymentEdit::Gcash(gcash),
                (None, Some(cash)) => PaymentEdit::Cash(cash),
                (None, None) => return Err(SqlError::MissingColumn("payments", "gcash or cash")),
            };
            Ok(Command::InsertPayment {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                edit,
            })
        }
        "down_payments" => {
            let row = Row::new("down_payments", DOWN_PAYMENT_COLUMNS, &columns, values)?;
            Ok(Command::InsertDownPayment {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                amount: parse_decimal(row.req("amount")?)?,
            })
        }
        "discounts" => {
            let row = Row::new("discounts", DISCOUNT_COLUMNS, &columns, values)?;
            let kind_text = parse_text(row.req("kind")?)?;
            let kind = DiscountKind::parse(&kind_text)
                .ok_or_else(|| SqlError::Parse(format!("bad discount kind: {kind_text}")))?;
            let value = match row.get("value") {
                Some(v) => parse_decimal(v)?,
                None if kind == DiscountKind::None => Decimal::ZERO,
                None => return Err(SqlError::MissingColumn("discounts", "value")),
            };
            Ok(Command::InsertDiscount {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                discount: Discount { kind, value },
            })
        }
        "paid_overrides" => {
            let row = Row::new("paid_overrides", PAID_COLUMNS, &columns, values)?;
            Ok(Command::SetPaid {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                paid: parse_bool(row.req("paid")?)?,
            })
        }
        "promo_codes" => {
            let row = Row::new("promo_codes", CODE_COLUMNS, &columns, values)?;
            Ok(Command::RegenerateCode {
                booking_id: parse_ulid(row.req("booking_id")?)?,
            })
        }
        "attendance" => {
            let row = Row::new("attendance", ATTENDANCE_COLUMNS, &columns, values)?;
            let action = parse_text(row.req("action")?)?;
            let action = match action.to_lowercase().replace(['-', '_'], "").as_str() {
                "in" | "checkin" => AttendanceAction::In,
                "out" | "checkout" => AttendanceAction::Out,
                _ => return Err(SqlError::Parse(format!("bad attendance action: {action}"))),
            };
            Ok(Command::Attendance {
                code: parse_text(row.req("code")?)?,
                action,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_customer(row: &Row) -> Result<Customer, SqlError> {
    Ok(Customer {
        name: parse_text(row.req("customer")?)?,
        phone: row.get("phone").map(parse_text).transpose()?,
    })
}

fn parse_area(row: &Row) -> Result<Area, SqlError> {
    match row.get("area") {
        None => Ok(Area::Common),
        Some(expr) => {
            let text = parse_text(expr)?;
            Area::parse(&text).ok_or_else(|| SqlError::Parse(format!("bad area: {text}")))
        }
    }
}

fn parse_row_resources(row: &Row) -> Result<Vec<ResourceKey>, SqlError> {
    row.get("resources")
        .map(parse_key_list)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn parse_down_payment(row: &Row) -> Result<Decimal, SqlError> {
    row.get("down_payment")
        .map(parse_decimal)
        .transpose()
        .map(|d| d.unwrap_or(Decimal::ZERO))
}

fn parse_booking(row: &Row) -> Result<Command, SqlError> {
    let reservation = match row.get("kind") {
        None => false,
        Some(expr) => match parse_text(expr)?.to_lowercase().as_str() {
            "walkin" | "walk-in" | "walk_in" => false,
            "reservation" => true,
            other => return Err(SqlError::Parse(format!("bad booking kind: {other}"))),
        },
    };
    let start = if reservation {
        parse_time(row.req("start")?)?
    } else {
        row.get("start").map(parse_time).transpose()?.unwrap_or(0)
    };
    Ok(Command::InsertBooking {
        request: NewBooking {
            id: parse_ulid(row.req("id")?)?,
            reservation,
            customer: parse_customer(row)?,
            created_by: None,
            area: parse_area(row)?,
            resources: parse_row_resources(row)?,
            start,
            end: row.get("end").map(parse_time).transpose()?,
            down_payment: parse_down_payment(row)?,
        },
    })
}

fn parse_promo_booking(row: &Row) -> Result<Command, SqlError> {
    let duration_days = parse_i64(row.req("duration_days")?)?;
    let validity_days = match row.get("validity_days") {
        Some(expr) => parse_i64(expr)?,
        None => duration_days,
    };
    let max_attempts = match row.get("max_attempts") {
        Some(expr) => parse_u32(expr)?,
        None => 0,
    };
    let terms = PackageTerms {
        name: parse_text(row.req("package")?)?,
        price: parse_decimal(row.req("price")?)?,
        duration_ms: days_to_ms(duration_days)?,
        max_attempts,
        validity_ms: days_to_ms(validity_days)?,
    };
    Ok(Command::InsertPromoBooking {
        request: NewPromoBooking {
            id: parse_ulid(row.req("id")?)?,
            customer: parse_customer(row)?,
            created_by: None,
            area: parse_area(row)?,
            resources: parse_row_resources(row)?,
            start: parse_time(row.req("start")?)?,
            terms,
            down_payment: parse_down_payment(row)?,
        },
    })
}

fn days_to_ms(days: i64) -> Result<Ms, SqlError> {
    days.checked_mul(DAY_MS)
        .ok_or_else(|| SqlError::Parse(format!("{days} days out of range")))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "bookings" => {
            let id = parse_ulid(filters.eq("id")?)?;
            let purge = filters.eq_opt("purge").map(parse_bool).transpose()?.unwrap_or(false);
            Ok(if purge {
                Command::PurgeBooking { id }
            } else {
                Command::CancelBooking { id }
            })
        }
        "alerts" => Ok(Command::AckAlert {
            booking_id: parse_ulid(filters.eq("booking_id")?)?,
            threshold: parse_u32(filters.eq("threshold")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            id: filters.eq_opt("id").map(parse_ulid).transpose()?,
            active_only: filters
                .eq_opt("active")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
        }),
        "availability" => {
            let area = match filters.eq_opt("area") {
                None => Area::Common,
                Some(expr) => {
                    let text = parse_text(expr)?;
                    Area::parse(&text).ok_or_else(|| SqlError::Parse(format!("bad area: {text}")))?
                }
            };
            let resources = match (area, filters.eq_opt("resources")) {
                (_, Some(expr)) => parse_key_list(expr)?,
                (Area::Room, None) => Vec::new(),
                (Area::Common, None) => return Err(SqlError::MissingFilter("resources")),
            };
            Ok(Command::SelectAvailability {
                area,
                resources,
                start: parse_time(filters.ge("start")?)?,
                end: parse_time(filters.le("end")?)?,
            })
        }
        "free_slots" => Ok(Command::SelectFreeSlots {
            resource: parse_text(filters.eq("resource")?)?.trim().to_string(),
            start: parse_time(filters.ge("start")?)?,
            end: parse_time(filters.le("end")?)?,
            min_duration: filters.eq_opt("min_duration").map(parse_i64).transpose()?,
        }),
        "blocked_time" => Ok(Command::SelectBlockedTime {
            resources: parse_key_list(filters.eq("resources")?)?,
            start: parse_time(filters.ge("start")?)?,
            end: parse_time(filters.le("end")?)?,
        }),
        "occupancy" => Ok(Command::SelectOccupancy),
        "alerts" => Ok(Command::SelectAlerts),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column comparisons from a WHERE clause made only of ANDs.
#[derive(Default)]
struct Filters<'a> {
    eq: HashMap<String, &'a Expr>,
    ge: HashMap<String, &'a Expr>,
    le: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                if *op == ast::BinaryOperator::And {
                    self.collect(left)?;
                    return self.collect(right);
                }
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                let target = match op {
                    ast::BinaryOperator::Eq => &mut self.eq,
                    ast::BinaryOperator::GtEq => &mut self.ge,
                    ast::BinaryOperator::LtEq => &mut self.le,
                    _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
                };
                target.insert(col, right.as_ref());
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        }
    }

    fn eq_opt(&self, col: &str) -> Option<&'a Expr> {
        self.eq.get(col).copied()
    }

    fn eq(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq_opt(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ge(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.ge.get(col).copied().ok_or(SqlError::MissingFilter(col))
    }

    fn le(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.le.get(col).copied().ok_or(SqlError::MissingFilter(col))
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// String or bare number, as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

/// A signed literal: the number itself or a unary minus in front of it.
fn signed_text(expr: &Expr) -> Result<String, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(format!("-{}", signed_text(expr)?));
    }
    parse_text(expr)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let s = signed_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = signed_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
}

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_time(expr: &Expr) -> Result<Ms, SqlError> {
    let s = signed_text(expr)?;
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp_millis())
        .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `'1, 2,3'` → `["1", "2", "3"]`.
fn parse_key_list(expr: &Expr) -> Result<Vec<ResourceKey>, SqlError> {
    Ok(parse_text(expr)?
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_reservation_with_named_columns() {
        let sql = format!(
            r#"INSERT INTO bookings (id, kind, customer, phone, resources, start, "end", down_payment)
               VALUES ('{ID}', 'reservation', 'Ana Cruz', '0917', '3, 4', 1748829600000, 1748833200000, 50)"#
        );
        let Command::InsertBooking { request } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBooking");
        };
        assert_eq!(request.id.to_string(), ID);
        assert!(request.reservation);
        assert_eq!(request.customer.name, "Ana Cruz");
        assert_eq!(request.customer.phone.as_deref(), Some("0917"));
        assert_eq!(request.area, Area::Common);
        assert_eq!(request.resources, vec!["3".to_string(), "4".to_string()]);
        assert_eq!(request.start, 1_748_829_600_000);
        assert_eq!(request.end, Some(1_748_833_200_000));
        assert_eq!(request.down_payment, dec!(50));
        assert_eq!(request.created_by, None);
    }

    #[test]
    fn open_walkin_has_no_end() {
        let sql = format!(
            r#"INSERT INTO bookings (id, customer, resources, "end") VALUES ('{ID}', 'Ben', '1', NULL)"#
        );
        let Command::InsertBooking { request } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBooking");
        };
        assert!(!request.reservation);
        assert_eq!(request.end, None);
        assert_eq!(request.down_payment, Decimal::ZERO);
    }

    #[test]
    fn reservation_needs_a_start() {
        let sql = format!(
            r#"INSERT INTO bookings (id, kind, customer, resources) VALUES ('{ID}', 'reservation', 'Ben', '1')"#
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("bookings", "start"))
        ));
    }

    #[test]
    fn positional_values_follow_documented_order() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{ID}', 'walkin', 'Cy', NULL, 'room', NULL, NULL, NULL)"
        );
        let Command::InsertBooking { request } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBooking");
        };
        assert_eq!(request.area, Area::Room);
        assert!(request.resources.is_empty());
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        let sql = format!(
            r#"INSERT INTO bookings (id, kind, customer, resources, start, "end")
               VALUES ('{ID}', 'reservation', 'Di', '2', '2025-06-02T10:00:00+08:00', '2025-06-02T11:00:00+08:00')"#
        );
        let Command::InsertBooking { request } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBooking");
        };
        assert_eq!(request.start, 1_748_829_600_000);
        assert_eq!(request.end, Some(1_748_833_200_000));
    }

    #[test]
    fn parse_promo_booking() {
        let sql = format!(
            "INSERT INTO promo_bookings (id, customer, resources, start, package, price, duration_days, max_attempts)
             VALUES ('{ID}', 'Eve', '5', 1748829600000, 'Monthly', 3000, 30, 20)"
        );
        let Command::InsertPromoBooking { request } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertPromoBooking");
        };
        assert_eq!(request.terms.name, "Monthly");
        assert_eq!(request.terms.price, dec!(3000));
        assert_eq!(request.terms.duration_ms, 30 * DAY_MS);
        assert_eq!(request.terms.validity_ms, 30 * DAY_MS);
        assert_eq!(request.terms.max_attempts, 20);
    }

    #[test]
    fn payment_sides() {
        let one = format!("INSERT INTO payments (booking_id, gcash, cash) VALUES ('{ID}', 15, NULL)");
        assert!(matches!(
            parse_sql(&one).unwrap(),
            Command::InsertPayment { edit: PaymentEdit::Gcash(g), .. } if g == dec!(15)
        ));
        let split = format!("INSERT INTO payments VALUES ('{ID}', 10.50, 29.50)");
        assert!(matches!(
            parse_sql(&split).unwrap(),
            Command::InsertPayment { edit: PaymentEdit::Split { .. }, .. }
        ));
        let none = format!("INSERT INTO payments (booking_id) VALUES ('{ID}')");
        assert!(parse_sql(&none).is_err());
    }

    #[test]
    fn parse_discount_and_overrides() {
        let sql = format!("INSERT INTO discounts (booking_id, kind, value) VALUES ('{ID}', 'percent', 10)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertDiscount { discount: Discount { kind: DiscountKind::Percent, value }, .. } if value == dec!(10)
        ));
        let sql = format!("INSERT INTO paid_overrides (booking_id, paid) VALUES ('{ID}', false)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SetPaid { paid: false, .. }
        ));
        let sql = format!("INSERT INTO down_payments (booking_id, amount) VALUES ('{ID}', -5)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertDownPayment { amount, .. } if amount == dec!(-5)
        ));
    }

    #[test]
    fn parse_attendance() {
        let sql = "INSERT INTO attendance (code, action) VALUES ('abcd2345', 'check-in')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::Attendance {
                code: "abcd2345".into(),
                action: AttendanceAction::In
            }
        );
        let sql = "INSERT INTO attendance (code, action) VALUES ('ABCD2345', 'OUT')";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::Attendance { action: AttendanceAction::Out, .. }
        ));
        assert!(parse_sql("INSERT INTO attendance VALUES ('X', 'sideways')").is_err());
    }

    #[test]
    fn cancel_versus_purge() {
        let cancel = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&cancel).unwrap(), Command::CancelBooking { .. }));
        let purge = format!("DELETE FROM bookings WHERE id = '{ID}' AND purge = true");
        assert!(matches!(parse_sql(&purge).unwrap(), Command::PurgeBooking { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = r#"SELECT * FROM availability WHERE resources = '3' AND start >= 1000 AND "end" <= 2000"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                area: Area::Common,
                resources: vec!["3".into()],
                start: 1000,
                end: 2000,
            }
        );
        let room = r#"SELECT * FROM availability WHERE area = 'room' AND start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(
            parse_sql(room).unwrap(),
            Command::SelectAvailability { area: Area::Room, .. }
        ));
        let missing = r#"SELECT * FROM availability WHERE start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(parse_sql(missing), Err(SqlError::MissingFilter("resources"))));
    }

    #[test]
    fn parse_free_slots_with_min_duration() {
        let sql = r#"SELECT * FROM free_slots WHERE resource = '2' AND start >= 1000 AND "end" <= 9000 AND min_duration = 1800000"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectFreeSlots {
                resource: "2".into(),
                start: 1000,
                end: 9000,
                min_duration: Some(1_800_000),
            }
        );
    }

    #[test]
    fn parse_listing_and_alerts() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { id: None, active_only: false }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE active = true").unwrap(),
            Command::SelectBookings { active_only: true, .. }
        ));
        assert_eq!(parse_sql("SELECT * FROM occupancy").unwrap(), Command::SelectOccupancy);
        assert_eq!(parse_sql("SELECT * FROM alerts").unwrap(), Command::SelectAlerts);
        let ack = format!("DELETE FROM alerts WHERE booking_id = '{ID}' AND threshold = 3");
        assert!(matches!(
            parse_sql(&ack).unwrap(),
            Command::AckAlert { threshold: 3, .. }
        ));
    }

    #[test]
    fn unknown_table_and_column_error() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        let sql = format!("INSERT INTO stops (booking_id, colour) VALUES ('{ID}', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("stops", _))));
        let sql = format!("INSERT INTO stops (booking_id) VALUES ('{ID}', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("stops", 1, 2))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
