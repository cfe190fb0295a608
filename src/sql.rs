use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{self, Slot, SLOTS_PER_DAY};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSeats {
        seats: Vec<(String, PhysicalStatus)>,
    },
    UpdateSeatStatus {
        seat_id: String,
        physical_status: PhysicalStatus,
    },
    SelectSeats {
        seat_id: Option<String>,
        now_slot: Option<Slot>,
    },
    InsertBooking(BookingRequest),
    SelectBookings {
        student_id: Option<String>,
    },
    DeleteBooking(CancelRequest),
    CheckIn {
        seat_id: String,
        pin_code: String,
        now_slot: Option<Slot>,
    },
    SelectAvailability {
        seat_id: Option<String>,
        start: i64,
        end: i64,
        now_slot: Option<Slot>,
    },
    SelectFreeSlots {
        seat_id: String,
        now_slot: Option<Slot>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

const SEAT_COLUMNS: [&str; 2] = ["seat_id", "physical_status"];
const BOOKING_COLUMNS: [&str; 5] = ["seat_id", "student_id", "start_slot", "end_slot", "pin_code"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        return Ok(Command::Listen {
            channel: channel_arg(&trimmed[7..]),
        });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        return Ok(Command::Unlisten {
            channel: channel_arg(&trimmed[9..]),
        });
    }

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
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn channel_arg(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "seats" => {
            let mut seats = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let values = bind_columns(&columns, row, &SEAT_COLUMNS)?;
                let seat_id = match values[0] {
                    Some(expr) => parse_string(expr).map_err(|e| e.in_row(i))?,
                    None => return Err(SqlError::WrongArity("seats", 1, row.len())),
                };
                let physical_status = match values[1] {
                    Some(expr) => parse_physical_status(expr).map_err(|e| e.in_row(i))?,
                    None => PhysicalStatus::Unknown,
                };
                seats.push((seat_id, physical_status));
            }
            Ok(Command::InsertSeats { seats })
        }
        "bookings" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("one booking per INSERT".into()));
            }
            let row = &rows[0];
            let values = bind_columns(&columns, row, &BOOKING_COLUMNS)?;
            let mut required = values.into_iter().zip(BOOKING_COLUMNS);
            let mut next = || match required.next() {
                Some((Some(expr), _)) => Ok(expr),
                Some((None, name)) => Err(SqlError::MissingColumn(name)),
                None => Err(SqlError::WrongArity("bookings", BOOKING_COLUMNS.len(), row.len())),
            };
            Ok(Command::InsertBooking(BookingRequest {
                seat_id: parse_string(next()?)?,
                student_id: parse_string(next()?)?,
                start_slot: parse_slot_bound(next()?)?,
                end_slot: parse_slot_bound(next()?)?,
                pin_code: parse_string(next()?)?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Order a VALUES row as `expected`. Without a column list the row is positional.
fn bind_columns<'a>(columns: &[String], row: &'a [Expr], expected: &[&str]) -> Result<Vec<Option<&'a Expr>>, SqlError> {
    if columns.is_empty() {
        return Ok((0..expected.len()).map(|i| row.get(i)).collect());
    }
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity("VALUES row", columns.len(), row.len()));
    }
    if let Some(unknown) = columns.iter().find(|c| !expected.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(unknown.clone()));
    }
    Ok(expected
        .iter()
        .map(|name| columns.iter().position(|c| c == name).map(|i| &row[i]))
        .collect())
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let filters = collect_filters(selection)?;
    let assigned = |column: &str| {
        assignments.iter().find_map(|a| match &a.target {
            AssignmentTarget::ColumnName(name) if object_name_last(name).as_deref() == Some(column) => Some(&a.value),
            _ => None,
        })
    };

    match table.as_str() {
        "seats" => {
            let value = assigned("physical_status").ok_or(SqlError::MissingColumn("physical_status"))?;
            Ok(Command::UpdateSeatStatus {
                seat_id: parse_string(filters.required("seat_id")?)?,
                physical_status: parse_physical_status(value)?,
            })
        }
        "bookings" => {
            let value = assigned("checked_in").ok_or(SqlError::MissingColumn("checked_in"))?;
            if !parse_bool(value)? {
                return Err(SqlError::Unsupported("checked_in can only be set to true".into()));
            }
            Ok(Command::CheckIn {
                seat_id: parse_string(filters.required("seat_id")?)?,
                pin_code: parse_string(filters.required("pin_code")?)?,
                now_slot: filters.now_slot()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_filters(delete.selection.as_ref())?;
    Ok(Command::DeleteBooking(CancelRequest {
        booking_id: parse_ulid(filters.required("booking_id")?)?,
        student_id: parse_string(filters.required("student_id")?)?,
        pin_code: parse_string(filters.required("pin_code")?)?,
    }))
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
    let filters = collect_filters(select.selection.as_ref())?;
    let optional_string = |column| filters.eq(column).map(parse_string).transpose();

    match table.as_str() {
        "seats" => Ok(Command::SelectSeats {
            seat_id: optional_string("seat_id")?,
            now_slot: filters.now_slot()?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            student_id: optional_string("student_id")?,
        }),
        "availability" => {
            let start = filters
                .get("start_slot", &[BinaryOperator::GtEq, BinaryOperator::Eq])
                .ok_or(SqlError::MissingFilter("start_slot"))?;
            let end = filters
                .get("end_slot", &[BinaryOperator::LtEq, BinaryOperator::Eq])
                .ok_or(SqlError::MissingFilter("end_slot"))?;
            Ok(Command::SelectAvailability {
                seat_id: optional_string("seat_id")?,
                start: parse_slot_bound(start)?,
                end: parse_slot_bound(end)?,
                now_slot: filters.now_slot()?,
            })
        }
        "free_slots" => Ok(Command::SelectFreeSlots {
            seat_id: parse_string(filters.required("seat_id")?)?,
            now_slot: filters.now_slot()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Conjunction of `column <op> value` comparisons.
struct Filters<'a> {
    terms: Vec<(String, &'a BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn get(&self, column: &str, ops: &[BinaryOperator]) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, op, _)| c == column && ops.contains(op))
            .map(|(_, _, value)| *value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.get(column, &[BinaryOperator::Eq])
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    /// Optional `now_slot = n` override of the wall clock.
    fn now_slot(&self) -> Result<Option<Slot>, SqlError> {
        let Some(expr) = self.eq("now_slot") else {
            return Ok(None);
        };
        let slot = parse_slot_bound(expr)?;
        if (0..SLOTS_PER_DAY as i64).contains(&slot) {
            Ok(Some(slot as Slot))
        } else {
            Err(SqlError::Parse(format!("now_slot {slot} outside 0..48")))
        }
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters<'_>, SqlError> {
    let mut filters = Filters { terms: Vec::new() };
    if let Some(expr) = selection {
        collect_terms(expr, &mut filters.terms)?;
    }
    Ok(filters)
}

fn collect_terms<'a>(expr: &'a Expr, terms: &mut Vec<(String, &'a BinaryOperator, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, terms)?;
            collect_terms(right, terms)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            terms.push((column, op, right));
            Ok(())
        }
        Expr::Nested(inner) => collect_terms(inner, terms),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => Err(SqlError::Parse("empty VALUES".into())),
        SetExpr::Values(values) => Ok(&values.rows),
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

/// Text value. Bare numbers are accepted so `student_id = 1234001` works.
fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad booking id {s:?}: {e}")))
}

/// Slot boundary: an integer, or an `'HH:MM'` label on a half hour. Range is
/// not checked here so the engine can report it as a booking rejection.
fn parse_slot_bound(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_slot_bound(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) => s.parse().map_err(|e| SqlError::Parse(format!("bad slot {s}: {e}"))),
        Some(Value::SingleQuotedString(s)) if s.contains(':') => calendar::parse_label(s)
            .map(i64::from)
            .ok_or_else(|| SqlError::Parse(format!("bad slot label {s:?}"))),
        Some(Value::SingleQuotedString(s)) => s.parse().map_err(|e| SqlError::Parse(format!("bad slot {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected slot, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_physical_status(expr: &Expr) -> Result<PhysicalStatus, SqlError> {
    let s = parse_string(expr)?;
    PhysicalStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad physical_status {s:?}")))
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl SqlError {
    fn in_row(self, row: usize) -> Self {
        match self {
            SqlError::Parse(s) => SqlError::Parse(format!("row {row}: {s}")),
            other => other,
        }
    }
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
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKING_ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn insert_seats_batch() {
        let cmd = parse_sql("INSERT INTO seats (seat_id, physical_status) VALUES ('A1', 'occupied'), ('A2', 'free')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertSeats {
                seats: vec![
                    ("A1".into(), PhysicalStatus::Occupied),
                    ("A2".into(), PhysicalStatus::Empty),
                ]
            }
        );
    }

    #[test]
    fn insert_seat_defaults_to_unknown_status() {
        let cmd = parse_sql("INSERT INTO seats (seat_id) VALUES ('B6')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertSeats {
                seats: vec![("B6".into(), PhysicalStatus::Unknown)]
            }
        );
        let positional = parse_sql("INSERT INTO seats VALUES ('B6')").unwrap();
        assert_eq!(positional, cmd);
    }

    #[test]
    fn insert_seat_bad_status() {
        let err = parse_sql("INSERT INTO seats (seat_id, physical_status) VALUES ('A1', 'maybe')").unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn insert_booking_positional() {
        let sql = "INSERT INTO bookings VALUES ('A1', 's1234001', 20, 24, '0420')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking(BookingRequest {
                seat_id: "A1".into(),
                student_id: "s1234001".into(),
                start_slot: 20,
                end_slot: 24,
                pin_code: "0420".into(),
            })
        );
    }

    #[test]
    fn insert_booking_named_columns_and_labels() {
        let sql = "INSERT INTO bookings (pin_code, end_slot, start_slot, student_id, seat_id) \
                   VALUES ('1234', '12:00', '10:00', 's1', 'A2')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.seat_id, "A2");
                assert_eq!((req.start_slot, req.end_slot), (20, 24));
                assert_eq!(req.pin_code, "1234");
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn insert_booking_keeps_out_of_range_bounds() {
        let sql = "INSERT INTO bookings VALUES ('A1', 's1', -1, 50, '1234')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking(req) => assert_eq!((req.start_slot, req.end_slot), (-1, 50)),
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn insert_booking_missing_column() {
        let err = parse_sql("INSERT INTO bookings (seat_id, student_id, start_slot, end_slot) VALUES ('A1', 's1', 1, 2)")
            .unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("pin_code")));
        let err = parse_sql("INSERT INTO bookings (seat_id, colour) VALUES ('A1', 'red')").unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn(_)));
    }

    #[test]
    fn update_seat_status() {
        let cmd = parse_sql("UPDATE seats SET physical_status = 'occupied' WHERE seat_id = 'A1'").unwrap();
        assert_eq!(
            cmd,
            Command::UpdateSeatStatus {
                seat_id: "A1".into(),
                physical_status: PhysicalStatus::Occupied,
            }
        );
        assert!(matches!(
            parse_sql("UPDATE seats SET physical_status = 'empty'").unwrap_err(),
            SqlError::MissingFilter("seat_id")
        ));
    }

    #[test]
    fn check_in_update() {
        let cmd = parse_sql("UPDATE bookings SET checked_in = true WHERE seat_id = 'A1' AND pin_code = '0420' AND now_slot = 21")
            .unwrap();
        assert_eq!(
            cmd,
            Command::CheckIn {
                seat_id: "A1".into(),
                pin_code: "0420".into(),
                now_slot: Some(21),
            }
        );
        assert!(parse_sql("UPDATE bookings SET checked_in = false WHERE seat_id = 'A1' AND pin_code = '0420'").is_err());
    }

    #[test]
    fn select_seats() {
        assert_eq!(
            parse_sql("SELECT * FROM seats").unwrap(),
            Command::SelectSeats {
                seat_id: None,
                now_slot: None
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM seats WHERE seat_id = 'A1' AND now_slot = '10:30'").unwrap(),
            Command::SelectSeats {
                seat_id: Some("A1".into()),
                now_slot: Some(21)
            }
        );
    }

    #[test]
    fn now_slot_must_be_a_real_slot() {
        assert!(parse_sql("SELECT * FROM seats WHERE now_slot = 48").is_err());
        assert!(parse_sql("SELECT * FROM seats WHERE now_slot = -1").is_err());
        assert!(parse_sql("SELECT * FROM seats WHERE now_slot = 47").is_ok());
    }

    #[test]
    fn select_bookings() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE student_id = 's1234001'").unwrap(),
            Command::SelectBookings {
                student_id: Some("s1234001".into())
            }
        );
        assert_eq!(
            parse_sql("SELECT booking_id FROM bookings").unwrap(),
            Command::SelectBookings { student_id: None }
        );
    }

    #[test]
    fn delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE booking_id = '{BOOKING_ID}' AND student_id = 's1' AND pin_code = '0420'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteBooking(req) => {
                assert_eq!(req.booking_id.to_string(), BOOKING_ID);
                assert_eq!(req.student_id, "s1");
                assert_eq!(req.pin_code, "0420");
            }
            other => panic!("expected DeleteBooking, got {other:?}"),
        }
    }

    #[test]
    fn delete_booking_requires_all_filters() {
        let sql = format!("DELETE FROM bookings WHERE booking_id = '{BOOKING_ID}' AND student_id = 's1'");
        assert!(matches!(parse_sql(&sql).unwrap_err(), SqlError::MissingFilter("pin_code")));
        assert!(matches!(
            parse_sql("DELETE FROM bookings WHERE booking_id = 'nope' AND student_id = 's1' AND pin_code = '1'").unwrap_err(),
            SqlError::Parse(_)
        ));
        assert!(matches!(
            parse_sql("DELETE FROM seats WHERE seat_id = 'A1'").unwrap_err(),
            SqlError::UnknownTable(_)
        ));
    }

    #[test]
    fn select_availability() {
        let sql = "SELECT * FROM availability WHERE start_slot >= 20 AND end_slot <= '13:00' AND seat_id = 'A1' AND now_slot = 18";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                seat_id: Some("A1".into()),
                start: 20,
                end: 26,
                now_slot: Some(18),
            }
        );
    }

    #[test]
    fn select_availability_requires_range() {
        let err = parse_sql("SELECT * FROM availability WHERE start_slot >= 20").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("end_slot")));
    }

    #[test]
    fn select_free_slots() {
        assert_eq!(
            parse_sql("SELECT * FROM free_slots WHERE (seat_id = 'A1')").unwrap(),
            Command::SelectFreeSlots {
                seat_id: "A1".into(),
                now_slot: None
            }
        );
        assert!(parse_sql("SELECT * FROM free_slots").is_err());
    }

    #[test]
    fn listen_and_unlisten() {
        assert_eq!(
            parse_sql("LISTEN seat_A1;").unwrap(),
            Command::Listen {
                channel: "seat_A1".into()
            }
        );
        assert_eq!(
            parse_sql("unlisten \"seat_A1\"").unwrap(),
            Command::Unlisten {
                channel: "seat_A1".into()
            }
        );
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::UnlistenAll);
    }

    #[test]
    fn unknown_table_and_statement() {
        assert!(matches!(parse_sql("SELECT * FROM rooms").unwrap_err(), SqlError::UnknownTable(_)));
        assert!(matches!(parse_sql("DROP TABLE seats").unwrap_err(), SqlError::Unsupported(_)));
        assert!(matches!(parse_sql("SELEC nonsense").unwrap_err(), SqlError::Parse(_)));
    }
}
