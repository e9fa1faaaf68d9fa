use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use tracing::debug;

use crate::error::{Result, SumStatsError};
use crate::fields::{BUILTIN_FIELDS, FieldRef};
use crate::metrics::stats::Aggregator;
use crate::model::{FieldChange, Milestone, Ticket, from_micros, to_micros};
use crate::predicate::{AggregateQuery, Condition, Measure, Predicate};

/// Tables holding plain option lists (`name` column only).
const NAMED_VALUE_TABLES: &[&str] = &["component", "version"];

pub struct TicketDb {
    conn: Connection,
}

/// A ticket to seed, keyed by field name. Names outside the built-in
/// column list are stored in `ticket_custom`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTicket {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketHead {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

impl TicketDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ticket (
                id INTEGER PRIMARY KEY,
                time INTEGER NOT NULL,
                changetime INTEGER NOT NULL,
                type TEXT,
                summary TEXT,
                reporter TEXT,
                owner TEXT,
                cc TEXT,
                description TEXT,
                status TEXT,
                priority TEXT,
                severity TEXT,
                milestone TEXT,
                component TEXT,
                version TEXT,
                resolution TEXT,
                keywords TEXT
            );
            CREATE TABLE IF NOT EXISTS ticket_custom (
                ticket INTEGER NOT NULL REFERENCES ticket(id),
                name TEXT NOT NULL,
                value TEXT,
                PRIMARY KEY (ticket, name)
            );
            CREATE TABLE IF NOT EXISTS ticket_change (
                ticket INTEGER NOT NULL REFERENCES ticket(id),
                time INTEGER NOT NULL,
                author TEXT,
                field TEXT NOT NULL,
                oldvalue TEXT,
                newvalue TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ticket_change_lookup ON ticket_change(ticket, field, time);
            CREATE INDEX IF NOT EXISTS idx_ticket_status ON ticket(status);
            CREATE INDEX IF NOT EXISTS idx_ticket_milestone ON ticket(milestone);
            CREATE TABLE IF NOT EXISTS milestone (
                name TEXT PRIMARY KEY,
                due INTEGER,
                completed INTEGER,
                description TEXT
            );
            CREATE TABLE IF NOT EXISTS enum (
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (type, name)
            );
            CREATE TABLE IF NOT EXISTS component (name TEXT PRIMARY KEY);
            CREATE TABLE IF NOT EXISTS version (name TEXT PRIMARY KEY);",
        )?;
        Ok(())
    }

    /// Run `apply` inside one transaction. Nothing it wrote survives an error.
    pub fn transaction<T>(&self, apply: impl FnOnce(&TicketWriter<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = apply(&TicketWriter { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    pub fn enum_values(&self, kind: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM enum WHERE type = ?1 ORDER BY value, name")?;
        let names = stmt
            .query_map(params![kind], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn named_values(&self, table: &str) -> Result<Vec<String>> {
        let table = named_value_table(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT name FROM {table} ORDER BY name"))?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Milestones in schedule order: completed first by completion date, then
    /// open ones by due date, undated last, ties broken by natural name order.
    pub fn milestones(&self, include_completed: bool) -> Result<Vec<Milestone>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, due, completed, description FROM milestone")?;
        let mut milestones = stmt
            .query_map([], |row| {
                Ok(Milestone {
                    name: row.get(0)?,
                    due: optional_time(row.get(1)?),
                    completed: optional_time(row.get(2)?),
                    description: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if !include_completed {
            milestones.retain(|milestone| !milestone.is_completed());
        }
        milestones.sort_by(schedule_order);
        Ok(milestones)
    }

    /// Every ticket with built-in and custom values merged, ordered by id.
    pub fn tickets(&self) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT id, time, changetime, {} FROM ticket ORDER BY id",
            BUILTIN_FIELDS.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut by_id = stmt
            .query_map([], row_to_ticket)?
            .map(|ticket| ticket.map(|ticket| (ticket.id, ticket)))
            .collect::<std::result::Result<BTreeMap<i64, Ticket>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT ticket, name, value FROM ticket_custom WHERE value IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, name, value) = row?;
            if let Some(ticket) = by_id.get_mut(&id) {
                ticket.fields.insert(name, value);
            }
        }

        Ok(by_id.into_values().collect())
    }

    /// The full change log ordered by ticket, field, time and insertion order.
    pub fn changes(&self) -> Result<Vec<FieldChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT ticket, time, author, field, oldvalue, newvalue FROM ticket_change
             ORDER BY ticket, field, time, rowid",
        )?;
        let changes = stmt
            .query_map([], |row| {
                Ok(FieldChange {
                    ticket: row.get(0)?,
                    time: from_micros(row.get(1)?),
                    author: row.get(2)?,
                    field: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    pub fn ticket_ids_in_milestone(&self, milestone: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM ticket WHERE milestone = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![milestone], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Tickets whose current values satisfy every predicate.
    pub fn select_tickets(&self, predicates: &[Predicate]) -> Result<Vec<TicketHead>> {
        let mut sql = SqlBuilder::default();
        for predicate in predicates {
            sql.push_predicate(predicate);
        }
        let text = format!(
            "SELECT t.id, t.time FROM ticket t{}{} ORDER BY t.id",
            sql.joins,
            sql.where_clause()
        );
        debug!(sql = %text, "select tickets");

        let mut stmt = self.conn.prepare(&text)?;
        let heads = stmt
            .query_map(params_from_iter(sql.params.iter()), |row| {
                Ok(TicketHead {
                    id: row.get(0)?,
                    created_at: from_micros(row.get(1)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(heads)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Seeding writes bound to an open transaction, see [`TicketDb::transaction`].
pub struct TicketWriter<'a> {
    conn: &'a Connection,
}

impl TicketWriter<'_> {
    pub fn insert_ticket(&self, ticket: &NewTicket) -> Result<i64> {
        let created = to_micros(ticket.created_at);
        let mut columns = vec!["time", "changetime"];
        let mut values = vec![Value::Integer(created), Value::Integer(created)];
        if let Some(id) = ticket.id {
            columns.push("id");
            values.push(Value::Integer(id));
        }
        for (name, value) in &ticket.fields {
            if let Some(FieldRef::Builtin(column)) = FieldRef::builtin(name) {
                columns.push(column);
                values.push(Value::Text(value.clone()));
            }
        }
        let placeholders = (1..=values.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute(
            &format!(
                "INSERT INTO ticket ({}) VALUES ({placeholders})",
                columns.join(", ")
            ),
            params_from_iter(values),
        )?;
        let id = self.conn.last_insert_rowid();

        for (name, value) in &ticket.fields {
            if FieldRef::builtin(name).is_none() {
                self.conn.execute(
                    "INSERT OR REPLACE INTO ticket_custom (ticket, name, value) VALUES (?1, ?2, ?3)",
                    params![id, name, value],
                )?;
            }
        }

        Ok(id)
    }

    /// Set a field's current value and append the change, with the prior value as `oldvalue`.
    pub fn record_change(
        &self,
        ticket: i64,
        field: &str,
        new_value: Option<&str>,
        at: DateTime<Utc>,
        author: Option<&str>,
    ) -> Result<()> {
        let field_ref = FieldRef::builtin(field).unwrap_or_else(|| FieldRef::custom(field));
        let old_value = current_value_on(self.conn, ticket, &field_ref)?;
        let at_micros = to_micros(at);

        match &field_ref {
            FieldRef::Builtin(column) => {
                self.conn.execute(
                    &format!("UPDATE ticket SET {column} = ?1, changetime = ?2 WHERE id = ?3"),
                    params![new_value, at_micros, ticket],
                )?;
            }
            FieldRef::Custom(name) => {
                self.conn.execute(
                    "INSERT OR REPLACE INTO ticket_custom (ticket, name, value) VALUES (?1, ?2, ?3)",
                    params![ticket, name, new_value],
                )?;
                self.conn.execute(
                    "UPDATE ticket SET changetime = ?1 WHERE id = ?2",
                    params![at_micros, ticket],
                )?;
            }
        }

        self.conn.execute(
            "INSERT INTO ticket_change (ticket, time, author, field, oldvalue, newvalue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![ticket, at_micros, author, field, old_value, new_value],
        )?;
        Ok(())
    }

    pub fn upsert_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO milestone (name, due, completed, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                milestone.name,
                milestone.due.map(to_micros),
                milestone.completed.map(to_micros),
                milestone.description,
            ],
        )?;
        Ok(())
    }

    pub fn add_enum(&self, kind: &str, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO enum (type, name, value)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(value), 0) + 1 FROM enum WHERE type = ?1))",
            params![kind, name],
        )?;
        Ok(())
    }

    pub fn add_named_value(&self, table: &str, name: &str) -> Result<()> {
        let table = named_value_table(table)?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (name) VALUES (?1)"),
            params![name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl TicketDb {
    pub(crate) fn insert_ticket(&self, ticket: &NewTicket) -> Result<i64> {
        self.transaction(|writer| writer.insert_ticket(ticket))
    }

    pub(crate) fn record_change(
        &self,
        ticket: i64,
        field: &str,
        new_value: Option<&str>,
        at: DateTime<Utc>,
        author: Option<&str>,
    ) -> Result<()> {
        self.transaction(|writer| writer.record_change(ticket, field, new_value, at, author))
    }

    pub(crate) fn upsert_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.transaction(|writer| writer.upsert_milestone(milestone))
    }

    pub(crate) fn add_enum(&self, kind: &str, name: &str) -> Result<()> {
        self.transaction(|writer| writer.add_enum(kind, name))
    }

    pub(crate) fn add_named_value(&self, table: &str, name: &str) -> Result<()> {
        self.transaction(|writer| writer.add_named_value(table, name))
    }

    pub(crate) fn ticket(&self, id: i64) -> Result<Ticket> {
        let sql = format!(
            "SELECT id, time, changetime, {} FROM ticket WHERE id = ?1",
            BUILTIN_FIELDS.join(", ")
        );
        let result = self.conn.query_row(&sql, params![id], row_to_ticket);
        let mut ticket = match result {
            Ok(ticket) => ticket,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(SumStatsError::TicketNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };

        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM ticket_custom WHERE ticket = ?1 AND value IS NOT NULL")?;
        let custom = stmt
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
        ticket.fields.extend(custom);
        Ok(ticket)
    }

    pub(crate) fn current_value(&self, ticket: i64, field: &FieldRef) -> Result<Option<String>> {
        current_value_on(&self.conn, ticket, field)
    }
}

impl Aggregator for TicketDb {
    /// Count or sum over the tickets matching the query; 0 when nothing matches.
    fn aggregate(&self, query: &AggregateQuery) -> Result<f64> {
        let mut sql = SqlBuilder::default();
        let measure = match &query.measure {
            Measure::Count => "COUNT(*)".to_string(),
            Measure::Sum(field) => {
                let column = sql.column(field);
                format!("SUM(CAST({column} AS REAL))")
            }
        };
        for predicate in &query.predicates {
            sql.push_predicate(predicate);
        }
        sql.push_ticket_ids(&query.ticket_ids);

        let text = format!(
            "SELECT {measure} FROM ticket t{}{}",
            sql.joins,
            sql.where_clause()
        );
        debug!(sql = %text, params = sql.params.len(), "aggregate");

        let total: Option<f64> =
            self.conn
                .query_row(&text, params_from_iter(sql.params.iter()), |row| row.get(0))?;
        Ok(total.unwrap_or(0.0))
    }
}

fn named_value_table(table: &str) -> Result<&'static str> {
    NAMED_VALUE_TABLES
        .iter()
        .copied()
        .find(|known| *known == table)
        .ok_or_else(|| SumStatsError::Configuration(format!("unknown option table '{table}'")))
}

fn optional_time(micros: Option<i64>) -> Option<DateTime<Utc>> {
    micros.filter(|value| *value != 0).map(from_micros)
}

fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
    let mut fields = BTreeMap::new();
    for (offset, name) in BUILTIN_FIELDS.iter().enumerate() {
        if let Some(value) = row.get::<_, Option<String>>(offset + 3)? {
            fields.insert((*name).to_string(), value);
        }
    }
    Ok(Ticket {
        id: row.get(0)?,
        created_at: from_micros(row.get(1)?),
        changed_at: from_micros(row.get(2)?),
        fields,
    })
}

pub(crate) fn current_value_on(
    conn: &Connection,
    ticket: i64,
    field: &FieldRef,
) -> Result<Option<String>> {
    match field {
        FieldRef::Builtin(column) => {
            let result = conn.query_row(
                &format!("SELECT {column} FROM ticket WHERE id = ?1"),
                params![ticket],
                |row| row.get::<_, Option<String>>(0),
            );
            match result {
                Ok(value) => Ok(value),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(SumStatsError::TicketNotFound(ticket))
                }
                Err(e) => Err(e.into()),
            }
        }
        FieldRef::Custom(name) => {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM ticket WHERE id = ?1)",
                params![ticket],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(SumStatsError::TicketNotFound(ticket));
            }
            let result = conn.query_row(
                "SELECT value FROM ticket_custom WHERE ticket = ?1 AND name = ?2",
                params![ticket, name],
                |row| row.get::<_, Option<String>>(0),
            );
            match result {
                Ok(value) => Ok(value),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn schedule_order(a: &Milestone, b: &Milestone) -> Ordering {
    fn dated(value: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
        (value.is_none(), value)
    }
    dated(a.completed)
        .cmp(&dated(b.completed))
        .then_with(|| dated(a.due).cmp(&dated(b.due)))
        .then_with(|| natural_key(&a.name).cmp(&natural_key(&b.name)))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NameChunk {
    Number(u64),
    Text(String),
}

/// Split a name so embedded numbers compare numerically ("M2" < "M10").
fn natural_key(name: &str) -> Vec<NameChunk> {
    let mut chunks = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();

    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                chunks.push(NameChunk::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                chunks.push(number_chunk(std::mem::take(&mut digits)));
            }
            text.push(ch);
        }
    }
    if !digits.is_empty() {
        chunks.push(number_chunk(digits));
    }
    if !text.is_empty() {
        chunks.push(NameChunk::Text(text));
    }
    chunks
}

fn number_chunk(digits: String) -> NameChunk {
    match digits.parse() {
        Ok(number) => NameChunk::Number(number),
        Err(_) => NameChunk::Text(digits),
    }
}

/// Compiles `Predicate`s into a WHERE clause with numbered parameters.
#[derive(Default)]
struct SqlBuilder {
    joins: String,
    conditions: Vec<String>,
    params: Vec<Value>,
    custom_aliases: BTreeMap<String, String>,
}

impl SqlBuilder {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    fn column(&mut self, field: &FieldRef) -> String {
        match field {
            FieldRef::Builtin(column) => format!("t.{column}"),
            FieldRef::Custom(name) => {
                if let Some(alias) = self.custom_aliases.get(name) {
                    return format!("{alias}.value");
                }
                let alias = format!("c{}", self.custom_aliases.len());
                let placeholder = self.bind(Value::Text(name.clone()));
                let _ = write!(
                    self.joins,
                    " LEFT OUTER JOIN ticket_custom {alias} ON {alias}.ticket = t.id AND {alias}.name = {placeholder}"
                );
                self.custom_aliases.insert(name.clone(), alias.clone());
                format!("{alias}.value")
            }
        }
    }

    fn push_predicate(&mut self, predicate: &Predicate) {
        let column = self.column(&predicate.field);
        let condition = match &predicate.condition {
            Condition::Eq(value) => {
                let placeholder = self.bind(Value::Text(value.clone()));
                format!("{column} = {placeholder}")
            }
            Condition::Ne(value) => {
                let placeholder = self.bind(Value::Text(value.clone()));
                format!("{column} != {placeholder}")
            }
            Condition::In(values) if values.is_empty() => "0".to_string(),
            Condition::In(values) => {
                let placeholders = values
                    .iter()
                    .map(|value| self.bind(Value::Text(value.clone())))
                    .collect::<Vec<_>>();
                format!("{column} IN ({})", placeholders.join(", "))
            }
        };
        self.conditions.push(condition);
    }

    fn push_ticket_ids(&mut self, ids: &[i64]) {
        if ids.is_empty() {
            self.conditions.push("0".to_string());
            return;
        }
        let placeholders = ids
            .iter()
            .map(|id| self.bind(Value::Integer(*id)))
            .collect::<Vec<_>>();
        self.conditions
            .push(format!("t.id IN ({})", placeholders.join(", ")));
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}
