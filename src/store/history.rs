use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::fields::FieldRef;
use crate::metrics::history::HistoryIndex;
use crate::model::to_micros;
use crate::store::db::{TicketDb, current_value_on};

/// Answers point-in-time lookups with "latest change at or before T" queries
/// against `ticket_change`, one indexed lookup per call.
pub struct SqliteHistory<'a> {
    db: &'a TicketDb,
}

impl<'a> SqliteHistory<'a> {
    pub fn new(db: &'a TicketDb) -> Self {
        Self { db }
    }
}

impl HistoryIndex for SqliteHistory<'_> {
    fn value_at(&self, ticket: i64, field: &FieldRef, at: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.db.conn();

        let latest: Option<Option<String>> = conn
            .prepare_cached(
                "SELECT newvalue FROM ticket_change
                 WHERE ticket = ?1 AND field = ?2 AND time <= ?3
                 ORDER BY time DESC, rowid DESC LIMIT 1",
            )?
            .query_row(params![ticket, field.name(), to_micros(at)], |row| row.get(0))
            .optional()?;
        if let Some(value) = latest {
            return Ok(value);
        }

        let original: Option<Option<String>> = conn
            .prepare_cached(
                "SELECT oldvalue FROM ticket_change
                 WHERE ticket = ?1 AND field = ?2
                 ORDER BY time ASC, rowid ASC LIMIT 1",
            )?
            .query_row(params![ticket, field.name()], |row| row.get(0))
            .optional()?;
        if let Some(value) = original {
            return Ok(value);
        }

        current_value_on(conn, ticket, field)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::store::db::NewTicket;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 1, day, hour, 0, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn looks_up_latest_value_at_or_before_instant() {
        let db = TicketDb::open_memory().unwrap();
        let id = db
            .insert_ticket(&NewTicket {
                id: None,
                created_at: ts(1, 9),
                fields: BTreeMap::from([("status".into(), "new".into())]),
            })
            .unwrap();
        db.record_change(id, "status", Some("accepted"), ts(3, 9), None)
            .unwrap();
        db.record_change(id, "status", Some("closed"), ts(5, 9), None)
            .unwrap();

        let history = SqliteHistory::new(&db);
        let status = FieldRef::Builtin("status");
        assert_eq!(history.value_at(id, &status, ts(2, 0)).unwrap().as_deref(), Some("new"));
        assert_eq!(
            history.value_at(id, &status, ts(3, 9)).unwrap().as_deref(),
            Some("accepted")
        );
        assert_eq!(
            history.value_at(id, &status, ts(9, 0)).unwrap().as_deref(),
            Some("closed")
        );
    }

    #[test]
    fn falls_back_to_current_value_without_history() {
        let db = TicketDb::open_memory().unwrap();
        let id = db
            .insert_ticket(&NewTicket {
                id: None,
                created_at: ts(1, 9),
                fields: BTreeMap::from([("hours".into(), "4".into())]),
            })
            .unwrap();

        let history = SqliteHistory::new(&db);
        assert_eq!(
            history
                .value_at(id, &FieldRef::custom("hours"), ts(2, 0))
                .unwrap()
                .as_deref(),
            Some("4")
        );
        assert_eq!(
            history
                .value_at(id, &FieldRef::Builtin("resolution"), ts(2, 0))
                .unwrap(),
            None
        );
    }
}
