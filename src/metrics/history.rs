use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::fields::FieldRef;
use crate::model::{FieldChange, Ticket};

/// Point-in-time field lookups over the ticket change log.
///
/// `value_at` returns the value set by the latest change at or before `at`.
/// When no such change exists it returns the field's original value: the
/// `old_value` of the earliest recorded change, or the current value when the
/// field has never changed. `None` means the field had no value.
pub trait HistoryIndex {
    fn value_at(&self, ticket: i64, field: &FieldRef, at: DateTime<Utc>) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct Step {
    time: DateTime<Utc>,
    old_value: Option<String>,
    new_value: Option<String>,
}

/// In-memory replay of the whole change log, loaded once per request.
///
/// Answers the same questions as a query-backed index with a binary search per
/// lookup instead of a database round trip.
#[derive(Debug, Clone, Default)]
pub struct ReplayIndex {
    steps: HashMap<(i64, String), Vec<Step>>,
    current: HashMap<i64, Ticket>,
}

impl ReplayIndex {
    pub fn new(tickets: Vec<Ticket>, changes: Vec<FieldChange>) -> Self {
        let mut steps = HashMap::<(i64, String), Vec<Step>>::new();
        for change in changes {
            steps
                .entry((change.ticket, change.field))
                .or_default()
                .push(Step {
                    time: change.time,
                    old_value: change.old_value,
                    new_value: change.new_value,
                });
        }
        // Stable sort keeps log order for changes sharing a timestamp.
        for history in steps.values_mut() {
            history.sort_by_key(|step| step.time);
        }

        let current = tickets
            .into_iter()
            .map(|ticket| (ticket.id, ticket))
            .collect();

        Self { steps, current }
    }
}

impl HistoryIndex for ReplayIndex {
    fn value_at(&self, ticket: i64, field: &FieldRef, at: DateTime<Utc>) -> Result<Option<String>> {
        if let Some(history) = self.steps.get(&(ticket, field.name().to_string())) {
            let applied = history.partition_point(|step| step.time <= at);
            return Ok(match applied {
                0 => history[0].old_value.clone(),
                n => history[n - 1].new_value.clone(),
            });
        }

        Ok(self
            .current
            .get(&ticket)
            .and_then(|snapshot| snapshot.get(field.name()))
            .map(String::from))
    }
}
