use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::fields::FieldRef;
use crate::metrics::history::{HistoryIndex, ReplayIndex};
use crate::metrics::schedule::{DateRange, resolve_range, select_milestone};
use crate::model::{CLOSED, FIXED};
use crate::predicate::filter_predicates;
use crate::store::db::TicketHead;
use crate::store::history::SqliteHistory;
use crate::store::repo::Repo;

const MILESTONE: FieldRef = FieldRef::Builtin("milestone");
const STATUS: FieldRef = FieldRef::Builtin("status");
const RESOLUTION: FieldRef = FieldRef::Builtin("resolution");

/// Aggregates for one calendar day. `total == done + todo` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DayBucket {
    pub day: NaiveDate,
    pub total: f64,
    pub done: f64,
    pub todo: f64,
}

impl DayBucket {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            total: 0.0,
            done: 0.0,
            todo: 0.0,
        }
    }

    fn add(&mut self, amount: f64, closed: bool) {
        self.total += amount;
        if closed {
            self.done += amount;
        } else {
            self.todo += amount;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurndownReport {
    pub milestone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum_field: Option<String>,
    pub range: DateRange,
    pub days: Vec<DayBucket>,
}

/// How point-in-time values are looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStrategy {
    /// One indexed query per lookup.
    #[default]
    Query,
    /// Load the change log once and binary-search it in memory.
    Replay,
}

/// Resolve the milestone and its date range, then reconstruct every day.
/// `milestone: None` selects the current milestone.
pub fn burndown_report(
    repo: &Repo,
    milestone: Option<&str>,
    now: DateTime<Utc>,
    strategy: HistoryStrategy,
) -> Result<BurndownReport> {
    let milestones = repo.db.milestones(true)?;
    let target = select_milestone(&milestones, milestone)?;
    let range = resolve_range(&milestones, &target, now)?;

    let catalog = repo.catalog()?;
    let sum_field = repo
        .config
        .sumstats
        .sum_field()
        .map(|name| catalog.resolve(name).map(|meta| meta.field.clone()))
        .transpose()?;
    let filters = filter_predicates(&repo.config.sumstats.filter, &catalog)?;
    let tickets = repo.db.select_tickets(&filters)?;

    let days = match strategy {
        HistoryStrategy::Query => reconstruct(
            &SqliteHistory::new(&repo.db),
            &tickets,
            &target.name,
            sum_field.as_ref(),
            &range,
        )?,
        HistoryStrategy::Replay => {
            let index = ReplayIndex::new(repo.db.tickets()?, repo.db.changes()?);
            reconstruct(&index, &tickets, &target.name, sum_field.as_ref(), &range)?
        }
    };

    info!(
        milestone = %target.name,
        candidates = tickets.len(),
        days = days.len(),
        ?strategy,
        "burndown reconstructed"
    );
    Ok(BurndownReport {
        milestone: target.name,
        sum_field: sum_field.map(|field| field.name().to_string()),
        range,
        days,
    })
}

/// Rebuild the milestone's daily totals from the change log.
///
/// `tickets` are the candidates that pass the configured filters. Each day is
/// computed independently from point-in-time lookups; days past `range.end`
/// are zero without any lookups.
pub fn reconstruct<H: HistoryIndex + ?Sized>(
    history: &H,
    tickets: &[TicketHead],
    milestone: &str,
    sum_field: Option<&FieldRef>,
    range: &DateRange,
) -> Result<Vec<DayBucket>> {
    range
        .days()
        .into_iter()
        .map(|at| {
            if at > range.end {
                Ok(DayBucket::empty(at.date_naive()))
            } else {
                reconstruct_day(history, tickets, milestone, sum_field, at)
            }
        })
        .collect()
}

fn reconstruct_day<H: HistoryIndex + ?Sized>(
    history: &H,
    tickets: &[TicketHead],
    milestone: &str,
    sum_field: Option<&FieldRef>,
    at: DateTime<Utc>,
) -> Result<DayBucket> {
    let mut bucket = DayBucket::empty(at.date_naive());

    for ticket in tickets {
        if ticket.created_at > at {
            continue;
        }
        if history.value_at(ticket.id, &MILESTONE, at)?.as_deref() != Some(milestone) {
            continue;
        }

        let status = history.value_at(ticket.id, &STATUS, at)?;
        let closed = status.as_deref() == Some(CLOSED);
        // Tickets closed as fixed stay in scope; other closures drop out.
        if closed && history.value_at(ticket.id, &RESOLUTION, at)?.as_deref() != Some(FIXED) {
            continue;
        }

        let amount = match sum_field {
            Some(field) => parse_amount(history.value_at(ticket.id, field, at)?.as_deref()),
            None => 1.0,
        };
        bucket.add(amount, closed);
    }

    debug!(
        day = %bucket.day,
        total = bucket.total,
        done = bucket.done,
        todo = bucket.todo,
        "burndown day"
    );
    Ok(bucket)
}

/// Numeric value of a summed field; blank or non-numeric text counts as 0.
pub fn parse_amount(value: Option<&str>) -> f64 {
    value
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|amount| amount.is_finite())
        .unwrap_or(0.0)
}
