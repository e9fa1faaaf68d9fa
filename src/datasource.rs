//! Burndown data source for chart front ends.
//!
//! A request names its milestone through the referring page URL
//! (`.../milestone/<name>`) and may pick columns with a `tq=select a,b` query.
//! The response body uses the chart query wire format:
//! `google.visualization.Query.setResponse({...});`.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info};
use url::Url;

use crate::error::{Result, SumStatsError};
use crate::metrics::burndown::{BurndownReport, DayBucket, HistoryStrategy, burndown_report};
use crate::store::repo::Repo;

static SELECT_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"select (?P<columns>.+?)(?: from\b.*)?$"));
static MILESTONE_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"/milestone/(?P<milestone>[^?#]+)"));
const WIRE_VERSION: &str = "0.6";
const DAY: &str = "day";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Day,
    Total,
    Todo,
    Done,
}

impl Column {
    pub fn id(self) -> &'static str {
        match self {
            Self::Day => DAY,
            Self::Total => "total",
            Self::Todo => "todo",
            Self::Done => "done",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Day => "Day",
            Self::Total => "Total",
            Self::Todo => "To Do",
            Self::Done => "Done",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Self::Day => "date",
            _ => "number",
        }
    }

    fn parse(name: &str) -> Result<Self> {
        match name {
            "day" => Ok(Self::Day),
            "total" => Ok(Self::Total),
            "todo" => Ok(Self::Todo),
            "done" => Ok(Self::Done),
            other => Err(SumStatsError::UnknownColumn(other.to_string())),
        }
    }

    fn value(self, bucket: &DayBucket) -> Value {
        match self {
            Self::Day => json!(chart_date(bucket.day)),
            Self::Total => json!(bucket.total),
            Self::Todo => json!(bucket.todo),
            Self::Done => json!(bucket.done),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceRequest {
    /// Referring page URL; its `/milestone/<name>` segment picks the milestone.
    pub referer: Option<String>,
    /// Column query such as `select done,todo`.
    pub tq: Option<String>,
    /// Wire options such as `reqId:3`.
    pub tqx: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// Output columns for a column query. `day` always leads; the default
/// selection is `todo,done`.
pub fn parse_columns(tq: Option<&str>) -> Result<Vec<Column>> {
    let mut columns = vec![Column::Day];
    let Some(tq) = tq.map(str::trim).filter(|tq| !tq.is_empty()) else {
        columns.extend([Column::Todo, Column::Done]);
        return Ok(columns);
    };

    let select = SELECT_PATTERN
        .as_ref()
        .map_err(|e| SumStatsError::MalformedColumnQuery(e.to_string()))?;
    let captures = select
        .captures(tq)
        .ok_or_else(|| SumStatsError::MalformedColumnQuery(tq.to_string()))?;
    for name in captures["columns"].split(',').map(str::trim) {
        match Column::parse(name)? {
            Column::Day => {}
            column => columns.push(column),
        }
    }
    Ok(columns)
}

/// Milestone name from a referring URL, percent-decoded. `None` when the URL
/// does not point at a milestone page.
pub fn milestone_from_referer(referer: &str) -> Option<String> {
    let path = match Url::parse(referer) {
        Ok(url) => url.path().to_string(),
        Err(_) => referer.to_string(),
    };
    let pattern = MILESTONE_PATTERN.as_ref().ok()?;
    let raw = pattern.captures(&path)?.name("milestone")?.as_str();
    Some(percent_decode_str(raw).decode_utf8_lossy().into_owned())
}

/// `reqId` from a `tqx` option string such as `out:json;reqId:4`.
pub fn request_id(tqx: Option<&str>) -> String {
    tqx.into_iter()
        .flat_map(|tqx| tqx.split(';'))
        .filter_map(|option| option.split_once(':'))
        .find(|(key, _)| key.trim() == "reqId")
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_else(|| "0".to_string())
}

/// The data table: column schema plus one row per day in day order.
pub fn data_table(report: &BurndownReport, columns: &[Column]) -> Value {
    let cols: Vec<Value> = columns
        .iter()
        .map(|column| json!({"id": column.id(), "label": column.label(), "type": column.kind()}))
        .collect();

    let mut days: Vec<&DayBucket> = report.days.iter().collect();
    days.sort_by_key(|bucket| bucket.day);
    let rows: Vec<Value> = days
        .into_iter()
        .map(|bucket| {
            let cells: Vec<Value> = columns
                .iter()
                .map(|column| json!({"v": column.value(bucket)}))
                .collect();
            json!({"c": cells})
        })
        .collect();

    json!({"cols": cols, "rows": rows})
}

pub fn envelope(report: &BurndownReport, columns: &[Column], req_id: &str) -> String {
    let payload = json!({
        "version": WIRE_VERSION,
        "reqId": req_id,
        "status": "ok",
        "table": data_table(report, columns),
    });
    format!("google.visualization.Query.setResponse({payload});")
}

/// Serve one data-source request. Failures become a 500 plain-text response
/// and are logged; there are no partial results.
pub fn respond(
    repo: &Repo,
    request: &DataSourceRequest,
    now: DateTime<Utc>,
    strategy: HistoryStrategy,
) -> DataSourceResponse {
    match render(repo, request, now, strategy) {
        Ok(body) => DataSourceResponse {
            status: 200,
            content_type: "application/json",
            body,
        },
        Err(e) => {
            let body = format!("Oops...\n{}: {e}\n", e.code());
            error!(code = e.code(), error = %e, "data source request failed");
            DataSourceResponse {
                status: 500,
                content_type: "text/plain",
                body,
            }
        }
    }
}

fn render(
    repo: &Repo,
    request: &DataSourceRequest,
    now: DateTime<Utc>,
    strategy: HistoryStrategy,
) -> Result<String> {
    let columns = parse_columns(request.tq.as_deref())?;
    let milestone = request.referer.as_deref().and_then(milestone_from_referer);
    let report = burndown_report(repo, milestone.as_deref(), now, strategy)?;
    info!(
        milestone = %report.milestone,
        days = report.days.len(),
        "data source response"
    );
    Ok(envelope(
        &report,
        &columns,
        &request_id(request.tqx.as_deref()),
    ))
}

/// Chart date literal with a zero-based month, e.g. `Date(2012,0,2)`.
fn chart_date(day: NaiveDate) -> String {
    format!("Date({},{},{})", day.year(), day.month0(), day.day())
}
