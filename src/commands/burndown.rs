use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::metrics::burndown::{HistoryStrategy, burndown_report};
use crate::output::{self, Format};
use crate::store::repo::Repo;

pub fn run(
    root: &Path,
    milestone: Option<String>,
    as_of: Option<DateTime<Utc>>,
    strategy: HistoryStrategy,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(root)?;
    let now = as_of.unwrap_or_else(Utc::now);
    let report = burndown_report(&repo, milestone.as_deref(), now, strategy)?;
    output::print_burndown(&report, format)
}
