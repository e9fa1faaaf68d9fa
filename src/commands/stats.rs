use std::path::Path;

use tracing::info;

use crate::error::{Result, SumStatsError};
use crate::metrics::stats::{StatsReport, TicketGroupStats, compute_groups};
use crate::output::{self, Format};
use crate::store::repo::Repo;

/// Which tickets the stats cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketScope {
    /// Tickets currently assigned to the milestone.
    Milestone(String),
    Ids(Vec<i64>),
    /// No query context: groups are listed with zero totals.
    None,
}

pub fn build_report(repo: &Repo, scope: &TicketScope) -> Result<StatsReport> {
    let (milestone, ticket_ids) = match scope {
        TicketScope::Milestone(name) => {
            let known = repo
                .db
                .milestones(true)?
                .iter()
                .any(|milestone| &milestone.name == name);
            if !known {
                return Err(SumStatsError::MilestoneNotFound(name.clone()));
            }
            (
                Some(name.clone()),
                Some(repo.db.ticket_ids_in_milestone(name)?),
            )
        }
        TicketScope::Ids(ids) => (None, Some(ids.clone())),
        TicketScope::None => (None, None),
    };

    let catalog = repo.catalog()?;
    let groups = compute_groups(&repo.db, &catalog, &repo.config, ticket_ids.as_deref())?;
    let stats = TicketGroupStats::from_groups(&repo.config, &groups);
    info!(
        groups = groups.len(),
        total = stats.count,
        done = stats.done_count,
        "group stats computed"
    );

    Ok(StatsReport {
        milestone,
        ticket_ids,
        stats,
        groups,
    })
}

pub fn run(root: &Path, milestone: Option<String>, ids: Vec<i64>, format: Format) -> Result<()> {
    let scope = match (milestone, ids.is_empty()) {
        (Some(name), _) => TicketScope::Milestone(name),
        (None, false) => TicketScope::Ids(ids),
        (None, true) => TicketScope::None,
    };
    let repo = Repo::open(root)?;
    let report = build_report(&repo, &scope)?;
    output::print_stats(&report, format)
}
