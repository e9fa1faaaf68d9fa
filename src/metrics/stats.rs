//! Grouped ticket statistics for roadmap and milestone views.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::{Config, GroupDefinition, GroupValues};
use crate::error::Result;
use crate::fields::{FieldCatalog, FieldMeta};
use crate::predicate::{AggregateQuery, Measure, Predicate, filter_predicates};

/// Fields whose groups may include closed tickets.
const CLOSED_AWARE_FIELDS: &[&str] = &["status", "resolution"];

/// Runs a single filtered count or sum.
pub trait Aggregator {
    fn aggregate(&self, query: &AggregateQuery) -> Result<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    pub name: String,
    pub title: String,
    pub field: String,
    pub values: Vec<String>,
    pub count: f64,
    pub query_args: BTreeMap<String, Vec<String>>,
    pub css_class: String,
    pub overall_completion: bool,
}

/// Compute one result per configured group, in display order.
///
/// With no ticket set every count is 0 and nothing is queried, but group
/// fields are still resolved and catch-alls expanded.
pub fn compute_groups<A: Aggregator + ?Sized>(
    aggregator: &A,
    catalog: &FieldCatalog,
    config: &Config,
    ticket_ids: Option<&[i64]>,
) -> Result<Vec<GroupResult>> {
    let groups = config.groups();
    let filters = filter_predicates(&config.sumstats.filter, catalog)?;
    let measure = match (ticket_ids, config.sumstats.sum_field()) {
        (Some(_), Some(name)) => Measure::Sum(catalog.resolve(name)?.field.clone()),
        _ => Measure::Count,
    };

    groups
        .iter()
        .map(|group| {
            let meta = catalog.resolve(group.field_name())?;
            let values = match group.values() {
                GroupValues::Explicit(values) => values,
                GroupValues::Remaining => remaining_values(group, meta, &groups),
            };

            let mut query_args = BTreeMap::<String, Vec<String>>::new();
            if !values.is_empty() {
                query_args.insert(meta.name().to_string(), values.clone());
            }
            let extra = group.query_args.as_deref().unwrap_or_default();
            for (key, value) in extra_args(extra).chain(extra_args(&config.sumstats.query_args)) {
                query_args.entry(key).or_default().push(value);
            }

            let closed_aware = CLOSED_AWARE_FIELDS.contains(&meta.name());
            if !closed_aware {
                query_args
                    .entry("status".into())
                    .or_default()
                    .push("!closed".into());
            }

            let count = match ticket_ids {
                None => 0.0,
                Some(ids) => {
                    let mut predicates = vec![Predicate::one_of(meta.field.clone(), values.clone())];
                    predicates.extend(filters.iter().cloned());
                    if !closed_aware {
                        predicates.push(Predicate::open());
                    }
                    let count = aggregator.aggregate(&AggregateQuery {
                        measure: measure.clone(),
                        predicates,
                        ticket_ids: ids.to_vec(),
                    })?;
                    debug!(group = %group.name, field = %meta.field, count, "group total");
                    count
                }
            };

            Ok(GroupResult {
                name: group.name.clone(),
                title: group.title().to_string(),
                field: meta.name().to_string(),
                values,
                count,
                query_args,
                css_class: group.css_class().to_string(),
                overall_completion: group.overall_completion,
            })
        })
        .collect()
}

/// Options of `meta` not claimed by any explicit group on the same field,
/// in the field's option order.
pub fn remaining_values(
    group: &GroupDefinition,
    meta: &FieldMeta,
    groups: &[GroupDefinition],
) -> Vec<String> {
    let claimed: BTreeSet<String> = groups
        .iter()
        .filter(|other| other.field_name() == group.field_name())
        .filter_map(|other| match other.values() {
            GroupValues::Explicit(values) => Some(values),
            GroupValues::Remaining => None,
        })
        .flatten()
        .collect();

    let mut seen = BTreeSet::new();
    meta.options
        .iter()
        .filter(|option| !claimed.contains(*option) && seen.insert(option.as_str()))
        .cloned()
        .collect()
}

/// Comma-delimited `key=value` pairs; entries without `=` are skipped.
fn extra_args(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(',').filter_map(|entry| {
        entry
            .split_once('=')
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
    })
}

/// Stats for one ticket set, with the per-group detail they were built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    /// `None` when no ticket set was given and every total is 0.
    pub ticket_ids: Option<Vec<i64>>,
    pub stats: TicketGroupStats,
    pub groups: Vec<GroupResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interval {
    pub title: String,
    pub count: f64,
    pub query_args: BTreeMap<String, Vec<String>>,
    pub css_class: String,
    pub overall_completion: bool,
    pub percent: f64,
}

/// Progress bar model for one milestone: the intervals plus completion totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketGroupStats {
    pub title: String,
    pub unit: String,
    pub count: f64,
    pub done_count: f64,
    pub done_percent: f64,
    pub intervals: Vec<Interval>,
}

impl TicketGroupStats {
    pub fn new(title: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            unit: unit.into(),
            count: 0.0,
            done_count: 0.0,
            done_percent: 0.0,
            intervals: Vec::new(),
        }
    }

    pub fn from_groups(config: &Config, groups: &[GroupResult]) -> Self {
        let mut stats = Self::new(
            config.sumstats.drilldown_label.clone(),
            config.sumstats.label.clone(),
        );
        for group in groups {
            stats.add_interval(Interval {
                title: group.title.clone(),
                count: group.count,
                query_args: group.query_args.clone(),
                css_class: group.css_class.clone(),
                overall_completion: group.overall_completion,
                percent: 0.0,
            });
        }
        stats.refresh_calcs();
        stats
    }

    pub fn add_interval(&mut self, interval: Interval) {
        self.count += interval.count;
        self.intervals.push(interval);
    }

    /// Recompute percentages. Rounded percents are nudged so they add up to 100
    /// once anything is done: the shortfall goes to the smallest non-zero
    /// interval, an excess comes off the largest. Ties go to the earlier interval.
    pub fn refresh_calcs(&mut self) {
        if self.count < 1.0 {
            return;
        }

        let mut total_percent = 0.0;
        self.done_count = 0.0;
        self.done_percent = 0.0;
        for interval in &mut self.intervals {
            interval.percent = (interval.count / self.count * 100.0).round();
            total_percent += interval.percent;
            if interval.overall_completion {
                self.done_count += interval.count;
                self.done_percent += interval.percent;
            }
        }

        if self.done_count == 0.0 || total_percent == 100.0 {
            return;
        }
        let fudge = 100.0 - total_percent;
        let candidates = self
            .intervals
            .iter_mut()
            .filter(|interval| interval.percent != 0.0);
        let target = if fudge < 0.0 {
            candidates.rev().max_by(|a, b| a.percent.total_cmp(&b.percent))
        } else {
            candidates.min_by(|a, b| a.percent.total_cmp(&b.percent))
        };
        if let Some(interval) = target {
            interval.percent += fudge;
            if interval.overall_completion {
                self.done_percent += fudge;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::SumStatsError;
    use crate::fields::FieldRef;
    use crate::predicate::Condition;

    /// Records queries and answers with a fixed total.
    struct Recorder {
        answer: f64,
        queries: RefCell<Vec<AggregateQuery>>,
    }

    impl Recorder {
        fn new(answer: f64) -> Self {
            Self {
                answer,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl Aggregator for Recorder {
        fn aggregate(&self, query: &AggregateQuery) -> Result<f64> {
            self.queries.borrow_mut().push(query.clone());
            Ok(self.answer)
        }
    }

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldMeta {
                field: FieldRef::Builtin("status"),
                label: "Status".into(),
                options: vec!["new".into(), "accepted".into(), "closed".into()],
            },
            FieldMeta {
                field: FieldRef::Builtin("type"),
                label: "Type".into(),
                options: vec!["defect".into(), "epic".into()],
            },
            FieldMeta {
                field: FieldRef::Builtin("priority"),
                label: "Priority".into(),
                options: vec!["major".into(), "minor".into(), "trivial".into()],
            },
            FieldMeta {
                field: FieldRef::custom("hours"),
                label: "Hours".into(),
                options: vec![],
            },
        ])
    }

    fn config(groups: Vec<GroupDefinition>) -> Config {
        Config {
            milestone_groups: groups,
            ..Config::default()
        }
    }

    #[test]
    fn catch_all_takes_the_unclaimed_options() {
        let config = config(vec![
            GroupDefinition::new("working", "accepted"),
            GroupDefinition::new("rest", "*"),
        ]);
        let groups = compute_groups(&Recorder::new(0.0), &catalog(), &config, None).unwrap();

        assert_eq!(groups[1].values, vec!["new", "closed"]);
        let union: BTreeSet<_> = groups.iter().flat_map(|g| g.values.clone()).collect();
        let options: BTreeSet<_> = ["new", "accepted", "closed"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(union, options);
    }

    #[test]
    fn without_ticket_ids_nothing_is_queried() {
        let recorder = Recorder::new(9.0);
        let groups =
            compute_groups(&recorder, &catalog(), &Config::default(), None).unwrap();
        assert!(groups.iter().all(|group| group.count == 0.0));
        assert!(recorder.queries.borrow().is_empty());
    }

    #[test]
    fn queries_are_restricted_to_the_ticket_set() {
        let recorder = Recorder::new(2.0);
        let groups =
            compute_groups(&recorder, &catalog(), &Config::default(), Some(&[1, 2, 3])).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 2.0);
        let queries = recorder.queries.borrow();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|query| query.ticket_ids == vec![1, 2, 3]));
        assert!(queries.iter().all(|query| query.measure == Measure::Count));
        assert_eq!(
            queries[0].predicates,
            vec![Predicate::one_of(FieldRef::Builtin("status"), vec!["closed".into()])]
        );
    }

    #[test]
    fn non_status_groups_only_see_open_tickets() {
        let recorder = Recorder::new(1.0);
        let config = config(vec![GroupDefinition {
            field: Some("priority".into()),
            ..GroupDefinition::new("urgent", "major")
        }]);
        let groups = compute_groups(&recorder, &catalog(), &config, Some(&[1])).unwrap();

        assert_eq!(groups[0].query_args["status"], vec!["!closed"]);
        assert_eq!(groups[0].query_args["priority"], vec!["major"]);
        let queries = recorder.queries.borrow();
        assert!(queries[0].predicates.contains(&Predicate::open()));
    }

    #[test]
    fn query_args_merge_group_and_global_extras() {
        let mut config = config(vec![GroupDefinition {
            query_args: Some("group=resolution, bogus".into()),
            ..GroupDefinition::new("closed", "closed")
        }]);
        config.sumstats.query_args = "owner = me,order=priority".into();

        let groups = compute_groups(&Recorder::new(0.0), &catalog(), &config, None).unwrap();
        let args = &groups[0].query_args;
        assert_eq!(args["status"], vec!["closed"]);
        assert_eq!(args["group"], vec!["resolution"]);
        assert_eq!(args["owner"], vec!["me"]);
        assert_eq!(args["order"], vec!["priority"]);
        assert!(!args.contains_key("bogus"));
    }

    #[test]
    fn sum_mode_and_filters_reach_every_query() {
        let recorder = Recorder::new(0.0);
        let mut config = Config::default();
        config.sumstats.field = "hours".into();
        config.sumstats.filter = vec!["type!=epic".into()];

        compute_groups(&recorder, &catalog(), &config, Some(&[4])).unwrap();
        for query in recorder.queries.borrow().iter() {
            assert_eq!(query.measure, Measure::Sum(FieldRef::custom("hours")));
            assert!(query.predicates.iter().any(|predicate| {
                predicate.field == FieldRef::Builtin("type")
                    && predicate.condition == Condition::Ne("epic".into())
            }));
        }
    }

    #[test]
    fn unknown_group_field_fails() {
        let config = config(vec![GroupDefinition {
            field: Some("points".into()),
            ..GroupDefinition::new("big", "8")
        }]);
        let err = compute_groups(&Recorder::new(0.0), &catalog(), &config, None).unwrap_err();
        assert!(matches!(err, SumStatsError::FieldNotFound(name) if name == "points"));
    }

    fn interval(title: &str, count: f64, done: bool) -> Interval {
        Interval {
            title: title.into(),
            count,
            query_args: BTreeMap::new(),
            css_class: title.into(),
            overall_completion: done,
            percent: 0.0,
        }
    }

    #[test]
    fn percents_are_fudged_to_one_hundred() {
        let mut stats = TicketGroupStats::new("Ticket status", "tickets");
        stats.add_interval(interval("closed", 1.0, true));
        stats.add_interval(interval("active", 1.0, false));
        stats.add_interval(interval("review", 1.0, false));
        stats.refresh_calcs();

        assert_eq!(stats.count, 3.0);
        assert_eq!(stats.done_count, 1.0);
        let total: f64 = stats.intervals.iter().map(|i| i.percent).sum();
        assert_eq!(total, 100.0);
        assert_eq!(stats.intervals[0].percent, 34.0);
        assert_eq!(stats.done_percent, 34.0);
    }

    #[test]
    fn excess_comes_off_the_first_largest_interval() {
        let mut stats = TicketGroupStats::new("Ticket status", "tickets");
        stats.add_interval(interval("closed", 3.0, true));
        stats.add_interval(interval("active", 3.0, false));
        stats.add_interval(interval("review", 2.0, false));
        stats.refresh_calcs();

        let percents: Vec<f64> = stats.intervals.iter().map(|i| i.percent).collect();
        assert_eq!(percents, vec![37.0, 38.0, 25.0]);
        assert_eq!(stats.done_percent, 37.0);
    }

    #[test]
    fn empty_stats_stay_at_zero() {
        let mut stats = TicketGroupStats::new("Ticket status", "tickets");
        stats.add_interval(interval("closed", 0.0, true));
        stats.refresh_calcs();
        assert_eq!(stats.done_percent, 0.0);
        assert_eq!(stats.intervals[0].percent, 0.0);
    }

    #[test]
    fn from_groups_uses_configured_labels() {
        let mut config = Config::default();
        config.sumstats.label = "hours".into();
        let groups = compute_groups(&Recorder::new(3.0), &catalog(), &config, Some(&[1])).unwrap();

        let stats = TicketGroupStats::from_groups(&config, &groups);
        assert_eq!(stats.title, "Ticket status");
        assert_eq!(stats.unit, "hours");
        assert_eq!(stats.count, 6.0);
        assert_eq!(stats.done_percent, 50.0);
    }
}
