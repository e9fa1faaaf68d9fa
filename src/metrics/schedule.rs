use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{Result, SumStatsError};
use crate::model::{DayBoundary, Milestone, day_boundary};

/// Days of runway shown past today for milestones still in progress.
pub const BUFFER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    /// Last instant with data; later days are reported as zero.
    pub end: DateTime<Utc>,
    /// Last instant of the chart window.
    pub buffer: DateTime<Utc>,
}

impl DateRange {
    /// End-of-day sample instants, one per calendar day from `start` through `buffer`.
    pub fn days(&self) -> Vec<DateTime<Utc>> {
        let last: NaiveDate = self.buffer.date_naive();
        let mut days = Vec::new();
        let mut cursor = day_boundary(self.start, DayBoundary::End);
        while cursor.date_naive() <= last {
            days.push(cursor);
            cursor += Duration::days(1);
        }
        days
    }
}

/// Pick the named milestone (completed ones included), or the current one:
/// the first incomplete milestone in schedule order.
pub fn select_milestone(milestones: &[Milestone], name: Option<&str>) -> Result<Milestone> {
    match name {
        Some(name) => milestones
            .iter()
            .find(|milestone| milestone.name == name)
            .cloned()
            .ok_or_else(|| SumStatsError::MilestoneNotFound(name.to_string())),
        None => milestones
            .iter()
            .find(|milestone| !milestone.is_completed())
            .cloned()
            .ok_or(SumStatsError::NoCurrentMilestone),
    }
}

/// The day after the prior milestone's completion (or due) date, else end of today.
pub fn start_date(
    milestones: &[Milestone],
    target: &Milestone,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let position = milestones
        .iter()
        .position(|milestone| milestone.name == target.name)
        .ok_or_else(|| SumStatsError::MilestoneNotFound(target.name.clone()))?;

    if let Some(prior) = position.checked_sub(1).map(|index| &milestones[index]) {
        if let Some(completed) = prior.completed {
            return Ok(day_boundary(completed, DayBoundary::Next));
        }
        if let Some(due) = prior.due {
            return Ok(day_boundary(due, DayBoundary::Next));
        }
    }
    Ok(day_boundary(now, DayBoundary::End))
}

pub fn end_date(target: &Milestone, start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(completed) = target.completed {
        return day_boundary(completed, DayBoundary::End);
    }
    let today = day_boundary(now, DayBoundary::End);
    if let Some(due) = target.due
        && today > day_boundary(due, DayBoundary::End)
    {
        return today;
    }
    if today > start {
        return today;
    }
    day_boundary(start, DayBoundary::End)
}

pub fn buffer_date(target: &Milestone, start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = day_boundary(now, DayBoundary::End);
    let mut buffer = today.max(start) + Duration::days(BUFFER_DAYS);

    if let Some(completed) = target.completed {
        if completed < buffer {
            buffer = completed;
        }
    } else if let Some(due) = target.due {
        if due < today {
            buffer = today;
        } else if due < buffer {
            buffer = due;
        }
    }
    buffer
}

pub fn resolve_range(
    milestones: &[Milestone],
    target: &Milestone,
    now: DateTime<Utc>,
) -> Result<DateRange> {
    let start = start_date(milestones, target, now)?;
    Ok(DateRange {
        start,
        end: end_date(target, start, now),
        buffer: buffer_date(target, start, now),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap()
    }

    fn milestone(
        name: &str,
        due: Option<DateTime<Utc>>,
        completed: Option<DateTime<Utc>>,
    ) -> Milestone {
        Milestone {
            due,
            completed,
            ..Milestone::new(name)
        }
    }

    #[test]
    fn starts_the_day_after_prior_completion() {
        let milestones = vec![
            milestone("M0", Some(ts(2011, 12, 30, 0, 0, 0)), Some(ts(2012, 1, 1, 14, 0, 0))),
            milestone("M1", Some(ts(2012, 1, 10, 0, 0, 0)), None),
        ];
        let start = start_date(&milestones, &milestones[1], ts(2012, 1, 5, 9, 0, 0)).unwrap();
        assert_eq!(start, ts(2012, 1, 2, 0, 0, 0));
    }

    #[test]
    fn falls_back_to_prior_due_date_then_today() {
        let now = ts(2012, 1, 5, 9, 0, 0);
        let milestones = vec![
            milestone("M0", Some(ts(2011, 12, 20, 0, 0, 0)), None),
            milestone("M1", None, None),
        ];
        assert_eq!(
            start_date(&milestones, &milestones[1], now).unwrap(),
            ts(2011, 12, 21, 0, 0, 0)
        );
        assert_eq!(
            start_date(&milestones, &milestones[0], now).unwrap(),
            ts(2012, 1, 5, 23, 59, 59)
        );
    }

    #[test]
    fn missing_target_is_reported() {
        let milestones = vec![milestone("M0", None, None)];
        let err = start_date(&milestones, &Milestone::new("M9"), Utc::now()).unwrap_err();
        assert!(matches!(err, SumStatsError::MilestoneNotFound(name) if name == "M9"));
    }

    #[test]
    fn end_date_prefers_completion_then_today() {
        let now = ts(2012, 1, 5, 9, 0, 0);
        let start = ts(2012, 1, 2, 0, 0, 0);

        let completed = milestone("M1", None, Some(ts(2012, 1, 4, 8, 0, 0)));
        assert_eq!(end_date(&completed, start, now), ts(2012, 1, 4, 23, 59, 59));

        let overdue = milestone("M1", Some(ts(2012, 1, 3, 0, 0, 0)), None);
        assert_eq!(end_date(&overdue, start, now), ts(2012, 1, 5, 23, 59, 59));

        let running = milestone("M1", Some(ts(2012, 1, 10, 0, 0, 0)), None);
        assert_eq!(end_date(&running, start, now), ts(2012, 1, 5, 23, 59, 59));

        let future_start = ts(2012, 1, 8, 0, 0, 0);
        assert_eq!(
            end_date(&running, future_start, now),
            ts(2012, 1, 8, 23, 59, 59)
        );
    }

    #[test]
    fn buffer_extends_a_week_clamped_by_due_and_completion() {
        let now = ts(2012, 1, 5, 9, 0, 0);
        let start = ts(2012, 1, 2, 0, 0, 0);

        let open = milestone("M1", None, None);
        assert_eq!(buffer_date(&open, start, now), ts(2012, 1, 12, 23, 59, 59));

        let due_soon = milestone("M1", Some(ts(2012, 1, 10, 0, 0, 0)), None);
        assert_eq!(buffer_date(&due_soon, start, now), ts(2012, 1, 10, 0, 0, 0));

        let overdue = milestone("M1", Some(ts(2012, 1, 3, 0, 0, 0)), None);
        assert_eq!(buffer_date(&overdue, start, now), ts(2012, 1, 5, 23, 59, 59));

        let completed = milestone("M1", None, Some(ts(2012, 1, 4, 8, 0, 0)));
        assert_eq!(buffer_date(&completed, start, now), ts(2012, 1, 4, 8, 0, 0));
    }

    #[test]
    fn days_cover_start_through_buffer_inclusive() {
        let range = DateRange {
            start: ts(2012, 1, 2, 0, 0, 0),
            end: ts(2012, 1, 3, 23, 59, 59),
            buffer: ts(2012, 1, 4, 8, 0, 0),
        };
        let days = range.days();
        assert_eq!(
            days,
            vec![
                ts(2012, 1, 2, 23, 59, 59),
                ts(2012, 1, 3, 23, 59, 59),
                ts(2012, 1, 4, 23, 59, 59),
            ]
        );
        assert!(days.windows(2).all(|pair| pair[1] - pair[0] == Duration::days(1)));
    }

    #[test]
    fn selects_named_or_current_milestone() {
        let milestones = vec![
            milestone("M0", None, Some(ts(2012, 1, 1, 0, 0, 0))),
            milestone("M1", None, None),
        ];
        assert_eq!(select_milestone(&milestones, Some("M0")).unwrap().name, "M0");
        assert_eq!(select_milestone(&milestones, None).unwrap().name, "M1");
        assert!(matches!(
            select_milestone(&milestones, Some("nope")),
            Err(SumStatsError::MilestoneNotFound(_))
        ));
        assert!(matches!(
            select_milestone(&milestones[..1], None),
            Err(SumStatsError::NoCurrentMilestone)
        ));
    }
}
