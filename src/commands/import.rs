use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::info;

use crate::error::{Result, SumStatsError};
use crate::model::Milestone;
use crate::output::{self, Format};
use crate::store::db::{NewTicket, TicketDb};
use crate::store::repo::Repo;

const ENUM_KINDS: &[&str] = &["type", "priority", "severity", "resolution"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportPlan {
    #[serde(default)]
    milestones: Vec<MilestoneSpec>,
    #[serde(default)]
    enums: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    versions: Vec<String>,
    #[serde(default)]
    tickets: Vec<TicketSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MilestoneSpec {
    name: String,
    #[serde(default)]
    due: Option<DateTime<Utc>>,
    #[serde(default)]
    completed: Option<DateTime<Utc>>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TicketSpec {
    #[serde(default)]
    id: Option<i64>,
    created: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    changes: Vec<ChangeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangeSpec {
    at: DateTime<Utc>,
    #[serde(default)]
    author: Option<String>,
    set: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct PreparedTicket {
    ticket: NewTicket,
    changes: Vec<PreparedChange>,
}

#[derive(Debug, Clone, PartialEq)]
struct PreparedChange {
    at: DateTime<Utc>,
    author: Option<String>,
    field: String,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub source: String,
    pub milestones: usize,
    pub options: usize,
    pub tickets: usize,
    pub changes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ticket_ids: Vec<i64>,
}

pub fn run(root: &Path, source: String, dry_run: bool, format: Format) -> Result<()> {
    let repo = Repo::open(root)?;
    let raw = read_source(&source)?;
    let plan = parse_document(&source, &raw)?;
    let tickets = prepare_tickets(&plan, &repo.db)?;

    let mut report = ImportReport {
        dry_run,
        source,
        milestones: plan.milestones.len(),
        options: plan.enums.values().map(Vec::len).sum::<usize>()
            + plan.components.len()
            + plan.versions.len(),
        tickets: tickets.len(),
        changes: tickets.iter().map(|ticket| ticket.changes.len()).sum(),
        ticket_ids: Vec::new(),
    };

    if !dry_run {
        report.ticket_ids = apply_import(&repo.db, &plan, &tickets)?;
        info!(
            tickets = report.tickets,
            changes = report.changes,
            milestones = report.milestones,
            "import applied"
        );
    }

    print_report(&report, format)
}

fn invalid_spec(message: impl Into<String>) -> SumStatsError {
    SumStatsError::ImportInvalidSpec(message.into())
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut stdin = std::io::stdin();
        let mut contents = String::new();
        stdin.read_to_string(&mut contents)?;
        return Ok(contents);
    }

    Ok(fs::read_to_string(source)?)
}

fn parse_document(source: &str, raw: &str) -> Result<ImportPlan> {
    if raw.trim().is_empty() {
        return Err(invalid_spec(format!("source '{source}' is empty")));
    }

    let plan: ImportPlan = serde_yaml::from_str(raw).map_err(|yaml_err| {
        invalid_spec(format!("failed to parse '{source}' as import YAML: {yaml_err}"))
    })?;

    let mut names = BTreeSet::new();
    for milestone in &plan.milestones {
        if milestone.name.trim().is_empty() {
            return Err(invalid_spec("milestone name must not be empty"));
        }
        if !names.insert(milestone.name.as_str()) {
            return Err(invalid_spec(format!(
                "milestone '{}' is listed twice",
                milestone.name
            )));
        }
    }
    for kind in plan.enums.keys() {
        if !ENUM_KINDS.contains(&kind.as_str()) {
            return Err(invalid_spec(format!(
                "unknown enum '{kind}' (expected one of {})",
                ENUM_KINDS.join(", ")
            )));
        }
    }

    Ok(plan)
}

/// Validate tickets and flatten their changes into apply order.
fn prepare_tickets(plan: &ImportPlan, db: &TicketDb) -> Result<Vec<PreparedTicket>> {
    let mut milestones: BTreeSet<String> = db
        .milestones(true)?
        .into_iter()
        .map(|milestone| milestone.name)
        .collect();
    milestones.extend(plan.milestones.iter().map(|milestone| milestone.name.clone()));

    let mut ids = BTreeSet::new();
    let mut prepared = Vec::with_capacity(plan.tickets.len());
    for (index, spec) in plan.tickets.iter().enumerate() {
        let label = match spec.id {
            Some(id) => format!("ticket {id}"),
            None => format!("ticket #{}", index + 1),
        };
        if let Some(id) = spec.id
            && !ids.insert(id)
        {
            return Err(invalid_spec(format!("{label} is listed twice")));
        }

        let mut fields = BTreeMap::new();
        for (field, value) in &spec.fields {
            if let Some(value) = scalar(&label, field, value)? {
                check_milestone(&label, field, Some(value.as_str()), &milestones)?;
                fields.insert(field.clone(), value);
            }
        }

        let mut changes = Vec::new();
        for change in &spec.changes {
            if change.at < spec.created {
                return Err(invalid_spec(format!(
                    "{label} has a change at {} before its creation at {}",
                    change.at, spec.created
                )));
            }
            if change.set.is_empty() {
                return Err(invalid_spec(format!(
                    "{label} has a change at {} that sets nothing",
                    change.at
                )));
            }
            for (field, value) in &change.set {
                let value = scalar(&label, field, value)?;
                check_milestone(&label, field, value.as_deref(), &milestones)?;
                changes.push(PreparedChange {
                    at: change.at,
                    author: change.author.clone(),
                    field: field.clone(),
                    value,
                });
            }
        }
        changes.sort_by_key(|change| change.at);

        prepared.push(PreparedTicket {
            ticket: NewTicket {
                id: spec.id,
                created_at: spec.created,
                fields,
            },
            changes,
        });
    }
    Ok(prepared)
}

fn scalar(label: &str, field: &str, value: &Value) -> Result<Option<String>> {
    if field.trim().is_empty() {
        return Err(invalid_spec(format!("{label} has an empty field name")));
    }
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        _ => Err(invalid_spec(format!(
            "{label} field '{field}' must be a string, number or boolean"
        ))),
    }
}

fn check_milestone(
    label: &str,
    field: &str,
    value: Option<&str>,
    milestones: &BTreeSet<String>,
) -> Result<()> {
    match value {
        Some(name) if field == "milestone" && !name.is_empty() && !milestones.contains(name) => {
            Err(invalid_spec(format!(
                "{label} references unknown milestone '{name}'"
            )))
        }
        _ => Ok(()),
    }
}

/// Apply the whole plan in one transaction so a failure leaves the database untouched.
fn apply_import(db: &TicketDb, plan: &ImportPlan, tickets: &[PreparedTicket]) -> Result<Vec<i64>> {
    db.transaction(|writer| {
        for spec in &plan.milestones {
            writer.upsert_milestone(&Milestone {
                name: spec.name.clone(),
                due: spec.due,
                completed: spec.completed,
                description: spec.description.clone(),
            })?;
        }
        for (kind, names) in &plan.enums {
            for name in names {
                writer.add_enum(kind, name)?;
            }
        }
        for name in &plan.components {
            writer.add_named_value("component", name)?;
        }
        for name in &plan.versions {
            writer.add_named_value("version", name)?;
        }

        let mut created = Vec::with_capacity(tickets.len());
        for prepared in tickets {
            let id = writer.insert_ticket(&prepared.ticket)?;
            for change in &prepared.changes {
                writer.record_change(
                    id,
                    &change.field,
                    change.value.as_deref(),
                    change.at,
                    change.author.as_deref(),
                )?;
            }
            created.push(id);
        }
        Ok(created)
    })
}

fn print_report(report: &ImportReport, format: Format) -> Result<()> {
    match format {
        Format::Json => output::print_json(report)?,
        Format::Pretty => {
            let verb = if report.dry_run { "Validated" } else { "Imported" };
            println!(
                "{}",
                format!(
                    "{verb} {} tickets, {} changes and {} milestones from {}",
                    report.tickets, report.changes, report.milestones, report.source
                )
                .bold()
            );
            if report.dry_run {
                println!("  (dry run, nothing written)");
            }
        }
        Format::Minimal => {
            for id in &report.ticket_ids {
                println!("{id}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init;
    use crate::fields::FieldRef;
    use tempfile::tempdir;

    const PLAN: &str = r#"
milestones:
  - name: M0
    completed: 2012-01-01T12:00:00Z
  - name: M1
    due: 2012-01-10T00:00:00Z
enums:
  resolution: [fixed, wontfix]
components: [core]
tickets:
  - created: 2012-01-02T09:00:00Z
    fields:
      summary: Parser
      milestone: M1
      status: new
      hours: 3
    changes:
      - at: 2012-01-05T10:00:00Z
        author: alice
        set:
          status: closed
          resolution: fixed
  - id: 20
    created: 2012-01-03T09:00:00Z
    fields:
      milestone: M1
      status: new
"#;

    fn write_plan(dir: &Path, raw: &str) -> String {
        let path = dir.join("plan.yaml");
        fs::write(&path, raw).unwrap();
        path.display().to_string()
    }

    #[test]
    fn parse_document_rejects_empty_source() {
        let err = parse_document("empty.yaml", "  \n").unwrap_err();
        let SumStatsError::ImportInvalidSpec(message) = err else {
            panic!("expected import invalid spec error");
        };
        assert!(message.contains("is empty"));
    }

    #[test]
    fn parse_document_rejects_unknown_enum_kind() {
        let err = parse_document("plan.yaml", "enums:\n  color: [red]\n").unwrap_err();
        assert!(err.to_string().contains("unknown enum 'color'"));
    }

    #[test]
    fn run_applies_tickets_and_changes() {
        let dir = tempdir().unwrap();
        init::run(dir.path()).unwrap();
        let source = write_plan(dir.path(), PLAN);

        run(dir.path(), source, false, Format::Json).unwrap();

        let repo = Repo::open(dir.path()).unwrap();
        let ticket = repo.db.ticket(1).unwrap();
        assert_eq!(ticket.get("status"), Some("closed"));
        assert_eq!(ticket.get("hours"), Some("3"));
        assert!(repo.db.ticket(20).is_ok());

        let changes = repo.db.changes().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.author.as_deref() == Some("alice")));
        assert_eq!(
            repo.db
                .current_value(1, &FieldRef::Builtin("resolution"))
                .unwrap()
                .as_deref(),
            Some("fixed")
        );
        assert_eq!(repo.db.named_values("component").unwrap(), vec!["core"]);
        assert_eq!(repo.db.milestones(true).unwrap().len(), 2);
    }

    #[test]
    fn dry_run_does_not_write() {
        let dir = tempdir().unwrap();
        init::run(dir.path()).unwrap();
        let source = write_plan(dir.path(), PLAN);

        run(dir.path(), source, true, Format::Json).unwrap();

        let repo = Repo::open(dir.path()).unwrap();
        assert!(repo.db.tickets().unwrap().is_empty());
        assert!(repo.db.milestones(true).unwrap().is_empty());
    }

    #[test]
    fn change_before_creation_is_rejected() {
        let dir = tempdir().unwrap();
        init::run(dir.path()).unwrap();
        let source = write_plan(
            dir.path(),
            r#"
tickets:
  - created: 2012-01-05T00:00:00Z
    changes:
      - at: 2012-01-04T00:00:00Z
        set: {status: closed}
"#,
        );

        let err = run(dir.path(), source, false, Format::Json).unwrap_err();
        assert!(matches!(err, SumStatsError::ImportInvalidSpec(_)));
        let repo = Repo::open(dir.path()).unwrap();
        assert!(repo.db.tickets().unwrap().is_empty());
    }

    #[test]
    fn unknown_milestone_reference_is_rejected() {
        let dir = tempdir().unwrap();
        init::run(dir.path()).unwrap();
        let source = write_plan(
            dir.path(),
            r#"
tickets:
  - created: 2012-01-05T00:00:00Z
    fields: {milestone: nowhere}
"#,
        );

        let err = run(dir.path(), source, false, Format::Json).unwrap_err();
        assert!(err.to_string().contains("unknown milestone 'nowhere'"));
    }

    #[test]
    fn failed_apply_leaves_no_partial_import() {
        let dir = tempdir().unwrap();
        init::run(dir.path()).unwrap();
        let source = write_plan(
            dir.path(),
            r#"
milestones:
  - name: M1
enums:
  resolution: [fixed]
tickets:
  - created: 2012-01-02T09:00:00Z
    fields: {milestone: M1, status: new}
    changes:
      - at: 2012-01-03T09:00:00Z
        set: {status: closed}
  - id: 1
    created: 2012-01-02T10:00:00Z
    fields: {milestone: M1, status: new}
"#,
        );

        let err = run(dir.path(), source, false, Format::Json).unwrap_err();
        assert_eq!(err.code(), "db_error");

        let repo = Repo::open(dir.path()).unwrap();
        assert!(repo.db.tickets().unwrap().is_empty());
        assert!(repo.db.changes().unwrap().is_empty());
        assert!(repo.db.milestones(true).unwrap().is_empty());
        assert!(repo.db.enum_values("resolution").unwrap().is_empty());
    }
}
