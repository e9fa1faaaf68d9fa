//! Structured ticket predicates. The store compiles these into parameterised SQL;
//! nothing here ever builds query text.

use serde::Serialize;

use crate::error::{Result, SumStatsError};
use crate::fields::{FieldCatalog, FieldRef};
use crate::model::CLOSED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Condition {
    Eq(String),
    Ne(String),
    In(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Predicate {
    pub field: FieldRef,
    #[serde(flatten)]
    pub condition: Condition,
}

impl Predicate {
    pub fn eq(field: FieldRef, value: impl Into<String>) -> Self {
        Self {
            field,
            condition: Condition::Eq(value.into()),
        }
    }

    pub fn ne(field: FieldRef, value: impl Into<String>) -> Self {
        Self {
            field,
            condition: Condition::Ne(value.into()),
        }
    }

    pub fn one_of(field: FieldRef, values: Vec<String>) -> Self {
        Self {
            field,
            condition: Condition::In(values),
        }
    }

    /// Restrict to tickets that are not closed.
    pub fn open() -> Self {
        Self::ne(FieldRef::Builtin("status"), CLOSED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measure {
    Count,
    Sum(FieldRef),
}

/// A count or sum over the tickets in `ticket_ids` matching every predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateQuery {
    pub measure: Measure,
    pub predicates: Vec<Predicate>,
    pub ticket_ids: Vec<i64>,
}

/// A configured `field=value` / `field!=value` filter entry, before field resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: String,
    pub negate: bool,
    pub value: String,
}

impl FieldFilter {
    pub fn to_predicate(&self, catalog: &FieldCatalog) -> Result<Predicate> {
        let field = catalog.resolve(&self.field)?.field.clone();
        Ok(if self.negate {
            Predicate::ne(field, self.value.clone())
        } else {
            Predicate::eq(field, self.value.clone())
        })
    }
}

pub fn parse_filter(entry: &str) -> Result<FieldFilter> {
    let Some((field, value)) = entry.split_once('=') else {
        return Err(SumStatsError::Configuration(format!(
            "filter '{entry}' must look like field=value or field!=value"
        )));
    };

    let field = field.trim();
    let (field, negate) = match field.strip_suffix('!') {
        Some(stripped) => (stripped.trim_end(), true),
        None => (field, false),
    };
    if field.is_empty() {
        return Err(SumStatsError::Configuration(format!(
            "filter '{entry}' has no field name"
        )));
    }

    Ok(FieldFilter {
        field: field.to_string(),
        negate,
        value: value.trim().to_string(),
    })
}

/// Resolve every configured filter entry into a predicate.
pub fn filter_predicates(entries: &[String], catalog: &FieldCatalog) -> Result<Vec<Predicate>> {
    entries
        .iter()
        .map(|entry| parse_filter(entry)?.to_predicate(catalog))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldMeta;

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldMeta {
                field: FieldRef::Builtin("type"),
                label: "Type".into(),
                options: vec!["defect".into(), "epic".into()],
            },
            FieldMeta {
                field: FieldRef::custom("team"),
                label: "Team".into(),
                options: vec![],
            },
        ])
    }

    #[test]
    fn parses_equality_and_inequality() {
        assert_eq!(
            parse_filter("type!=epic").unwrap(),
            FieldFilter {
                field: "type".into(),
                negate: true,
                value: "epic".into()
            }
        );
        let filter = parse_filter(" team = core ").unwrap();
        assert!(!filter.negate);
        assert_eq!(filter.field, "team");
        assert_eq!(filter.value, "core");
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let filter = parse_filter("keywords=a=b").unwrap();
        assert_eq!(filter.value, "a=b");
    }

    #[test]
    fn resolves_filters_against_catalog() {
        let predicates =
            filter_predicates(&["type!=epic".into(), "team=core".into()], &catalog()).unwrap();
        assert_eq!(predicates[0], Predicate::ne(FieldRef::Builtin("type"), "epic"));
        assert_eq!(predicates[1], Predicate::eq(FieldRef::custom("team"), "core"));
    }

    #[test]
    fn unknown_filter_field_fails() {
        let err = filter_predicates(&["points=3".into()], &catalog()).unwrap_err();
        assert!(matches!(err, SumStatsError::FieldNotFound(_)));
    }

    #[test]
    fn entry_without_operator_is_rejected() {
        assert!(parse_filter("epic").is_err());
        assert!(parse_filter("!=epic").is_err());
    }
}
