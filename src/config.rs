//! YAML configuration: reporting options, milestone groups, custom field
//! definitions and workflow states.
//!
//! The configuration is loaded once per invocation and passed explicitly into
//! every component that needs it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SumStatsError};
use crate::predicate::parse_filter;
use crate::store::data_dir;

pub const CONFIG_FILE: &str = "config.yaml";
pub const CATCH_ALL: &str = "*";
pub const DEFAULT_GROUP_FIELD: &str = "status";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub sumstats: SumStatsConfig,
    pub milestone_groups: Vec<GroupDefinition>,
    pub ticket_custom: Vec<CustomFieldConfig>,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SumStatsConfig {
    /// Field name to sum; empty means count tickets.
    pub field: String,
    /// Plural name of the items being summed.
    pub label: String,
    pub drilldown_label: String,
    /// Comma-delimited `key=value` args added to every group query.
    pub query_args: String,
    /// Ticket filters such as `type!=epic`.
    pub filter: Vec<String>,
}

impl Default for SumStatsConfig {
    fn default() -> Self {
        Self {
            field: String::new(),
            label: "tickets".into(),
            drilldown_label: "Ticket status".into(),
            query_args: String::new(),
            filter: Vec::new(),
        }
    }
}

impl SumStatsConfig {
    pub fn sum_field(&self) -> Option<&str> {
        let field = self.field.trim();
        (!field.is_empty()).then_some(field)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Comma-delimited values, or `*` for every value not claimed by a sibling group.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_args: Option<String>,
    #[serde(default)]
    pub overall_completion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupValues {
    Explicit(Vec<String>),
    Remaining,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn field_name(&self) -> &str {
        self.field
            .as_deref()
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .unwrap_or(DEFAULT_GROUP_FIELD)
    }

    pub fn values(&self) -> GroupValues {
        if self.status.trim() == CATCH_ALL {
            return GroupValues::Remaining;
        }
        GroupValues::Explicit(split_values(&self.status))
    }

    pub fn title(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn css_class(&self) -> &str {
        self.css_class.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldConfig {
    pub name: String,
    #[serde(default = "default_custom_type", rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_custom_type() -> String {
    "text".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub states: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            states: ["new", "assigned", "accepted", "reopened", "closed"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Config {
    pub fn path(root: &Path) -> PathBuf {
        data_dir(root).join(CONFIG_FILE)
    }

    /// Load `<root>/.sumstats/config.yaml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Groups in display order. Missing `order` keys sort as 0, ties keep file order.
    pub fn groups(&self) -> Vec<GroupDefinition> {
        let mut groups = if self.milestone_groups.is_empty() {
            default_groups()
        } else {
            self.milestone_groups.clone()
        };
        groups.sort_by_key(|group| group.order.unwrap_or(0));
        groups
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.sumstats.filter {
            parse_filter(entry)?;
        }
        validate_groups(&self.groups())
    }
}

pub fn default_groups() -> Vec<GroupDefinition> {
    vec![
        GroupDefinition {
            overall_completion: true,
            ..GroupDefinition::new("closed", "closed")
        },
        GroupDefinition {
            css_class: Some("open".into()),
            ..GroupDefinition::new("active", CATCH_ALL)
        },
    ]
}

/// Reject a second catch-all on one field, or a value claimed by two groups on one field.
pub fn validate_groups(groups: &[GroupDefinition]) -> Result<()> {
    let mut catch_all_by_field = BTreeMap::<&str, &str>::new();
    let mut claimed = BTreeMap::<&str, BTreeMap<String, &str>>::new();

    for group in groups {
        let field = group.field_name();
        match group.values() {
            GroupValues::Remaining => {
                if let Some(previous) = catch_all_by_field.insert(field, &group.name) {
                    return Err(SumStatsError::Configuration(format!(
                        "groups '{previous}' and '{}' both use '{CATCH_ALL}' for field '{field}'",
                        group.name
                    )));
                }
            }
            GroupValues::Explicit(values) => {
                let seen = claimed.entry(field).or_default();
                let mut own = BTreeSet::new();
                for value in values {
                    if !own.insert(value.clone()) {
                        continue;
                    }
                    if let Some(previous) = seen.insert(value.clone(), &group.name) {
                        return Err(SumStatsError::Configuration(format!(
                            "value '{value}' of field '{field}' is claimed by groups '{previous}' and '{}'",
                            group.name
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

pub fn split_values(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .collect()
}
