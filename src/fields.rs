//! Ticket field resolution: built-in columns versus custom side-table fields.

use serde::Serialize;

use crate::config::Config;
use crate::error::{Result, SumStatsError};
use crate::store::db::TicketDb;

/// Columns of the `ticket` table. A `FieldRef::Builtin` can only name one of these.
pub const BUILTIN_FIELDS: &[&str] = &[
    "summary",
    "reporter",
    "owner",
    "cc",
    "description",
    "type",
    "status",
    "priority",
    "severity",
    "milestone",
    "component",
    "version",
    "resolution",
    "keywords",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "storage", content = "name", rename_all = "snake_case")]
pub enum FieldRef {
    Builtin(&'static str),
    Custom(String),
}

impl FieldRef {
    /// Map a name onto the static built-in column list.
    pub fn builtin(name: &str) -> Option<Self> {
        BUILTIN_FIELDS
            .iter()
            .copied()
            .find(|column| *column == name)
            .map(Self::Builtin)
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Builtin(name) => name,
            Self::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMeta {
    pub field: FieldRef,
    pub label: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FieldMeta {
    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn is_custom(&self) -> bool {
        self.field.is_custom()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCatalog {
    fields: Vec<FieldMeta>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self { fields }
    }

    /// Build the catalog from the ticket database's option tables and the configured custom fields.
    pub fn load(db: &TicketDb, config: &Config) -> Result<Self> {
        let mut fields = Vec::with_capacity(BUILTIN_FIELDS.len() + config.ticket_custom.len());

        for &name in BUILTIN_FIELDS {
            let options = match name {
                "status" => config.workflow.states.clone(),
                "milestone" => db
                    .milestones(true)?
                    .into_iter()
                    .map(|milestone| milestone.name)
                    .collect(),
                "component" | "version" => db.named_values(name)?,
                "type" | "priority" | "severity" | "resolution" => db.enum_values(name)?,
                _ => Vec::new(),
            };
            fields.push(FieldMeta {
                field: FieldRef::Builtin(name),
                label: label_for(name),
                options,
            });
        }

        for custom in &config.ticket_custom {
            if FieldRef::builtin(&custom.name).is_some() {
                return Err(SumStatsError::Configuration(format!(
                    "custom field '{}' shadows a built-in field",
                    custom.name
                )));
            }
            fields.push(FieldMeta {
                field: FieldRef::custom(custom.name.clone()),
                label: custom
                    .label
                    .clone()
                    .unwrap_or_else(|| label_for(&custom.name)),
                options: custom.options.clone(),
            });
        }

        Ok(Self { fields })
    }

    pub fn resolve(&self, name: &str) -> Result<&FieldMeta> {
        self.fields
            .iter()
            .find(|meta| meta.name() == name)
            .ok_or_else(|| SumStatsError::FieldNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter()
    }
}

fn label_for(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomFieldConfig;
    use crate::model::Milestone;

    #[test]
    fn builtin_lookup_is_closed_over_known_columns() {
        assert_eq!(FieldRef::builtin("status"), Some(FieldRef::Builtin("status")));
        assert_eq!(FieldRef::builtin("status; DROP TABLE ticket"), None);
    }

    #[test]
    fn resolves_builtin_and_custom_fields() {
        let db = TicketDb::open_memory().unwrap();
        db.upsert_milestone(&Milestone::new("M1")).unwrap();
        db.add_enum("resolution", "fixed").unwrap();
        db.add_enum("resolution", "wontfix").unwrap();

        let config = Config {
            ticket_custom: vec![CustomFieldConfig {
                name: "hours".into(),
                kind: "text".into(),
                label: None,
                options: vec![],
            }],
            ..Config::default()
        };
        let catalog = FieldCatalog::load(&db, &config).unwrap();

        let status = catalog.resolve("status").unwrap();
        assert!(!status.is_custom());
        assert!(status.options.contains(&"closed".to_string()));

        assert_eq!(
            catalog.resolve("resolution").unwrap().options,
            vec!["fixed", "wontfix"]
        );
        assert_eq!(catalog.resolve("milestone").unwrap().options, vec!["M1"]);

        let hours = catalog.resolve("hours").unwrap();
        assert!(hours.is_custom());
        assert_eq!(hours.label, "Hours");
    }

    #[test]
    fn unknown_field_is_a_hard_error() {
        let catalog = FieldCatalog::default();
        let err = catalog.resolve("points").unwrap_err();
        assert!(matches!(err, SumStatsError::FieldNotFound(name) if name == "points"));
    }

    #[test]
    fn custom_field_cannot_shadow_builtin() {
        let db = TicketDb::open_memory().unwrap();
        let config = Config {
            ticket_custom: vec![CustomFieldConfig {
                name: "status".into(),
                ..CustomFieldConfig::default()
            }],
            ..Config::default()
        };
        assert!(matches!(
            FieldCatalog::load(&db, &config),
            Err(SumStatsError::Configuration(_))
        ));
    }
}
