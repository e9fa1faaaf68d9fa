use thiserror::Error;

#[derive(Debug, Error)]
pub enum SumStatsError {
    #[error("not a sumstats directory (run `sumstats init` first)")]
    NotInitialized,

    #[error("sumstats already initialized in this directory")]
    AlreadyInitialized,

    #[error("ticket field '{0}' not found")]
    FieldNotFound(String),

    #[error("milestone {0} not found")]
    MilestoneNotFound(String),

    #[error("no provided or current milestone")]
    NoCurrentMilestone,

    #[error("unable to parse query {0}")]
    MalformedColumnQuery(String),

    #[error("unknown column '{0}' (expected total, todo or done)")]
    UnknownColumn(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid import plan: {0}")]
    ImportInvalidSpec(String),

    #[error("ticket {0} not found")]
    TicketNotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl SumStatsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::FieldNotFound(_) => "field_not_found",
            Self::MilestoneNotFound(_) => "milestone_not_found",
            Self::NoCurrentMilestone => "no_current_milestone",
            Self::MalformedColumnQuery(_) => "malformed_column_query",
            Self::UnknownColumn(_) => "unknown_column",
            Self::Configuration(_) => "configuration_error",
            Self::ImportInvalidSpec(_) => "import_invalid_spec",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SumStatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_snake_case() {
        assert_eq!(
            SumStatsError::FieldNotFound("hours".into()).code(),
            "field_not_found"
        );
        assert_eq!(SumStatsError::NoCurrentMilestone.code(), "no_current_milestone");
        assert_eq!(
            SumStatsError::MalformedColumnQuery("x".into()).to_string(),
            "unable to parse query x"
        );
    }
}
