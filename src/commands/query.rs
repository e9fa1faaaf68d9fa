use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::datasource::{DataSourceRequest, respond};
use crate::error::Result;
use crate::metrics::burndown::HistoryStrategy;
use crate::output::{self, Format};
use crate::store::repo::Repo;

/// Answer a data-source request as the web endpoint would. JSON format wraps
/// the response in `{status, content_type, body}`; other formats print the body.
pub fn run(
    root: &Path,
    request: DataSourceRequest,
    as_of: Option<DateTime<Utc>>,
    strategy: HistoryStrategy,
    format: Format,
) -> Result<()> {
    let repo = Repo::open(root)?;
    let response = respond(&repo, &request, as_of.unwrap_or_else(Utc::now), strategy);

    match format {
        Format::Json => output::print_json(&json!({
            "status": response.status,
            "content_type": response.content_type,
            "body": response.body,
        }))?,
        Format::Pretty | Format::Minimal => println!("{}", response.body.trim_end()),
    }
    Ok(())
}
