use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sumstats::datasource::DataSourceRequest;
use sumstats::metrics::burndown::HistoryStrategy;
use sumstats::output::Format;

#[derive(Parser)]
#[command(
    name = "sumstats",
    version,
    about = "Milestone group stats and burndown reconstruction for issue trackers"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Debug logging on stderr (overridden by SUMSTATS_LOG / RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Directory holding .sumstats/ (default: nearest ancestor of the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .sumstats/ with an empty ticket database and default config
    Init,
    /// Seed milestones, options, tickets and their change history from a YAML plan
    Import {
        /// Plan file path, or - for stdin
        source: String,
        /// Validate the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Grouped ticket stats for a milestone or an explicit ticket set
    Stats {
        /// Tickets currently in this milestone
        #[arg(long, conflicts_with = "ids")]
        milestone: Option<String>,
        /// Explicit ticket IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },
    /// Day-by-day burndown reconstructed from the change log
    Burndown {
        /// Milestone name (default: the current milestone)
        milestone: Option<String>,
        /// Treat this instant as now (RFC 3339)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Point-in-time lookup strategy
        #[arg(long, value_enum, default_value = "query")]
        history: HistoryStrategy,
    },
    /// Answer a chart data-source request
    Query {
        /// Referring page URL; a /milestone/<name> path selects the milestone
        #[arg(long)]
        referer: Option<String>,
        /// Column query, e.g. "select done,todo"
        #[arg(long)]
        tq: Option<String>,
        /// Wire options, e.g. "reqId:1"
        #[arg(long)]
        tqx: Option<String>,
        /// Treat this instant as now (RFC 3339)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Point-in-time lookup strategy
        #[arg(long, value_enum, default_value = "query")]
        history: HistoryStrategy,
    },
    /// List ticket fields with their storage and options
    Fields,
}

fn resolve_root(explicit: Option<&Path>) -> sumstats::error::Result<PathBuf> {
    match explicit {
        Some(root) => Ok(root.to_path_buf()),
        None => {
            let cwd = std::env::current_dir()?;
            sumstats::store::repo::find_repo_root(&cwd)
        }
    }
}

fn run(cli: Cli, format: Format) -> sumstats::error::Result<()> {
    if let Commands::Init = cli.command {
        let root = match cli.root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        return sumstats::commands::init::run(&root);
    }

    let root = resolve_root(cli.root.as_deref())?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Import { source, dry_run } => {
            sumstats::commands::import::run(&root, source, dry_run, format)
        }
        Commands::Stats { milestone, ids } => {
            sumstats::commands::stats::run(&root, milestone, ids, format)
        }
        Commands::Burndown {
            milestone,
            as_of,
            history,
        } => sumstats::commands::burndown::run(&root, milestone, as_of, history, format),
        Commands::Query {
            referer,
            tq,
            tqx,
            as_of,
            history,
        } => sumstats::commands::query::run(
            &root,
            DataSourceRequest { referer, tq, tqx },
            as_of,
            history,
            format,
        ),
        Commands::Fields => sumstats::commands::fields::run(&root, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn explicit_root_is_used_as_given() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve_root(Some(dir.path())).unwrap(), dir.path());
    }

    #[test]
    fn stats_accepts_comma_separated_ids() {
        let cli = Cli::parse_from(["sumstats", "stats", "--ids", "1,2,3"]);
        let Commands::Stats { ids, milestone } = cli.command else {
            panic!("expected stats command");
        };
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(milestone, None);
    }
}

fn main() {
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    sumstats::logging::init(cli.verbose);
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
