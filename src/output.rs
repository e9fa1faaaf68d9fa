use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::fields::FieldCatalog;
use crate::metrics::burndown::BurndownReport;
use crate::metrics::stats::StatsReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Render a number without a trailing `.0` when it is whole.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

pub fn print_stats(report: &StatsReport, format: Format) -> Result<()> {
    let stats = &report.stats;
    match format {
        Format::Json => print_json(report)?,
        Format::Pretty => {
            if let Some(milestone) = &report.milestone {
                println!("{} {}", "Milestone".bold(), milestone.cyan());
            }
            println!(
                "{} ({}): {} total, {} done ({}%)",
                stats.title.bold(),
                stats.unit,
                format_amount(stats.count),
                format_amount(stats.done_count),
                format_amount(stats.done_percent)
            );
            for interval in &stats.intervals {
                let args = interval
                    .query_args
                    .iter()
                    .map(|(key, values)| format!("{key}={}", values.join("|")))
                    .collect::<Vec<_>>()
                    .join(" ");
                let title = if interval.overall_completion {
                    interval.title.green().to_string()
                } else {
                    interval.title.clone()
                };
                println!(
                    "  {:<16} {:>8} {:>4}%  {}",
                    title,
                    format_amount(interval.count),
                    format_amount(interval.percent),
                    args.dimmed()
                );
            }
        }
        Format::Minimal => {
            for interval in &stats.intervals {
                println!(
                    "{}\t{}\t{}",
                    interval.title,
                    format_amount(interval.count),
                    format_amount(interval.percent)
                );
            }
        }
    }
    Ok(())
}

pub fn print_burndown(report: &BurndownReport, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(report)?,
        Format::Pretty => {
            let unit = report.sum_field.as_deref().unwrap_or("tickets");
            println!(
                "{} {} ({} .. {}, data through {})",
                "Burndown".bold(),
                report.milestone.cyan(),
                report.range.start.date_naive(),
                report.range.buffer.date_naive(),
                report.range.end.date_naive()
            );
            println!("  {:<10} {:>8} {:>8} {:>8}  ({unit})", "DAY", "TOTAL", "DONE", "TODO");
            for bucket in &report.days {
                let line = format!(
                    "  {:<10} {:>8} {:>8} {:>8}",
                    bucket.day.to_string(),
                    format_amount(bucket.total),
                    format_amount(bucket.done),
                    format_amount(bucket.todo)
                );
                if bucket.day > report.range.end.date_naive() {
                    println!("{}", line.dimmed());
                } else {
                    println!("{line}");
                }
            }
        }
        Format::Minimal => {
            for bucket in &report.days {
                println!(
                    "{}\t{}\t{}\t{}",
                    bucket.day,
                    format_amount(bucket.total),
                    format_amount(bucket.done),
                    format_amount(bucket.todo)
                );
            }
        }
    }
    Ok(())
}

pub fn print_fields(catalog: &FieldCatalog, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&catalog.iter().collect::<Vec<_>>())?,
        Format::Pretty => {
            for meta in catalog.iter() {
                let storage = if meta.is_custom() { "custom" } else { "builtin" };
                println!("{} ({}) {}", meta.name().bold(), storage, meta.label.dimmed());
                if !meta.options.is_empty() {
                    println!("  options: {}", meta.options.join(", "));
                }
            }
        }
        Format::Minimal => {
            for meta in catalog.iter() {
                println!("{}", meta.name());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_amounts_drop_the_fraction() {
        assert_eq!(format_amount(5.0), "5");
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(2.5), "2.50");
    }
}
