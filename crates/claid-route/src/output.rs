use std::collections::BTreeMap;

use serde::Serialize;

use claid_routing::{Route, RouteStrategy};

/// Text for terminals, or one JSON document on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn from_flag(json: bool) -> Self {
        if json {
            Format::Json
        } else {
            Format::Text
        }
    }
}

#[derive(Serialize)]
struct RouteReport<'a> {
    from: &'a str,
    to: &'a str,
    direction: String,
    path: &'a [String],
    next_hop: Option<&'a str>,
}

pub fn print_route(format: Format, from: &str, to: &str, route: &Route) -> anyhow::Result<()> {
    match format {
        Format::Text => {
            println!("{from} -> {to} ({})", route.direction);
            println!("  path: {}", route.path.join(" -> "));
            if let Some(next) = route.next_hop() {
                println!("  next hop: {next}");
            }
        }
        Format::Json => {
            let report = RouteReport {
                from,
                to,
                direction: route.direction.to_string(),
                path: &route.path,
                next_hop: route.next_hop(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

pub fn print_table(
    format: Format,
    host: &str,
    table: &BTreeMap<String, RouteStrategy>,
) -> anyhow::Result<()> {
    match format {
        Format::Text => {
            println!("routing table of {host}:");
            let width = table.keys().map(String::len).max().unwrap_or(0);
            for (target, strategy) in table {
                println!("  {target:<width$}  {strategy}");
            }
        }
        Format::Json => {
            let table: BTreeMap<&str, String> = table
                .iter()
                .map(|(target, strategy)| (target.as_str(), strategy.to_string()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct CheckReport {
    pub hosts: usize,
    pub modules: usize,
    pub root: String,
    pub problems: Vec<String>,
}

pub fn print_check(format: Format, report: &CheckReport) -> anyhow::Result<()> {
    match format {
        Format::Text => {
            println!(
                "{} hosts, {} modules, root {}",
                report.hosts, report.modules, report.root
            );
            if report.problems.is_empty() {
                println!("configuration OK");
            }
            for problem in &report.problems {
                println!("  problem: {problem}");
            }
        }
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}
