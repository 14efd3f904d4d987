mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use claid_routing::{
    ClientTable, Configuration, HostUserTable, MasterRouter, ModuleTable, RouterConfig,
    RoutingTree,
};
use output::{CheckReport, Format};

#[derive(Parser)]
#[command(name = "claid-route", about = "Inspect CLAID routing topologies")]
struct Cli {
    /// Deployment configuration (JSON).
    #[arg(short, long, default_value = "claid.json")]
    config: PathBuf,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the routing tree, one Host per line.
    Tree,

    /// Resolve the route between two Hosts, as seen from the source.
    Route {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },

    /// Show which strategy a Host uses for every other Host.
    Table {
        #[arg(long)]
        host: String,
    },

    /// Validate topology and Module channel bindings of every Host.
    Check,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = Format::from_flag(cli.json);
    let config = Configuration::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Tree => {
            let tree = RoutingTree::from_hosts(&config.hosts)?;
            match format {
                Format::Text => print!("{tree}"),
                Format::Json => {
                    let hosts: Vec<_> = tree
                        .hosts()
                        .map(|h| serde_json::json!({ "host": h, "parent": tree.parent_of(h) }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&hosts)?);
                }
            }
        }

        Command::Route { from, to } => {
            let tree = RoutingTree::from_hosts(&config.hosts)?;
            let route = tree.route_between(&from, &to)?;
            output::print_route(format, &from, &to, &route)?;
        }

        Command::Table { host } => {
            let mut router = master_router(&host);
            router
                .build_routing_table(&config.hosts)
                .with_context(|| format!("building routing table of {host}"))?;
            output::print_table(format, &host, &router.routing_table())?;
        }

        Command::Check => {
            let report = check(&config);
            output::print_check(format, &report)?;
            if !report.problems.is_empty() {
                bail!("{} problem(s) found", report.problems.len());
            }
        }
    }

    Ok(())
}

fn master_router(host: &str) -> MasterRouter {
    MasterRouter::new(
        host,
        Arc::new(ModuleTable::new()),
        Arc::new(HostUserTable::new()),
        Arc::new(ClientTable::new()),
        RouterConfig::default(),
    )
}

/// Apply the configuration on every Host, the way each would at startup.
fn check(config: &Configuration) -> CheckReport {
    let mut report = CheckReport {
        hosts: config.hosts.len(),
        modules: config.modules.len(),
        ..CheckReport::default()
    };

    match RoutingTree::from_hosts(&config.hosts) {
        Ok(tree) => report.root = tree.root_name().to_string(),
        Err(e) => {
            report.problems.push(format!("topology: {e}"));
            return report;
        }
    }

    for module in &config.modules {
        if !config.hosts.contains(&module.host) {
            report.problems.push(format!(
                "module {} runs on unknown host {}",
                module.id, module.host
            ));
        }
    }

    for host in config.hosts.iter() {
        let mut router = master_router(&host.hostname);
        if let Err(e) = router.reconfigure(config) {
            report.problems.push(format!("{}: {e}", host.hostname));
        }
    }
    report
}
