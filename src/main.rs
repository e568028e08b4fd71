//! fleetwall - fleet firewall compiler
//!
//! # Usage
//!
//! ```bash
//! fleetwall build fleet.json                 # Build every server into ./build
//! fleetwall build fleet.json --server web    # Build one server
//! fleetwall check fleet.json                 # Validate without writing
//! fleetwall show fleet.json web              # Print web's rule set
//! fleetwall diff fleet.json web              # Compare against build/firewall/web.iptables
//! fleetwall init fleet.json                  # Write a starter topology
//! fleetwall --settings settings.json build fleet.json
//! ```

use clap::{Parser, Subcommand};
use fleetwall::config::load_settings;
use fleetwall::core::loader::{load_firewall, save_firewall};
use fleetwall::core::topology::{Firewall, Network, Rule, Server, Service};
use fleetwall::core::validate::{check_relations, validate_structure};
use fleetwall::{build_all, build_server, compile_server, diff_server};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "fleetwall")]
#[command(about = "Compile a fleet topology into per-server iptables rule sets", long_about = None)]
struct Cli {
    /// Settings file (default: settings.json in the config dir)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every server, or one with --server
    Build {
        /// Topology file
        topology: PathBuf,
        /// Build only this server
        #[arg(short, long, value_name = "NAME")]
        server: Option<String>,
    },
    /// Validate the topology and every server's references
    Check {
        topology: PathBuf,
    },
    /// Print one server's compiled rule set
    Show {
        topology: PathBuf,
        server: String,
    },
    /// Diff one server's compiled rule set against the built file
    Diff {
        topology: PathBuf,
        server: String,
    },
    /// Write a starter two-server topology
    Init {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, cli.settings.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, settings_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Build { topology, server } => {
            let fleet = load_firewall(&topology)?;
            let settings = load_settings(settings_path)?;
            let report = match server {
                Some(name) => build_server(&fleet, &settings, &name)?,
                None => build_all(&fleet, &settings)?,
            };
            println!(
                "Built {} server(s), {} file(s) in {}",
                report.servers.len(),
                report.files.len(),
                settings.build_path.display()
            );
        }
        Commands::Check { topology } => {
            let fleet = load_firewall(&topology)?;
            validate_structure(&fleet)?;
            for name in fleet.servers.keys() {
                check_relations(&fleet, name)?;
                println!("{name}: ok");
            }
        }
        Commands::Show { topology, server } => {
            let fleet = load_firewall(&topology)?;
            print!("{}", compile_server(&fleet, &server)?);
        }
        Commands::Diff { topology, server } => {
            let fleet = load_firewall(&topology)?;
            let settings = load_settings(settings_path)?;
            match diff_server(&fleet, &settings, &server)? {
                Some(diff) => print!("{diff}"),
                None => println!("no changes"),
            }
        }
        Commands::Init { path, force } => {
            if path.exists() && !force {
                return Err(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )
                .into());
            }
            save_firewall(&path, &starter_topology())?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// `web` reaching `db`'s mysql over a shared backend network
fn starter_topology() -> Firewall {
    let accept_inbound = Rule::new(
        "-A INPUT -i {{.DestinationNetworkName}} -s {{.SourceNetwork.IP}} \
         -d {{.DestinationNetwork.IP}} -p tcp --dport {{.DestinationService.Port}} -j ACCEPT",
    );

    let mut db_backend = Network::new("10.0.0.10");
    db_backend.hosts = vec!["db".into()];
    db_backend
        .services_acquirable
        .insert("mysql".into(), Service::new(3306, [accept_inbound]));
    db_backend.services_passive.insert(
        "ssh".into(),
        Service::new(
            22,
            [Rule::new(
                "-A INPUT -i {{.NetworkName}} -p tcp --dport {{.Service.Port}} -j ACCEPT",
            )],
        ),
    );

    let mut web_backend = Network::new("10.0.0.20");
    web_backend.depend_on("db", "backend", "mysql", None);

    let mut web_public = Network::new("192.0.2.20");
    web_public.services_passive.insert(
        "https".into(),
        Service::new(
            443,
            [Rule::new(
                "-A INPUT -i {{.NetworkName}} -d {{.Network.IP}} -p tcp --dport {{.Service.Port}} -j ACCEPT",
            )],
        ),
    );

    let db = Server {
        hostname: "db-01".into(),
        networks: [("backend".to_string(), db_backend)].into(),
        ..Server::default()
    };
    let web = Server {
        hostname: "web-01".into(),
        hosts_dependencies: [("db".to_string(), vec!["backend".to_string()])].into(),
        networks: [
            ("backend".to_string(), web_backend),
            ("public".to_string(), web_public),
        ]
        .into(),
        ..Server::default()
    };

    Firewall {
        servers: [("db".to_string(), db), ("web".to_string(), web)].into(),
        firewall_rules_before: vec![
            Rule::new("-P INPUT DROP"),
            Rule::new("-P FORWARD DROP"),
            Rule::new("-P OUTPUT ACCEPT"),
            Rule::new("-A INPUT -i lo -j ACCEPT"),
            Rule::new("-A INPUT -m state --state ESTABLISHED,RELATED -j ACCEPT"),
        ],
        ..Firewall::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_starter_topology_compiles() {
        let fleet = starter_topology();
        fleetwall::core::validate::validate(&fleet).unwrap();
        let db = compile_server(&fleet, "db").unwrap();
        assert!(db.contains("## Source Server: web\n"));
        assert!(db.contains("-s 10.0.0.20 -d 10.0.0.10 -p tcp --dport 3306 -j ACCEPT\n"));
        let web = compile_server(&fleet, "web").unwrap();
        assert!(web.contains("--dport 443"));

        for text in [&db, &web] {
            assert!(text.starts_with("*filter\n"));
            assert_eq!(text.matches("*filter").count(), 1);
            assert_eq!(text.matches("COMMIT").count(), 2);
        }
    }
}
