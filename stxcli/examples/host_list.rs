//! Host inventory example: list hosts and wait for one to become available
//!
//! This example loads a lab description, runs `system host-list` on the
//! active controller with admin credentials and prints the parsed table.
//! With `--wait <hostname>` it then tracks that host until its
//! availability reads `available`.
//!
//! # Prerequisites
//!
//! - A lab description JSON file (see `StaticInventory`)
//! - A `credential_profiles.admin` entry in it
//!
//! # Usage
//!
//! ```bash
//! cargo run --example host_list -- --lab lab.json
//! cargo run --example host_list -- --lab lab.json --wait compute-0 --timeout 1800
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stxcli::dispatch::Invocation;
use stxcli::registry::{SessionName, SessionRegistry, StaticInventory};
use stxcli::table;
use stxcli::tracker::{Poller, TrackSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let inventory = StaticInventory::from_path(&args.lab)?;
    let mut registry = SessionRegistry::ssh(Arc::new(inventory));

    let list = Invocation::builder("system", "host-list", Duration::from_secs(60))
        .credentials("admin")
        .build();

    stxcli::log_step("List hosts");
    let result = registry.run(&SessionName::ActiveController, &list).await?;
    let hosts = table::parse_horizontal(&result.lines)?;

    println!("{}", "-".repeat(60));
    for host in &hosts {
        println!(
            "{:<16} {:<12} {:<10} {}",
            host["hostname"], host["personality"], host["administrative"], host["availability"]
        );
    }
    println!("{}", "-".repeat(60));

    if let Some(hostname) = &args.wait {
        stxcli::log_step(&format!("Wait for {hostname} to become available"));

        let show = Invocation::builder("system", "host-show", Duration::from_secs(60))
            .credentials("admin")
            .arg(hostname.as_str())
            .build();
        let spec = TrackSpec::for_states(
            format!("{hostname} available"),
            &["available"],
            &["failed"],
            Duration::from_secs(args.timeout),
            Duration::from_secs(20),
        );

        let mut poller = Poller::new(&spec);
        let report = loop {
            let result = registry.run(&SessionName::ActiveController, &show).await?;
            let record = table::parse_vertical(&result.lines)?;
            let availability = record.get("availability").cloned().unwrap_or_default();
            if let Some(report) = poller.observe(availability).await? {
                break report;
            }
        };
        println!("{:?} after {:?} ({} probes)", report.outcome, report.elapsed, report.probes);
        report.into_result()?;
    }

    registry.close_all().await;
    println!("Done!");

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    lab: PathBuf,
    wait: Option<String>,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut lab = PathBuf::from("lab.json");
        let mut wait = None;
        let mut timeout = 1800u64;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--lab" | "-l" => {
                    i += 1;
                    if i < args.len() {
                        lab = PathBuf::from(&args[i]);
                    }
                }
                "--wait" | "-w" => {
                    i += 1;
                    if i < args.len() {
                        wait = Some(args[i].clone());
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(1800);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self { lab, wait, timeout }
    }

    fn print_help() {
        println!(
            r#"stxcli host_list example

USAGE:
    cargo run --example host_list -- [OPTIONS]

OPTIONS:
    -l, --lab <PATH>         Lab description JSON [default: lab.json]
    -w, --wait <HOSTNAME>    Track a host until it is available
    -t, --timeout <SECS>     Tracking deadline [default: 1800]
    --help                   Print this help message
"#
        );
    }
}
