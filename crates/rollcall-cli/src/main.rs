//! Rollcall command line driver
//!
//! - `week`: current week, its label and tokens for nearby weeks
//! - `config`: print the effective configuration as TOML
//! - `simulate`: run a scripted session against an in-memory ledger

mod demo;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rollcall_engine::{EngineConfig, SystemClock, TemporalAddressor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("rollcall")
        .version(rollcall_engine::VERSION)
        .about("Attendance staging & synchronization engine")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file; defaults are used when omitted"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("week")
                .about("Show the current week and week tokens")
                .arg(
                    Arg::new("span")
                        .long("span")
                        .default_value("2")
                        .value_parser(value_parser!(i64))
                        .help("Also list this many weeks before and after the current one"),
                )
                .arg(
                    Arg::new("decode")
                        .long("decode")
                        .value_name("TOKEN")
                        .help("Resolve a week token instead"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted session against an in-memory ledger")
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Artificial latency of every remote call"),
                )
                .arg(
                    Arg::new("flaky-writes")
                        .long("flaky-writes")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Fail this many batch writes with a transient error first"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<EngineConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::new()),
    }
}

fn week(config: &EngineConfig, args: &ArgMatches) -> Result<()> {
    let clock = Arc::new(SystemClock::with_offset_minutes(config.semester.utc_offset_minutes));
    let addressor = TemporalAddressor::new(&config.semester, clock);

    if let Some(token) = args.get_one::<String>("decode") {
        let week = addressor
            .decode(token)
            .with_context(|| format!("token {token} does not resolve to a semester week"))?;
        println!("{token} -> {week} (week {})", week.ordinal);
        return Ok(());
    }

    let span = *args.get_one::<i64>("span").unwrap_or(&2);
    let weeks: Vec<_> = (-span..=span)
        .filter_map(|offset| addressor.week_info(offset).map(|w| (offset, w)))
        .collect();

    if args.get_flag("json") {
        let entries: Vec<_> = weeks
            .iter()
            .map(|(offset, w)| {
                serde_json::json!({
                    "offset": offset,
                    "ordinal": w.ordinal,
                    "label": w.label,
                    "token": addressor.encode(w),
                })
            })
            .collect();
        let report = serde_json::json!({
            "current_ordinal": addressor.current_ordinal(),
            "semester_weeks": addressor.weeks(),
            "weeks": entries,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match addressor.current_week() {
        Some(current) => println!("Current week: {current} (week {})", current.ordinal),
        None => println!(
            "Outside the semester (week {} of {})",
            addressor.current_ordinal(),
            addressor.weeks()
        ),
    }
    for (offset, w) in &weeks {
        println!("  {offset:+3}  {:<6} {w}", addressor.encode(w));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("week", args)) => week(&config, args)?,
        Some(("config", _)) => {
            let rendered = toml::to_string_pretty(&config).context("rendering configuration")?;
            print!("{rendered}");
        }
        Some(("simulate", args)) => {
            let options = demo::Options {
                latency_ms: *args.get_one::<u64>("latency-ms").unwrap_or(&0),
                flaky_writes: *args.get_one::<usize>("flaky-writes").unwrap_or(&0),
            };
            demo::run(config, options).await?;
        }
        _ => {}
    }
    Ok(())
}
