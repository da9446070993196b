//! kvparity CLI: seed, capture and compare key-value servers.
//!
//! - `kvparity run -t A -t B` seeds every target with the same workload
//! - `kvparity check -t A -t B` seeds, captures and compares; exits 1 on mismatch
//! - `kvparity capture -t A` prints a snapshot
//! - `kvparity compare -t A -t B` compares targets without seeding
//! - `kvparity init` writes a commented default config file
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

mod commands;
mod format;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::ArgMatches;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kvparity_seeder::{Endpoint, Error, Result, Seeder, SeederConfig, CONFIG_FILE_NAME};

use commands::build_cli;
use format::{format_diff, format_error, format_run, format_snapshot, OutputMode};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match dispatch(&matches, mode).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            ExitCode::from(2)
        }
    }
}

/// Run the selected subcommand. `Ok(false)` means the targets disagree.
async fn dispatch(matches: &ArgMatches, mode: OutputMode) -> Result<bool> {
    let Some((name, sub)) = matches.subcommand() else {
        return Err(Error::invalid_config("no subcommand given"));
    };
    if name == "init" {
        let path = sub
            .get_one::<String>("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        return init(&path);
    }

    let config = load_config(sub, name)?;
    let targets = targets(sub)?;
    let seeder = Seeder::connect(&targets, config).await?;

    match name {
        "run" => {
            seed(&seeder, sub, mode).await?;
            Ok(true)
        }
        "check" => {
            seed(&seeder, sub, mode).await?;
            compare_all(&seeder, &targets, mode).await
        }
        "compare" => compare_all(&seeder, &targets, mode).await,
        "capture" => {
            for target in &targets {
                let handle = seeder.capture(target).await?;
                println!("{}", format_snapshot(&*seeder.snapshot(handle)?, mode));
            }
            Ok(true)
        }
        other => Err(Error::invalid_config(format!("unknown subcommand '{}'", other))),
    }
}

fn init(path: &Path) -> Result<bool> {
    if path.exists() {
        return Err(Error::invalid_config(format!(
            "{} already exists",
            path.display()
        )));
    }
    SeederConfig::write_default_if_missing(path)?;
    println!("Wrote {}", path.display());
    Ok(true)
}

fn load_config(sub: &ArgMatches, name: &str) -> Result<SeederConfig> {
    let mut config = match sub.get_one::<String>("config") {
        Some(path) => SeederConfig::from_file(Path::new(path))?,
        None => SeederConfig::default(),
    };
    if name == "run" || name == "check" {
        if let Some(seed) = sub.get_one::<u64>("seed") {
            config.workload.seed = *seed;
        }
        if let Some(keys) = sub.get_one::<u64>("keys") {
            config.workload.keys = *keys;
        }
    }
    config.validate()?;
    Ok(config)
}

fn targets(sub: &ArgMatches) -> Result<Vec<Endpoint>> {
    let targets: Vec<Endpoint> = sub
        .get_many::<String>("target")
        .into_iter()
        .flatten()
        .map(|s| s.parse())
        .collect::<Result<_>>()?;
    if targets.is_empty() {
        return Err(Error::invalid_config("at least one --target is required"));
    }
    Ok(targets)
}

async fn seed(seeder: &Seeder, sub: &ArgMatches, mode: OutputMode) -> Result<()> {
    if sub.get_flag("flush") {
        seeder.flush_all().await?;
    }
    let deviation = sub.get_one::<f64>("deviation").copied().unwrap_or(0.1);

    let cancel = seeder.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "kvparity::cli", "Interrupted; finishing in-flight batch");
            cancel.cancel();
        }
    });
    let report = seeder.run(deviation).await;
    interrupt.abort();

    println!("{}", format_run(&report?, mode));
    Ok(())
}

async fn compare_all(seeder: &Seeder, targets: &[Endpoint], mode: OutputMode) -> Result<bool> {
    let Some((first, rest)) = targets.split_first() else {
        return Ok(true);
    };
    let reference = seeder.capture(first).await?;
    let mut consistent = true;
    for target in rest {
        let handle = seeder.capture(target).await?;
        let report = seeder.compare_report(reference, handle).await?;
        consistent &= report.is_consistent();
        println!("{}", format_diff(&report, mode));
        seeder.release(handle)?;
    }
    Ok(consistent)
}
