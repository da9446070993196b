//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("kvparity")
        .about("Seed key-value servers with one workload and verify they agree")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("target")
                .long("target")
                .short('t')
                .help("Target address as host:port or a bare port (repeatable)")
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Path to kvparity.toml (default: built-in defaults)")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(with_run_args(
            Command::new("run").about("Seed every target until the deviation target is reached"),
        ))
        .subcommand(with_run_args(Command::new("check").about(
            "Seed every target, capture each, and compare the first against the rest",
        )))
        .subcommand(Command::new("capture").about("Print the snapshot of every target"))
        .subcommand(
            Command::new("compare").about("Capture every target and compare the first against the rest"),
        )
        .subcommand(
            Command::new("init")
                .about("Write a commented default kvparity.toml")
                .arg(Arg::new("path").help("Output path (default: ./kvparity.toml)")),
        )
}

fn with_run_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("deviation")
            .long("deviation")
            .short('d')
            .help("Target deviation in [0, 1]")
            .value_parser(clap::value_parser!(f64))
            .default_value("0.1"),
    )
    .arg(
        Arg::new("seed")
            .long("seed")
            .help("Override workload.seed")
            .value_parser(clap::value_parser!(u64)),
    )
    .arg(
        Arg::new("keys")
            .long("keys")
            .help("Override workload.keys")
            .value_parser(clap::value_parser!(u64)),
    )
    .arg(
        Arg::new("flush")
            .long("flush")
            .help("FLUSHALL every target before seeding")
            .action(ArgAction::SetTrue),
    )
}
