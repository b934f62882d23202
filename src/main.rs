use backtrace::Backtrace;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

mod aggregate;
mod config;
mod logs;
mod render;
mod reshape;
mod viewer;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "logvis draws one chart per metric from client and server performance logs, \
            with each log source keeping the same color and symbol across charts.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(viewer::command())
        .subcommand(render::command())
        .subcommand(aggregate::command())
        .get_matches();

    match matches.subcommand() {
        Some(("view", args)) => {
            let config = viewer::Config::try_from(args.clone()).unwrap_or_else(|e| fail(e));
            viewer::run(config)
        }
        Some(("render", args)) => {
            let config = render::Config::try_from(args.clone()).unwrap_or_else(|e| fail(e));
            render::run(config)
        }
        Some(("aggregate", args)) => {
            let config = aggregate::Config::try_from(args.clone()).unwrap_or_else(|e| fail(e));
            aggregate::run(config)
        }
        _ => {
            unimplemented!()
        }
    }
}

fn fail(error: String) -> ! {
    eprintln!("{error}");
    std::process::exit(1);
}

/// Sends human readable logs to stderr. Only the first call in a process
/// takes effect.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// One `-v` raises the configured level to at least debug, two or more give
/// trace.
pub fn verbosity(configured: Level, verbose: u8) -> Level {
    match verbose {
        0 => configured,
        1 => configured.max(Level::DEBUG),
        _ => Level::TRACE,
    }
}

pub fn config_arg() -> Arg {
    Arg::new("CONFIG")
        .long("config")
        .short('c')
        .help("logvis configuration file")
        .value_parser(value_parser!(PathBuf))
        .action(ArgAction::Set)
}

pub fn verbose_arg() -> Arg {
    Arg::new("VERBOSE")
        .long("verbose")
        .short('v')
        .help("Increase the verbosity")
        .action(ArgAction::Count)
}
