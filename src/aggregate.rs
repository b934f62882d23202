//! Combines the per-run result files of a benchmark into one log set.
//!
//! Each `output_app_*` file holds one client's log under `log`, the run's
//! counters and its cpu times. The combined file keeps every client log, the
//! first server log found, the summed counters and the averaged times.

use super::*;
use anyhow::Context;
use clap::{ArgMatches, ValueEnum};
use serde_json::{Map, Number, Value};
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

pub const INPUT_PREFIX: &str = "output_app_";
pub const OUTPUT_FILE: &str = "aggregate_output_app.json";

static TIMES: &[&str] = &["user_time", "system_time", "wall_time"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Experiment {
    Karma,
    #[value(name = "default")]
    Standard,
}

impl Experiment {
    pub fn counters(&self) -> &'static [&'static str] {
        match self {
            Self::Karma => &["npost", "nvote", "ncomment", "nread"],
            Self::Standard => &[
                "nposts",
                "nbackposts",
                "nsubscribes",
                "nchecks",
                "nfull",
                "nposts_read",
                "nactive",
                "nlogouts",
            ],
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum AggregateError {
    #[error("no output_app_* files in {0}")]
    NoInputs(String),
    #[error("{file}: missing `{key}`")]
    MissingKey { file: String, key: &'static str },
    #[error("{file}: `{key}` is not a number")]
    NotANumber { file: String, key: &'static str },
    #[error("{0}: top level is not an object")]
    NotAnObject(String),
}

pub fn command() -> Command {
    Command::new("aggregate")
        .about("Combine per-run output files into one log set")
        .arg(
            clap::Arg::new("DIR")
                .help("Directory holding the output_app_* files")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("EXPERIMENT")
                .long("experiment")
                .short('e')
                .help("Experiment whose counters are summed")
                .value_parser(value_parser!(Experiment))
                .default_value("default")
                .action(clap::ArgAction::Set),
        )
        .arg(config_arg())
        .arg(verbose_arg())
}

pub struct Config {
    dir: PathBuf,
    experiment: Experiment,
    verbose: u8,
    file: config::Config,
}

impl TryFrom<ArgMatches> for Config {
    type Error = String;

    fn try_from(
        args: ArgMatches,
    ) -> Result<Self, <Self as std::convert::TryFrom<clap::ArgMatches>>::Error> {
        Ok(Config {
            dir: args
                .get_one::<PathBuf>("DIR")
                .cloned()
                .ok_or_else(|| "no directory given".to_string())?,
            experiment: args
                .get_one::<Experiment>("EXPERIMENT")
                .copied()
                .unwrap_or(Experiment::Standard),
            verbose: args.get_count("VERBOSE"),
            file: config::Config::from_args(&args)?,
        })
    }
}

pub fn run(config: Config) {
    init_logging(verbosity(config.file.log().level(), config.verbose));

    match aggregate_dir(&config.dir, config.experiment) {
        Ok(path) => info!("wrote {}", path.display()),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// The `output_app_*` files directly inside `dir`, sorted by name.
pub fn inputs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;

        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().starts_with(INPUT_PREFIX)
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Combines the files in `dir` and writes the result next to them.
pub fn aggregate_dir(dir: &Path, experiment: Experiment) -> anyhow::Result<PathBuf> {
    let files = inputs(dir)?;
    debug!("aggregating {} files from {}", files.len(), dir.display());

    if files.is_empty() {
        return Err(AggregateError::NoInputs(dir.display().to_string()).into());
    }

    let combined = aggregate(experiment, &files)?;

    let path = dir.join(OUTPUT_FILE);
    let json = serde_json::to_string_pretty(&combined)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(path)
}

pub fn aggregate(experiment: Experiment, files: &[PathBuf]) -> anyhow::Result<Value> {
    if files.is_empty() {
        return Err(AggregateError::NoInputs("file list".to_string()).into());
    }

    let mut client_logs = Vec::with_capacity(files.len());
    let mut server_logs = None;
    let mut counters: Vec<Total> = experiment
        .counters()
        .iter()
        .map(|_| Total::default())
        .collect();
    let mut times = [0.0; 3];

    for path in files {
        let name = path.display().to_string();

        let content = std::fs::read(path).with_context(|| format!("failed to read {name}"))?;
        let value: Value =
            serde_json::from_slice(&content).with_context(|| format!("invalid json in {name}"))?;
        let mut object = match value {
            Value::Object(object) => object,
            _ => return Err(AggregateError::NotAnObject(name).into()),
        };

        let log = object.remove("log").ok_or_else(|| AggregateError::MissingKey {
            file: name.clone(),
            key: "log",
        })?;
        client_logs.push(log);

        if server_logs.is_none() {
            server_logs = object.remove("server_logs");
        }

        for (total, key) in counters.iter_mut().zip(experiment.counters()) {
            total.add(number(&object, &name, *key)?);
        }

        for (time, key) in times.iter_mut().zip(TIMES) {
            *time += number(&object, &name, *key)?.as_f64().unwrap_or_default();
        }
    }

    let mut output = Map::new();
    output.insert("client_logs".into(), Value::Array(client_logs));
    output.insert(
        "server_logs".into(),
        server_logs.unwrap_or_else(|| Value::Array(Vec::new())),
    );

    for (total, key) in counters.into_iter().zip(experiment.counters()) {
        output.insert(key.to_string(), total.into());
    }

    for (time, key) in times.into_iter().zip(TIMES) {
        output.insert(key.to_string(), Value::from(time / files.len() as f64));
    }

    Ok(Value::Object(output))
}

fn number<'a>(
    object: &'a Map<String, Value>,
    file: &str,
    key: &'static str,
) -> Result<&'a Number, AggregateError> {
    match object.get(key) {
        Some(Value::Number(n)) => Ok(n),
        Some(_) => Err(AggregateError::NotANumber {
            file: file.to_string(),
            key,
        }),
        None => Err(AggregateError::MissingKey {
            file: file.to_string(),
            key,
        }),
    }
}

/// A counter sum that stays an integer until a non-integer value is added.
#[derive(Default)]
struct Total {
    integer: i64,
    float: f64,
    fractional: bool,
}

impl Total {
    fn add(&mut self, value: &Number) {
        self.float += value.as_f64().unwrap_or_default();

        match value.as_i64() {
            Some(v) => self.integer = self.integer.saturating_add(v),
            None => self.fractional = true,
        }
    }
}

impl From<Total> for Value {
    fn from(total: Total) -> Self {
        if total.fractional {
            Value::from(total.float)
        } else {
            Value::from(total.integer)
        }
    }
}
