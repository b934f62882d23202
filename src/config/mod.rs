use crate::reshape::Palette;
use crate::viewer::ChartPresenter;

use clap::ArgMatches;
use serde::Deserialize;
use tracing::Level;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

mod general;
mod log;

use general::General;
use log::Log;

fn listen() -> String {
    "127.0.0.1:4243".into()
}

fn title() -> String {
    "logvis".into()
}

#[derive(Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    log: Log,
    #[serde(default)]
    palette: Palette,
}

impl Config {
    /// Loads the file named by `--config`, or the defaults without one.
    pub fn from_args(args: &ArgMatches) -> Result<Self, String> {
        match args.get_one::<PathBuf>("CONFIG") {
            Some(path) => Config::load(path)
                .map_err(|e| format!("error loading config file: {}\n{e}", path.display())),
            None => Ok(Config::default()),
        }
    }

    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("unable to open config file: {e}"))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| format!("failed to parse config file: {e}"))?;

        config.general.check()?;
        config.palette.check()?;

        Ok(config)
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn presenter(&self) -> ChartPresenter {
        ChartPresenter::new(self.palette().clone(), self.general.title())
    }
}
