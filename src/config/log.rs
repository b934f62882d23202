use super::*;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default = "log_level")]
    level: LevelDef,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: log_level() }
    }
}

impl Log {
    pub fn level(&self) -> Level {
        self.level.into()
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LevelDef {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LevelDef> for Level {
    fn from(level: LevelDef) -> Self {
        match level {
            LevelDef::Error => Level::ERROR,
            LevelDef::Warn => Level::WARN,
            LevelDef::Info => Level::INFO,
            LevelDef::Debug => Level::DEBUG,
            LevelDef::Trace => Level::TRACE,
        }
    }
}

fn log_level() -> LevelDef {
    LevelDef::Info
}
