//! Typed ingress for the raw log blob.
//!
//! The input is a JSON object with `client_logs` and `server_logs`, each an
//! array of log entries. A log entry maps metric names to series, and a series
//! maps timestamps (microseconds, encoded as string keys) to numeric values.
//! Everything is validated here so that reshaping never sees a bad value.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Metrics whose name contains this are raw timestamp axes and never plotted.
const TIMESTAMP_METRIC: &str = "time_us";

const MICROS_PER_SECOND: f64 = 1_000_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReshapeError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid value in `{metric}` of {series}: {reason}")]
    InvalidValue {
        series: SeriesId,
        metric: String,
        reason: String,
    },
}

/// Returns true for metrics that carry the raw timestamp axis.
pub fn is_timestamp_metric(name: &str) -> bool {
    name.contains(TIMESTAMP_METRIC)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Client,
    Server,
}

impl Source {
    fn key(&self) -> &'static str {
        match self {
            Self::Client => "client_logs",
            Self::Server => "server_logs",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Client => "client",
            Self::Server => "server",
        };

        write!(f, "{s}")
    }
}

/// Identifies one log source, eg `client_0` or `server_2`.
///
/// Ordering puts every client before every server and compares indices
/// numerically, so `client_2` sorts before `client_10`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId {
    pub source: Source,
    pub index: usize,
}

impl SeriesId {
    pub fn client(index: usize) -> Self {
        Self {
            source: Source::Client,
            index,
        }
    }

    pub fn server(index: usize) -> Self {
        Self {
            source: Source::Server,
            index,
        }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.source, self.index)
    }
}

impl Serialize for SeriesId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The values of one metric from one log source, keyed by timestamp in
/// microseconds.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct TimeSeries {
    inner: BTreeMap<u64, f64>,
}

impl TimeSeries {
    pub fn insert(&mut self, timestamp_us: u64, value: f64) -> Option<f64> {
        self.inner.insert(timestamp_us, value)
    }

    /// Points as `(seconds, value)` in ascending time order.
    pub fn as_points(&self) -> Vec<(f64, f64)> {
        self.inner
            .iter()
            .map(|(time, value)| (*time as f64 / MICROS_PER_SECOND, *value))
            .collect()
    }

    fn from_object(
        series: SeriesId,
        metric: &str,
        object: &Map<String, Value>,
    ) -> Result<Self, ReshapeError> {
        let invalid = |reason: String| ReshapeError::InvalidValue {
            series,
            metric: metric.to_string(),
            reason,
        };

        let mut result = Self::default();

        for (key, value) in object {
            let timestamp = key
                .parse::<u64>()
                .map_err(|_| invalid(format!("timestamp `{key}` is not a non-negative integer")))?;

            let value = value.as_f64().ok_or_else(|| {
                invalid(format!(
                    "value at `{key}` is {}, expected a number",
                    kind(value)
                ))
            })?;

            // "1" and "01" are distinct keys in JSON but the same timestamp
            if result.insert(timestamp, value).is_some() {
                return Err(invalid(format!("duplicate timestamp {timestamp}")));
            }
        }

        Ok(result)
    }
}

impl FromIterator<(u64, f64)> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = (u64, f64)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// All plottable metrics recorded by one log source.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct LogEntry {
    metrics: BTreeMap<String, TimeSeries>,
}

impl LogEntry {
    pub fn insert<T: Into<String>>(&mut self, metric: T, series: TimeSeries) {
        self.metrics.insert(metric.into(), series);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeSeries)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    fn from_object(series: SeriesId, object: &Map<String, Value>) -> Result<Self, ReshapeError> {
        let mut entry = Self::default();

        for (metric, value) in object {
            if is_timestamp_metric(metric) {
                continue;
            }

            let values = value.as_object().ok_or_else(|| {
                ReshapeError::MalformedInput(format!(
                    "`{metric}` of {series} is {}, expected an object",
                    kind(value)
                ))
            })?;

            entry.insert(
                metric.clone(),
                TimeSeries::from_object(series, metric, values)?,
            );
        }

        Ok(entry)
    }
}

/// The validated input: client logs followed by server logs.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct RawLogSet {
    client_logs: Vec<LogEntry>,
    server_logs: Vec<LogEntry>,
}

impl RawLogSet {
    #[cfg(test)]
    pub fn new(client_logs: Vec<LogEntry>, server_logs: Vec<LogEntry>) -> Self {
        Self {
            client_logs,
            server_logs,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReshapeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ReshapeError::MalformedInput(format!("invalid json: {e}")))?;

        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ReshapeError> {
        let object = value.as_object().ok_or_else(|| {
            ReshapeError::MalformedInput(format!("top level is {}, expected an object", kind(value)))
        })?;

        Ok(Self {
            client_logs: entries(object, Source::Client)?,
            server_logs: entries(object, Source::Server)?,
        })
    }

    pub fn client_logs(&self) -> &[LogEntry] {
        &self.client_logs
    }

    pub fn server_logs(&self) -> &[LogEntry] {
        &self.server_logs
    }

    /// Every log entry with its series id, clients first.
    pub fn entries(&self) -> impl Iterator<Item = (SeriesId, &LogEntry)> {
        let clients = self
            .client_logs
            .iter()
            .enumerate()
            .map(|(i, entry)| (SeriesId::client(i), entry));

        let servers = self
            .server_logs
            .iter()
            .enumerate()
            .map(|(i, entry)| (SeriesId::server(i), entry));

        clients.chain(servers)
    }
}

impl FromStr for RawLogSet {
    type Err = ReshapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
    }
}

fn entries(object: &Map<String, Value>, source: Source) -> Result<Vec<LogEntry>, ReshapeError> {
    let key = source.key();

    let list = object
        .get(key)
        .ok_or_else(|| ReshapeError::MalformedInput(format!("missing `{key}`")))?
        .as_array()
        .ok_or_else(|| ReshapeError::MalformedInput(format!("`{key}` is not an array")))?;

    list.iter()
        .enumerate()
        .map(|(index, value)| {
            let id = SeriesId { source, index };
            let log = value.as_object().ok_or_else(|| {
                ReshapeError::MalformedInput(format!("{id} is {}, expected an object", kind(value)))
            })?;
            LogEntry::from_object(id, log)
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_and_server_logs() {
        let raw = RawLogSet::from_value(&json!({
            "client_logs": [{"cpu_pct": {"0": 10, "1000000": 20}}, {}],
            "server_logs": [{"mem": {"5": 1.5}}],
            "nposts": 12,
        }))
        .unwrap();

        assert_eq!(raw.client_logs().len(), 2);
        assert_eq!(raw.server_logs().len(), 1);

        let ids: Vec<String> = raw.entries().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["client_0", "client_1", "server_0"]);
    }

    #[test]
    fn timestamp_metrics_are_skipped_without_validation() {
        let raw = RawLogSet::from_value(&json!({
            "client_logs": [{"time_us_raw": [1, 2, 3], "start_time_us": "x", "ops": {"1": 1}}],
            "server_logs": [],
        }))
        .unwrap();

        let metrics: Vec<&str> = raw.client_logs()[0].iter().map(|(k, _)| k).collect();
        assert_eq!(metrics, vec!["ops"]);
    }

    #[test]
    fn points_are_sorted_numerically() {
        let raw = RawLogSet::from_value(&json!({
            "client_logs": [{"ops": {"1000000": 3, "200000": 2, "0": 1}}],
            "server_logs": [],
        }))
        .unwrap();

        let (_, series) = raw.client_logs()[0].iter().next().unwrap();
        assert_eq!(series.as_points(), vec![(0.0, 1.0), (0.2, 2.0), (1.0, 3.0)]);
    }

    #[test]
    fn missing_lists_are_malformed() {
        let err = RawLogSet::from_value(&json!({"client_logs": []})).unwrap_err();
        assert_eq!(
            err,
            ReshapeError::MalformedInput("missing `server_logs`".to_string())
        );

        let err = RawLogSet::from_value(&json!({"client_logs": {}, "server_logs": []})).unwrap_err();
        assert!(matches!(err, ReshapeError::MalformedInput(_)));

        let err = RawLogSet::from_value(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ReshapeError::MalformedInput(_)));
    }

    #[test]
    fn entries_must_be_objects() {
        let err = RawLogSet::from_value(&json!({"client_logs": [], "server_logs": [3]})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed input: server_0 is a number, expected an object"
        );
    }

    #[test]
    fn non_numeric_values_are_invalid() {
        let err = RawLogSet::from_value(&json!({
            "client_logs": [{"ops": {"0": "ten"}}],
            "server_logs": [],
        }))
        .unwrap_err();

        assert_eq!(
            err,
            ReshapeError::InvalidValue {
                series: SeriesId::client(0),
                metric: "ops".to_string(),
                reason: "value at `0` is a string, expected a number".to_string(),
            }
        );
    }

    #[test]
    fn non_numeric_timestamps_are_invalid() {
        for key in ["abc", "-5", "1.5"] {
            let mut values = Map::new();
            values.insert(key.to_string(), json!(1));

            let err = RawLogSet::from_value(&json!({
                "client_logs": [],
                "server_logs": [{"ops": values}],
            }))
            .unwrap_err();

            assert!(
                matches!(err, ReshapeError::InvalidValue { series, .. } if series == SeriesId::server(0)),
                "{key}"
            );
        }
    }

    #[test]
    fn duplicate_timestamps_are_invalid() {
        let err = RawLogSet::from_str(
            r#"{"client_logs": [{"ops": {"1": 1, "01": 2}}], "server_logs": []}"#,
        )
        .unwrap_err();

        assert!(matches!(err, ReshapeError::InvalidValue { .. }));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = RawLogSet::from_slice(b"{\"client_logs\": [").unwrap_err();
        assert!(matches!(err, ReshapeError::MalformedInput(_)));
    }

    #[test]
    fn series_ids_order_clients_first_then_numerically() {
        let mut ids = vec![
            SeriesId::server(0),
            SeriesId::client(10),
            SeriesId::client(2),
        ];
        ids.sort();

        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["client_2", "client_10", "server_0"]);
    }
}
