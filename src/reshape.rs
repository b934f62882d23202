//! Groups per-source log entries into per-metric series.
//!
//! Each log source gets one color/symbol pair from a round-robin walk over
//! the palette, and keeps that pair in every chart it appears in.

use crate::logs::{RawLogSet, SeriesId};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub static COLORS: &[&str] = &[
    "#444444", "#0060ad", "#dd181f", "#628243", "#ff3366", "#cc9966",
];

pub static SYMBOLS: &[&str] = &["circle", "square", "triangle", "diamond", "cross"];

/// Returns true for metrics bounded to 0..=100, whose y-axis gets capped.
pub fn is_percentage_metric(name: &str) -> bool {
    name.contains("_pct")
}

fn colors() -> Vec<String> {
    COLORS.iter().map(|c| c.to_string()).collect()
}

fn symbols() -> Vec<String> {
    SYMBOLS.iter().map(|s| s.to_string()).collect()
}

/// Colors and point symbols handed out to log sources.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Palette {
    #[serde(default = "colors")]
    colors: Vec<String>,
    #[serde(default = "symbols")]
    symbols: Vec<String>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: colors(),
            symbols: symbols(),
        }
    }
}

impl Palette {
    #[cfg(test)]
    pub fn new(colors: Vec<String>, symbols: Vec<String>) -> Self {
        Self { colors, symbols }
    }

    pub fn check(&self) -> Result<(), String> {
        if self.colors.is_empty() {
            return Err("palette must have at least one color".into());
        }

        if self.symbols.is_empty() {
            return Err("palette must have at least one symbol".into());
        }

        Ok(())
    }

    pub fn color(&self, index: usize) -> &str {
        &self.colors[index % self.colors.len()]
    }

    pub fn symbol(&self, index: usize) -> &str {
        &self.symbols[index % self.symbols.len()]
    }
}

/// One trace: a metric's values from one log source.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub points: Vec<(f64, f64)>,
    pub color: usize,
    pub symbol: usize,
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct MetricSeriesCollection {
    inner: BTreeMap<String, BTreeMap<SeriesId, Series>>,
}

impl MetricSeriesCollection {
    #[cfg(test)]
    pub fn get(&self, metric: &str) -> Option<&BTreeMap<SeriesId, Series>> {
        self.inner.get(metric)
    }

    #[cfg(test)]
    pub fn series(&self, metric: &str, id: SeriesId) -> Option<&Series> {
        self.inner.get(metric).and_then(|m| m.get(&id))
    }

    #[cfg(test)]
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_str())
    }

    /// Metrics in ascending name order, each with its series in
    /// client-then-server order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<SeriesId, Series>)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Cycles through colors first, moving to the next symbol each time the
/// colors wrap.
struct RoundRobin {
    colors: usize,
    symbols: usize,
    color: usize,
    symbol: usize,
}

impl RoundRobin {
    fn new(colors: usize, symbols: usize) -> Self {
        Self {
            colors: colors.max(1),
            symbols: symbols.max(1),
            color: 0,
            symbol: 0,
        }
    }

    fn next(&mut self) -> (usize, usize) {
        let current = (self.color, self.symbol);

        self.color += 1;
        if self.color == self.colors {
            self.color = 0;
            self.symbol += 1;
            if self.symbol == self.symbols {
                self.symbol = 0;
            }
        }

        current
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Reshaper {
    colors: usize,
    symbols: usize,
}

impl Reshaper {
    pub fn new(colors: usize, symbols: usize) -> Self {
        Self { colors, symbols }
    }

    pub fn for_palette(palette: &Palette) -> Self {
        Self::new(palette.colors.len(), palette.symbols.len())
    }

    /// Builds a fresh collection. The round-robin state lives only for the
    /// duration of this call.
    pub fn reshape(&self, raw: &RawLogSet) -> MetricSeriesCollection {
        let mut result = MetricSeriesCollection::default();
        let mut palette = RoundRobin::new(self.colors, self.symbols);

        debug!(
            "reshaping {} client and {} server logs",
            raw.client_logs().len(),
            raw.server_logs().len()
        );

        for (id, entry) in raw.entries() {
            // advance once per log source, even one without plottable metrics
            let (color, symbol) = palette.next();

            trace!("{id}: {} metrics, color {color} symbol {symbol}", entry.len());

            for (metric, values) in entry.iter() {
                let series = Series {
                    points: values.as_points(),
                    color,
                    symbol,
                };

                result
                    .inner
                    .entry(metric.to_string())
                    .or_default()
                    .insert(id, series);
            }
        }

        debug!("reshaped logs into {} metrics", result.len());

        result
    }
}

/// Reshapes with one color/symbol pair per log source, drawn from `palette`.
pub fn reshape(raw: &RawLogSet, palette: &Palette) -> MetricSeriesCollection {
    Reshaper::for_palette(palette).reshape(raw)
}
