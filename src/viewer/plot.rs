use crate::logs::{RawLogSet, ReshapeError, SeriesId};
use crate::reshape::{is_percentage_metric, reshape, MetricSeriesCollection, Palette, Series};
use serde::Serialize;

pub const PLOT_WIDTH: u32 = 900;
pub const PLOT_HEIGHT: u32 = 350;

// decimal places for both coordinates in hover tooltips
const TOOLTIP_PRECISION: usize = 3;

const AXIS_LABEL_PADDING: u32 = 10;

/// Everything the page needs to draw one set of charts.
#[derive(Default, Serialize, Clone, Debug)]
pub struct View {
    title: String,
    charts: Vec<Chart>,
}

impl View {
    pub fn new<T: Into<String>>(title: T) -> Self {
        Self {
            title: title.into(),
            charts: Vec::new(),
        }
    }

    pub fn charts(&self) -> &[Chart] {
        &self.charts
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Chart {
    container: Container,
    series: Vec<SeriesOpts>,
    opts: PlotOpts,
    tooltip: Tooltip,
}

impl Chart {
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn series(&self) -> &[SeriesOpts] {
        &self.series
    }

    pub fn opts(&self) -> &PlotOpts {
        &self.opts
    }

    pub fn tooltip(&self) -> &Tooltip {
        &self.tooltip
    }
}

/// The element holding a chart's title and its plot surface. Ids count from
/// zero on every build.
#[derive(Serialize, Clone, Debug)]
pub struct Container {
    id: String,
    title: String,
    plot_id: String,
    width: u32,
    height: u32,
}

impl Container {
    pub fn new<T: Into<String>>(n: usize, title: T) -> Self {
        Self {
            id: format!("graph_{n}"),
            title: title.into(),
            plot_id: plot_id(n),
            width: PLOT_WIDTH,
            height: PLOT_HEIGHT,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn plot_id(&self) -> &str {
        &self.plot_id
    }
}

fn plot_id(n: usize) -> String {
    format!("plot_{n}")
}

/// A flot series descriptor.
#[derive(Serialize, Clone, Debug)]
pub struct SeriesOpts {
    data: Vec<[f64; 2]>,
    label: String,
    color: String,
    points: SymbolOpts,
}

#[derive(Serialize, Clone, Debug)]
pub struct SymbolOpts {
    symbol: String,
}

impl SeriesOpts {
    pub fn new(id: SeriesId, series: &Series, palette: &Palette) -> Self {
        Self {
            data: series.points.iter().map(|(x, y)| [*x, *y]).collect(),
            label: id.to_string(),
            color: palette.color(series.color).to_string(),
            points: SymbolOpts {
                symbol: palette.symbol(series.symbol).to_string(),
            },
        }
    }

    pub fn data(&self) -> &[[f64; 2]] {
        &self.data
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn symbol(&self) -> &str {
        &self.points.symbol
    }
}

/// flot plot options.
#[derive(Serialize, Clone, Debug)]
pub struct PlotOpts {
    series: SeriesDefaults,
    grid: Grid,
    xaxis: Axis,
    yaxis: Axis,
    legend: Legend,
}

#[derive(Serialize, Clone, Debug)]
struct SeriesDefaults {
    lines: Show,
    points: Show,
}

#[derive(Serialize, Clone, Debug)]
struct Show {
    show: bool,
}

#[derive(Serialize, Clone, Debug)]
struct Grid {
    hoverable: bool,
    clickable: bool,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Axis {
    axis_label: String,
    axis_label_padding: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
}

impl Axis {
    fn new<T: Into<String>>(label: T) -> Self {
        Self {
            axis_label: label.into(),
            axis_label_padding: AXIS_LABEL_PADDING,
            min: None,
            max: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.axis_label
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

#[derive(Serialize, Clone, Debug)]
struct Legend {
    show: bool,
    position: String,
}

impl PlotOpts {
    /// Lines with point markers against time in seconds, y-axis from zero.
    pub fn line<T: Into<String>>(metric: T) -> Self {
        let mut yaxis = Axis::new(metric);
        yaxis.min = Some(0.0);

        Self {
            series: SeriesDefaults {
                lines: Show { show: true },
                points: Show { show: true },
            },
            grid: Grid {
                hoverable: true,
                clickable: true,
            },
            xaxis: Axis::new("Time (s)"),
            yaxis,
            legend: Legend {
                show: false,
                position: "nw".to_string(),
            },
        }
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.yaxis.max = Some(max);
        self
    }

    pub fn xaxis(&self) -> &Axis {
        &self.xaxis
    }

    pub fn yaxis(&self) -> &Axis {
        &self.yaxis
    }
}

/// Hover tooltip for one plot. The page formats the text the same way as
/// [`Tooltip::text`].
#[derive(Serialize, Clone, Debug)]
pub struct Tooltip {
    id: String,
    precision: usize,
}

impl Tooltip {
    pub fn new(n: usize) -> Self {
        Self {
            id: format!("{}_tooltip", plot_id(n)),
            precision: TOOLTIP_PRECISION,
        }
    }

    pub fn text(&self, label: &str, x: f64, y: f64) -> String {
        let x = to_fixed(x, self.precision);
        let y = to_fixed(y, self.precision);
        format!("{label}, ({x}, {y})")
    }
}

/// Formats like javascript's `Number.prototype.toFixed`: an exact tie rounds
/// away from zero instead of to even.
pub fn to_fixed(value: f64, precision: usize) -> String {
    if value.is_finite() && is_tie(value.abs(), precision) {
        // one ulp up cannot reach the next rounding boundary
        let up = f64::from_bits(value.abs().to_bits() + 1);
        let sign = if value.is_sign_negative() { "-" } else { "" };
        return format!("{sign}{up:.precision$}");
    }

    format!("{value:.precision$}")
}

// True when `value * 10^precision` is exactly halfway between two integers,
// ie `2 * value * 10^precision` is an odd integer. With `value = m * 2^e` that
// holds when the trailing zeros of `m` exactly cancel `2^(e + 1 + precision)`,
// since `5^precision` is odd.
fn is_tie(value: f64, precision: usize) -> bool {
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1 << 52) - 1);

    let (mantissa, exponent) = if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1 << 52), biased - 1075)
    };

    mantissa != 0 && i64::from(mantissa.trailing_zeros()) == -(exponent + 1 + precision as i64)
}

/// Turns reshaped logs into chart descriptors.
#[derive(Clone, Debug)]
pub struct ChartPresenter {
    palette: Palette,
    title: String,
}

impl Default for ChartPresenter {
    fn default() -> Self {
        Self::new(Palette::default(), "logvis")
    }
}

impl ChartPresenter {
    pub fn new<T: Into<String>>(palette: Palette, title: T) -> Self {
        Self {
            palette,
            title: title.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// One chart per metric, in metric-name order.
    pub fn present(&self, collection: &MetricSeriesCollection) -> View {
        let mut view = View::new(self.title.clone());
        view.charts.reserve(collection.len());

        for (n, (metric, series)) in collection.iter().enumerate() {
            let mut opts = PlotOpts::line(metric);
            if is_percentage_metric(metric) {
                opts = opts.with_max(100.0);
            }

            let series = series
                .iter()
                .map(|(id, s)| SeriesOpts::new(*id, s, &self.palette))
                .collect();

            view.charts.push(Chart {
                container: Container::new(n, metric),
                series,
                opts,
                tooltip: Tooltip::new(n),
            });
        }

        view
    }

    /// Parses, reshapes and presents a raw log blob. Nothing is built unless
    /// the whole input is valid.
    pub fn render(&self, bytes: &[u8]) -> Result<View, ReshapeError> {
        let raw = RawLogSet::from_slice(bytes)?;
        let collection = reshape(&raw, &self.palette);

        Ok(self.present(&collection))
    }
}
