use super::*;
use crate::viewer::{Axis, View};
use anyhow::Context;
use clap::{ArgMatches, ValueEnum};
use std::io::Write;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Standalone page that draws the charts without a server
    Html,
    /// The chart descriptors served at /data/charts.json
    Json,
    /// Axis ranges, palette entries and one line per point formatted like
    /// the hover tooltips
    Text,
}

pub fn command() -> Command {
    Command::new("render")
        .about("Render the charts for a log set to a file")
        .arg(
            clap::Arg::new("INPUT")
                .help("Aggregated log file")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("OUTPUT")
                .long("output")
                .short('o')
                .help("Output file, stdout when omitted")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set),
        )
        .arg(
            clap::Arg::new("FORMAT")
                .long("format")
                .short('f')
                .help("Output format")
                .value_parser(value_parser!(Format))
                .default_value("html")
                .action(clap::ArgAction::Set),
        )
        .arg(config_arg())
        .arg(verbose_arg())
}

pub struct Config {
    input: PathBuf,
    output: Option<PathBuf>,
    format: Format,
    verbose: u8,
    file: config::Config,
}

impl TryFrom<ArgMatches> for Config {
    type Error = String;

    fn try_from(
        args: ArgMatches,
    ) -> Result<Self, <Self as std::convert::TryFrom<clap::ArgMatches>>::Error> {
        Ok(Config {
            input: args
                .get_one::<PathBuf>("INPUT")
                .cloned()
                .ok_or_else(|| "no input file given".to_string())?,
            output: args.get_one::<PathBuf>("OUTPUT").cloned(),
            format: args.get_one::<Format>("FORMAT").copied().unwrap_or(Format::Html),
            verbose: args.get_count("VERBOSE"),
            file: config::Config::from_args(&args)?,
        })
    }
}

pub fn run(config: Config) {
    init_logging(verbosity(config.file.log().level(), config.verbose));

    if let Err(e) = render(&config) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn render(config: &Config) -> anyhow::Result<()> {
    let presenter = config.file.presenter();

    debug!("loading logs: {}", config.input.display());
    let view = viewer::load(&config.input, &presenter)?;
    info!("rendering {} charts", view.charts().len());

    let content = format(&view, config.format)?;

    match &config.output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("failed to write output: {}", path.display()))?,
        None => std::io::stdout()
            .lock()
            .write_all(content.as_bytes())
            .context("failed to write to stdout")?,
    }

    Ok(())
}

/// Formats a view for output.
pub fn format(view: &View, format: Format) -> anyhow::Result<String> {
    let content = match format {
        Format::Html => viewer::page(view).context("failed to embed charts in page")?,
        Format::Json => {
            let mut json =
                serde_json::to_string_pretty(view).context("failed to serialize charts")?;
            json.push('\n');
            json
        }
        Format::Text => text(view),
    };

    Ok(content)
}

fn text(view: &View) -> String {
    let mut out = String::new();

    for chart in view.charts() {
        let container = chart.container();
        let opts = chart.opts();

        out.push_str(&format!("# {} ({})\n", container.title(), container.plot_id()));
        out.push_str(&format!(
            "# x: {} {}, y: {} {}\n",
            opts.xaxis().label(),
            range(opts.xaxis()),
            opts.yaxis().label(),
            range(opts.yaxis())
        ));

        for series in chart.series() {
            out.push_str(&format!(
                "## {} {} {}\n",
                series.label(),
                series.color(),
                series.symbol()
            ));

            for [x, y] in series.data() {
                out.push_str(&chart.tooltip().text(series.label(), *x, *y));
                out.push('\n');
            }
        }
    }

    out
}

fn range(axis: &Axis) -> String {
    let bound = |b: Option<f64>| b.map(|v| v.to_string()).unwrap_or_else(|| "auto".into());
    format!("[{}, {}]", bound(axis.min()), bound(axis.max()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::ReshapeError;
    use crate::viewer::ChartPresenter;

    const LOGS: &[u8] = br#"{
        "client_logs": [{"cpu_pct": {"0": 10, "1000000": 20.5}}],
        "server_logs": [{"cpu_pct": {"500000": 1}, "ops": {"0": 3}}]
    }"#;

    fn render_bytes(bytes: &[u8], format: Format) -> anyhow::Result<String> {
        let view = ChartPresenter::default().render(bytes)?;
        super::format(&view, format)
    }

    #[test]
    fn text_lists_points_like_tooltips() {
        let out = render_bytes(LOGS, Format::Text).unwrap();

        assert_eq!(
            out,
            "# cpu_pct (plot_0)\n\
             # x: Time (s) [auto, auto], y: cpu_pct [0, 100]\n\
             ## client_0 #444444 circle\n\
             client_0, (0.000, 10.000)\n\
             client_0, (1.000, 20.500)\n\
             ## server_0 #0060ad circle\n\
             server_0, (0.500, 1.000)\n\
             # ops (plot_1)\n\
             # x: Time (s) [auto, auto], y: ops [0, auto]\n\
             ## server_0 #0060ad circle\n\
             server_0, (0.000, 3.000)\n"
        );
    }

    #[test]
    fn json_matches_served_charts() {
        let out = render_bytes(LOGS, Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(value["title"], "logvis");
        assert_eq!(value["charts"].as_array().unwrap().len(), 2);
        assert_eq!(value["charts"][1]["series"][0]["label"], "server_0");
        assert_eq!(value["charts"][1]["series"][0]["color"], "#0060ad");
    }

    #[test]
    fn html_embeds_charts() {
        let out = render_bytes(LOGS, Format::Html).unwrap();

        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains(r#""plot_id":"plot_1""#));
    }

    #[test]
    fn invalid_logs_are_rejected() {
        let err = render_bytes(br#"{"server_logs": []}"#, Format::Json).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ReshapeError>(),
            Some(ReshapeError::MalformedInput(_))
        ));
    }

    #[test]
    fn writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("logs.json");
        let output = dir.path().join("charts.txt");
        std::fs::write(&input, LOGS).unwrap();

        let config = Config {
            input,
            output: Some(output.clone()),
            format: Format::Text,
            verbose: 0,
            file: config::Config::default(),
        };
        render(&config).unwrap();

        let written = std::fs::read_to_string(output).unwrap();
        assert!(written.starts_with("# cpu_pct (plot_0)\n"));
    }
}
