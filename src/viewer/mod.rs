use super::*;
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::ArgMatches;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

mod plot;

pub use plot::*;

static INDEX: &str = include_str!("assets/index.html");

// replaced with the serialized view when rendering a standalone page
const EMBED_MARKER: &str = "/*LOGVIS_VIEW*/null";

// aggregated logs from long runs easily exceed axum's default 2MB limit
const MAX_UPLOAD: usize = 256 * 1024 * 1024;

pub fn command() -> Command {
    Command::new("view")
        .about("Serve per-metric charts for a log set")
        .arg(
            clap::Arg::new("INPUT")
                .help("Aggregated log file to show at startup")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set)
                .index(1),
        )
        .arg(
            clap::Arg::new("LISTEN")
                .long("listen")
                .short('l')
                .help("Viewer listen address, overrides the config file")
                .action(clap::ArgAction::Set)
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(config_arg())
        .arg(verbose_arg())
}

pub struct Config {
    input: Option<PathBuf>,
    listen: Option<SocketAddr>,
    verbose: u8,
    file: config::Config,
}

impl TryFrom<ArgMatches> for Config {
    type Error = String;

    fn try_from(
        args: ArgMatches,
    ) -> Result<Self, <Self as std::convert::TryFrom<clap::ArgMatches>>::Error> {
        Ok(Config {
            input: args.get_one::<PathBuf>("INPUT").cloned(),
            listen: args.get_one::<SocketAddr>("LISTEN").copied(),
            verbose: args.get_count("VERBOSE"),
            file: config::Config::from_args(&args)?,
        })
    }
}

impl Config {
    fn listen(&self) -> Result<SocketAddr, String> {
        match self.listen {
            Some(listen) => Ok(listen),
            None => self.file.general().listen(),
        }
    }
}

/// Runs the viewer: an HTTP server with a page that draws one chart per
/// metric. The charts are rebuilt from scratch each time a new log set is
/// posted to `/data/logs`; a rejected log set leaves the current charts in
/// place.
pub fn run(config: Config) {
    init_logging(verbosity(config.file.log().level(), config.verbose));

    let listen = match config.listen() {
        Ok(listen) => listen,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let presenter = config.file.presenter();
    let state = AppState::new(presenter);

    if let Some(input) = &config.input {
        debug!("loading logs: {}", input.display());

        match load(input, &state.presenter) {
            Ok(view) => {
                info!("loaded {} charts from {}", view.charts().len(), input.display());
                if let Err(e) = state.publish(&view) {
                    error!("failed to serialize charts: {e}");
                    std::process::exit(1);
                }
            }
            Err(e) => {
                error!("{e:#}");
                std::process::exit(1);
            }
        }
    }

    // initialize async runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("logvis")
        .build()
        .expect("failed to launch async runtime");

    ctrlc::set_handler(move || {
        std::process::exit(2);
    })
    .expect("failed to set ctrl-c handler");

    rt.block_on(async move { serve(listen, state).await });
}

/// Reads and renders a log file.
pub fn load(path: &Path, presenter: &ChartPresenter) -> anyhow::Result<View> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read log file: {}", path.display()))?;

    presenter
        .render(&bytes)
        .with_context(|| format!("failed to load logs from: {}", path.display()))
}

/// The viewer page with `view` embedded, so it draws without a server.
pub fn page(view: &View) -> Result<String, serde_json::Error> {
    // keep a `</script>` inside a metric name from closing the script tag
    let json = serde_json::to_string(view)?.replace("</", "<\\/");

    Ok(INDEX.replacen(EMBED_MARKER, &json, 1))
}

async fn serve(listen: SocketAddr, state: AppState) {
    let app = app(state);

    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to listen on {listen}: {e}");
            std::process::exit(1);
        }
    };

    info!("serving charts on http://{listen}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("http server failed: {e}");
        std::process::exit(1);
    }
}

struct AppState {
    presenter: ChartPresenter,
    // the serialized current view, swapped whole on every accepted upload
    view: RwLock<String>,
}

impl AppState {
    fn new(presenter: ChartPresenter) -> Self {
        let empty = View::new(presenter.title());
        let view = serde_json::to_string(&empty).unwrap_or_else(|_| "{ }".to_string());

        Self {
            presenter,
            view: RwLock::new(view),
        }
    }

    fn publish(&self, view: &View) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(view)?;
        *self.view.write() = json.clone();
        Ok(json)
    }
}

fn app(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(index))
        .route("/about", get(about))
        .route("/data/charts.json", get(charts))
        .route("/data/logs", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new()),
        )
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn about() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("logvis {version} viewer\n")
}

async fn charts(State(state): State<Arc<AppState>>) -> Response {
    let view = state.view.read().clone();
    json_response(view)
}

async fn upload(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let view = match state.presenter.render(&body) {
        Ok(view) => view,
        Err(e) => {
            warn!("rejected log set: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match state.publish(&view) {
        Ok(json) => {
            info!("redrew {} charts", view.charts().len());
            json_response(json)
        }
        Err(e) => {
            error!("failed to serialize charts: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn json_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::ReshapeError;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn get_charts() -> Request<Body> {
        Request::builder()
            .uri("/data/charts.json")
            .body(Body::empty())
            .unwrap()
    }

    fn post_logs(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/data/logs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn titles(body: &[u8]) -> Vec<String> {
        let view: Value = serde_json::from_slice(body).unwrap();
        view["charts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["container"]["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn starts_with_no_charts() {
        let app = app(AppState::new(ChartPresenter::default()));

        let (status, body) = send(app, get_charts()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(titles(&body).is_empty());
    }

    #[tokio::test]
    async fn upload_replaces_charts() {
        let app = app(AppState::new(ChartPresenter::default()));

        let (status, body) = send(
            app.clone(),
            post_logs(json!({
                "client_logs": [{"cpu_pct": {"0": 10}, "ops": {"0": 1}}],
                "server_logs": [],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&body), vec!["cpu_pct", "ops"]);

        let (_, body) = send(
            app.clone(),
            post_logs(json!({
                "client_logs": [],
                "server_logs": [{"mem": {"0": 1}}],
            })),
        )
        .await;
        assert_eq!(titles(&body), vec!["mem"]);

        let (_, body) = send(app, get_charts()).await;
        assert_eq!(titles(&body), vec!["mem"]);
    }

    #[tokio::test]
    async fn rejected_upload_keeps_previous_charts() {
        let app = app(AppState::new(ChartPresenter::default()));

        send(
            app.clone(),
            post_logs(json!({"client_logs": [{"ops": {"0": 1}}], "server_logs": []})),
        )
        .await;

        let (status, body) = send(
            app.clone(),
            post_logs(json!({"client_logs": [{"ops": {"0": "x"}}], "server_logs": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).unwrap().starts_with("invalid value"));

        let (_, body) = send(app, get_charts()).await;
        assert_eq!(titles(&body), vec!["ops"]);
    }

    #[tokio::test]
    async fn serves_the_page() {
        let app = app(AppState::new(ChartPresenter::default()));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains(EMBED_MARKER));
    }

    #[test]
    fn page_embeds_the_view() {
        let view = ChartPresenter::default()
            .render(br#"{"client_logs": [{"</script>": {"0": 1}}], "server_logs": []}"#)
            .unwrap();

        let page = page(&view).unwrap();

        assert!(!page.contains(EMBED_MARKER));
        assert!(page.contains(r#""title":"<\/script>""#));
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        std::fs::write(&path, "{}").unwrap();

        let err = load(&path, &ChartPresenter::default()).unwrap_err();

        assert!(format!("{err:#}").contains("logs.json"));
        assert!(matches!(
            err.downcast_ref::<ReshapeError>(),
            Some(ReshapeError::MalformedInput(_))
        ));
    }
}
