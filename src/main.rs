use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use camino::Utf8PathBuf;
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::SignalKind;

use baldur::backend::hass::HassBackend;
use baldur::config;
use baldur::device::{CommandSink, DeviceDirectory};
use baldur::error::ApiResult;
use baldur::group::GroupController;
use baldur::routes;
use baldur::server::appstate::AppState;
use baldur::server::http;

/* Syslog-style output, for running as a service under the system journal */
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    let priority = match record.level() {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 6,
        log::Level::Debug | log::Level::Trace => 7,
    };
    writeln!(buf, "<{priority}>{}: {}", record.target(), record.args())
}

fn init_logging() -> ApiResult<()> {
    /* Reasonable default filters for when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &[
        "debug",
        "hyper=info",
        "reqwest=info",
        "tungstenite=info",
        "axum::rejection=trace",
    ];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Under systemd, skip the colored human-readable formatting */
    let systemd = std::env::var("SYSTEMD_EXEC_PID")
        .is_ok_and(|pid| pid == std::process::id().to_string());

    if systemd {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

#[derive(Parser)]
#[command(
    name = "baldur",
    about = "Presents groups of Home Assistant lights as single dimmable devices"
)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: Utf8PathBuf,
}

fn install_signal_handlers(handle: &Handle) -> ApiResult<()> {
    fn shutdown(msg: &str, handle: &Handle) {
        log::warn!("{msg}");
        let _ = std::io::stderr().flush();
        handle.graceful_shutdown(Some(Duration::from_secs(1)));
    }

    let hdl = handle.clone();
    tokio::spawn(async move {
        if matches!(signal::ctrl_c().await, Ok(())) {
            shutdown("Ctrl-C pressed, exiting..", &hdl);
        }
    });

    let hdl = handle.clone();
    let mut signal = signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if matches!(signal.recv().await, Some(())) {
            shutdown("SIGTERM received, exiting..", &hdl);
        }
    });

    Ok(())
}

async fn run() -> ApiResult<()> {
    init_logging()?;

    let args = Args::parse();

    let config = Arc::new(config::parse(&args.config)?);
    log::debug!("Configuration loaded successfully");

    if !config.has_groups() {
        log::warn!("{}", "-".repeat(80));
        log::warn!("No light groups configured in config!");
        log::warn!("Baldur will run, but has nothing to control.");
        log::warn!("");
        log::warn!(" ** Please configure at least one group to use Baldur **");
        log::warn!("{}", "-".repeat(80));
    }

    let backend = HassBackend::new("hass", &config.hass)?;
    let directory: Arc<dyn DeviceDirectory> = Arc::new(backend.directory());
    let sink: Arc<dyn CommandSink> = Arc::new(backend.directory());

    let cache_delay = Duration::from_secs(u64::from(config.dimmer.delay.get()));

    let mut groups = BTreeMap::new();
    let mut listeners = Vec::with_capacity(config.groups.len());
    for (id, group_config) in &config.groups {
        let controller = Arc::new(GroupController::new(
            id,
            group_config,
            cache_delay,
            Arc::clone(&directory),
            Arc::clone(&sink),
        ));
        listeners.push(Arc::clone(&controller).spawn_listener());
        groups.insert(id.clone(), controller);
    }

    let backend_task = tokio::spawn(backend.run());

    let state = AppState::new(Arc::clone(&config), groups);

    let handle = Handle::new();
    install_signal_handlers(&handle)?;

    let router = Router::new()
        .nest("/api", routes::router())
        .with_state(state);

    let res = http::serve(
        config.server.listen_address,
        config.server.listen_port,
        router,
        handle,
    )
    .await;

    backend_task.abort();
    for listener in listeners {
        listener.abort();
    }

    res
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Baldur error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
