use playout_daemon::core::{DaemonEvent, PlayoutCore, Sources};
use playout_daemon::logging::BroadcastLayer;
use playout_daemon::renderer::SimulatedMatrix;
use playout_daemon::sources::rss::RssSource;
use playout_daemon::sources::weather::WeatherSource;
use playout_daemon::sources::webserver::WebserverSource;
use playout_daemon::{http, socket, BroadcastMessage};
use playout_proto::config::Config;
use playout_proto::state::StateManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can feed it.
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = playout_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("playoutd.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,playout_daemon=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = Config::config_path();
    let config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    let width = config.display.device_width_px();
    let mut sources = Sources::default();
    if config.webservers.enabled {
        info!("Webservers: {} configured", config.webservers.zones.len());
        sources
            .audio
            .push(Arc::new(WebserverSource::new(config.webservers.clone())?));
    }
    if config.media_service.enabled {
        warn!("Media service enabled, but no media-service driver is linked into playoutd");
    }
    if config.weather.enabled {
        let weather = Arc::new(WeatherSource::new(
            config.weather.clone(),
            config.language.clone(),
            width,
        )?);
        Arc::clone(&weather).spawn_refresh();
        sources.fragments.push(weather);
    }
    if config.rss.enabled {
        let rss = Arc::new(RssSource::new(
            config.rss.clone(),
            config.language.clone(),
            width,
        )?);
        Arc::clone(&rss).spawn_refresh();
        sources.fragments.push(rss);
    }

    // All external inputs funnel into PlayoutCore.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<DaemonEvent>(256);

    let state_manager = Arc::new(StateManager::new(data_dir.join("state.json")));
    let core = PlayoutCore::new(
        config.clone(),
        Some(config_path),
        sources,
        Arc::new(SimulatedMatrix::new()),
        Arc::clone(&state_manager),
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await?;

    if config.control_surface.enabled {
        let _socket_handle = socket::start_server(
            config.control_surface.bind_address.clone(),
            config.control_surface.port,
            state_manager.clone(),
            event_tx.clone(),
            broadcast_tx.clone(),
        );
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
        }
    });

    info!("playoutd initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
