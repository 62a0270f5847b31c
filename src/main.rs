use anyhow::Result;

#[cfg(windows)]
#[tokio::main]
async fn main() -> Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use tokio::net::TcpListener;
    use tokio::sync::{Mutex, mpsc};
    use tower_http::trace::TraceLayer;
    use tracing_subscriber::EnvFilter;

    use courier::api;
    use courier::config::Config;
    use courier::input::DesktopInput;
    use courier::locator::ScreenLocator;
    use courier::state::{AppState, AppStateInner};
    use courier::whisper::{self, WhisperLog};
    use courier::window::DesktopWindow;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        "courier starting, listen: {}, window: {:?}, item: {}",
        config.listen_addr,
        config.window_title,
        config.item,
    );

    let locator = Arc::new(
        ScreenLocator::load(&config.assets_dir).context("failed to load template images")?,
    );
    let input = Arc::new(DesktopInput);
    let window = Arc::new(DesktopWindow::new(config.window_title.clone()));

    let (whisper_tx, whisper_rx) = mpsc::channel(256);
    let whisper_log = WhisperLog::new(config.whisper.log_path.clone());

    let state: AppState = Arc::new(Mutex::new(AppStateInner::new(config.clone())));
    let _whisper_worker =
        whisper::spawn_service(state.clone(), config.whisper.clone(), whisper_log, whisper_rx);

    let app = api::router(state, locator, input, window, whisper_tx)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

#[cfg(not(windows))]
fn main() -> Result<()> {
    anyhow::bail!("courier drives a Windows game client; build and run it on Windows")
}
