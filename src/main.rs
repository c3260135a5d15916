//! framecast: camera -> square crop -> realtime inference -> display

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast::pipeline::PipelineOptions;
use framecast::{stream, Config, LiveSource, Normalizer, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("framecast launching...");

    // Camera failures leave the preview blank rather than stopping the process
    let source = match LiveSource::acquire(&config.capture) {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, "camera unavailable, preview will stay blank");
            LiveSource::inert()
        }
    };

    let channel = stream::open(&config.channel);
    let normalizer = Normalizer::new(config.normalize.target_size, config.normalize.quality);
    let pipeline = Pipeline::spawn(
        Arc::new(source),
        normalizer,
        channel,
        PipelineOptions::from(&config),
    );

    present(&pipeline, &config).await?;

    pipeline.shutdown().await;
    info!("framecast shutting down");
    Ok(())
}

#[cfg(feature = "sdl-display")]
async fn present(pipeline: &Pipeline, config: &Config) -> Result<()> {
    use color_eyre::eyre::eyre;
    use framecast::display::Sdl2Display;

    if !config.display.window {
        return run_headless(pipeline).await;
    }

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut window = Sdl2Display::new(&sdl_context, config.normalize.target_size)?;
    window.run(&sdl_context, pipeline)
}

#[cfg(not(feature = "sdl-display"))]
async fn present(pipeline: &Pipeline, _config: &Config) -> Result<()> {
    run_headless(pipeline).await
}

/// Enter on stdin toggles streaming; stats are logged once a second until Ctrl-C.
async fn run_headless(pipeline: &Pipeline) -> Result<()> {
    info!("press Enter to start/stop streaming, Ctrl-C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => pipeline.toggle(),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
            _ = report.tick() => {
                let state = pipeline.state();
                info!(
                    streaming = state.enabled,
                    frame_rate = %state.frame_rate_label(),
                    timer = state.elapsed_seconds,
                    frames = state.frames_received,
                    sent = state.frames_sent,
                    "stats"
                );
            }
        }
    }
    Ok(())
}
