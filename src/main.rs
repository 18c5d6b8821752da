//! soundbake: generates the audio assets listed in a catalog.
//!
//! Sound effects and voice lines are fetched as-is. Music tracks are built
//! from overlapping segments, assembled into one file and checked for gaps.

use std::time::Instant;

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{error, info, warn};

use soundbake::audio::{AudioTool, FfmpegTool, WavTool};
use soundbake::cli::Cli;
use soundbake::config::{resolve_api_key, BakeConfig, ToolKind};
use soundbake::error::BakeError;
use soundbake::generation::{BatchRunner, CancelFlag};
use soundbake::source::ElevenLabsSource;
use soundbake::types::Catalog;

fn main() {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            if let Some(bake) = e.downcast_ref::<BakeError>() {
                error!("hint: {}", bake.code.recovery_hint());
            }
            std::process::exit(1);
        }
    }
}

/// Runs one whole-catalog pass. Returns false if any asset failed.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let started = Instant::now();

    let mut config = BakeConfig::from_env();
    cli.apply(&mut config);
    if let Some(problem) = config.validate() {
        bail!("invalid configuration: {}", problem);
    }

    let mut catalog = match cli.catalog {
        Some(ref path) => Catalog::load(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => Catalog::builtin().context("loading built-in catalog")?,
    };
    if !config.only.is_empty() {
        catalog.retain_keys(&config.only);
    }

    info!(
        sfx = catalog.sfx.len(),
        voices = catalog.voices.lines.len(),
        music = catalog.music.len(),
        segments = catalog.segment_total(),
        tool = %config.tool,
        strategy = %config.plan.strategy,
        "catalog loaded"
    );

    let tool: Box<dyn AudioTool> = match config.tool {
        ToolKind::Ffmpeg => {
            let ffmpeg = FfmpegTool::new(&config.ffmpeg, &config.ffprobe, config.tool_timeout());
            ffmpeg.check_available().map_err(BakeError::from)?;
            Box::new(ffmpeg)
        }
        ToolKind::Native => Box::new(WavTool::new()),
    };

    let source = if config.generates() {
        let key = resolve_api_key(&cli.config_js)?;
        Some(ElevenLabsSource::new(key, config.request_timeout())?)
    } else {
        None
    };

    let cancel = CancelFlag::new();
    install_signal_handler(cancel.clone())?;

    let mut runner = BatchRunner::new(&catalog, &config, tool.as_ref()).with_cancel(cancel);
    if let Some(ref source) = source {
        runner = runner.with_source(source);
    }
    let summary = runner.run()?;

    info!(
        elapsed_sec = format!("{:.1}", started.elapsed().as_secs_f64()),
        "done"
    );
    Ok(summary.is_success())
}

/// Cancels the run on the first Ctrl-C or SIGTERM and exits on the second.
///
/// Signals are awaited on a dedicated thread running a current-thread runtime.
fn install_signal_handler(cancel: CancelFlag) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                shutdown_signal().await;
                warn!("interrupt received, finishing in-flight steps (repeat to abort)");
                cancel.cancel();

                shutdown_signal().await;
                error!("second interrupt, aborting");
                std::process::exit(130);
            })
        })
        .context("spawning signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
