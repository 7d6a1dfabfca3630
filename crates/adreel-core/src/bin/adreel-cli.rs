use std::{path::PathBuf, sync::Arc};

use adreel_core::{
    AppConfig, CancellationToken, Engine, ExportOptions, ExportOrchestrator, ExportProgress,
    FfmpegEncoder, FileFetcher, FrameRecorder, RasterSurface, TimelineProperty,
    diagnostics::init_tracing_with_options,
    fixtures::demo_engine,
    generate_parity_report,
    media::ClockedMediaProvider,
    parity::write_parity_report,
    persistence::{load_page, save_page},
    recorder::CaptureOptions,
    time::ms_to_seconds,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "adreel-cli")]
#[command(about = "Headless tools for adreel page export, parity and inspection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides `paths.logs_dir` from the config file.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Renders a page (the built-in demo by default) to PNG frames and a WAV mixdown.
    DemoExport {
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        page: Option<PathBuf>,

        #[arg(long)]
        fps: Option<u32>,

        /// Compile frames and audio into a video with ffmpeg.
        #[arg(long)]
        compile: bool,
    },
    ParityReport {
        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,

        #[arg(long)]
        page: Option<PathBuf>,

        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
    /// Writes an empty page shaped by the `[timeline]` config section.
    NewPage {
        #[arg(long, default_value = "page.adreel.json")]
        output: PathBuf,
    },
    /// Plays a page in real time, logging visibility and media events, then
    /// autosaves it. Ctrl-C stops playback early.
    Preview {
        #[arg(long)]
        page: Option<PathBuf>,
    },
    /// Prints the sampled frame state at a timeline position.
    Inspect {
        #[arg(long)]
        page: Option<PathBuf>,

        #[arg(long, default_value_t = 0.0)]
        at_ms: f64,
    },
}

fn open_engine(config: &AppConfig, page: Option<&PathBuf>) -> anyhow::Result<Engine> {
    match page {
        Some(path) => Ok(Engine::with_options(load_page(path)?, config.engine_options())),
        None => Ok(demo_engine(config.engine_options())?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default()?;
    let log_dir = cli.log_dir.unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing_with_options(
        &log_dir,
        &config.diagnostics.trace_file_prefix,
        &config.diagnostics.rust_log_filter,
    )?;

    match cli.command {
        Commands::DemoExport {
            output_dir,
            page,
            fps,
            compile,
        } => {
            let output_dir = output_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("failed to create {}", output_dir.display()))?;
            let mut engine = open_engine(&config, page.as_ref())?;
            save_page(&output_dir.join("page.adreel.json"), engine.page())?;

            let mut settings = config.export_settings();
            if let Some(fps) = fps {
                settings.fps = fps;
            }
            settings.validate()?;
            let fetcher = match &config.audio.asset_root {
                Some(root) => FileFetcher::with_root(root),
                None => FileFetcher::new(),
            };
            let surface = RasterSurface::new(config.export.raster_scale);

            if compile {
                let encoder = Arc::new(FfmpegEncoder::new(Some(config.ffmpeg_binary())));
                let mut orchestrator = ExportOrchestrator::new(settings, surface, encoder)
                    .with_fetcher(Arc::new(fetcher));
                let report = |progress: ExportProgress| {
                    info!(
                        phase = ?progress.phase,
                        capture_percent = progress.capture_percent,
                        compile_percent = progress.compile_percent,
                        "export progress"
                    );
                };
                let artifact = orchestrator
                    .export_video(
                        &mut engine,
                        ExportOptions {
                            cancel: CancellationToken::new(),
                            on_progress: Some(&report),
                        },
                    )
                    .await?;
                let path = output_dir.join(format!("demo.{}", settings.codec.extension()));
                std::fs::write(&path, &artifact.bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), frames = artifact.frame_count, "video written");
            } else {
                let orchestrator = ExportOrchestrator::new(
                    settings,
                    RasterSurface::default(),
                    Arc::new(FfmpegEncoder::default()),
                )
                .with_fetcher(Arc::new(fetcher));
                let cancel = CancellationToken::new();
                match orchestrator.export_audio(&mut engine, &cancel).await? {
                    Some(wav) => {
                        let path = output_dir.join("demo.wav");
                        std::fs::write(&path, wav)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                    }
                    None => warn!("page has no audible audio, wav skipped"),
                }

                let frames_dir = output_dir.join("frames");
                std::fs::create_dir_all(&frames_dir)
                    .with_context(|| format!("failed to create {}", frames_dir.display()))?;
                let mut recorder = FrameRecorder::new(surface);
                recorder.start(
                    engine.page(),
                    engine.page().duration_ms,
                    engine.scheduler_options(),
                    &ClockedMediaProvider,
                )?;
                let frames = recorder
                    .capture(settings.fps, CaptureOptions::default())
                    .await;
                recorder.stop();
                for frame in frames? {
                    let path = frames_dir.join(format!("frame-{:05}.png", frame.index));
                    std::fs::write(&path, &frame.png)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
                info!(path = %frames_dir.display(), "frames written");
            }
        }
        Commands::ParityReport { output, page, fps } => {
            let engine = open_engine(&config, page.as_ref())?;
            let report = generate_parity_report(&engine, fps).await?;
            write_parity_report(&output, &report)?;
            info!(path = %output.display(), "parity report generated");
        }
        Commands::NewPage { output } => {
            let page = config.blank_page()?;
            save_page(&output, &page)?;
            info!(path = %output.display(), width = page.width, height = page.height, "page created");
        }
        Commands::Preview { page } => {
            let mut engine = open_engine(&config, page.as_ref())?;
            let stop = CancellationToken::new();
            let ctrl_c = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let state = engine
                .drive(config.preview_period(), &stop, |report| {
                    for event in &report.events {
                        debug!(seek_ms = report.state.seek_ms, ?event, "preview event");
                    }
                })
                .await?;
            info!(
                seek_ms = state.seek_ms,
                duration_ms = state.duration_ms,
                "preview stopped"
            );
            let path = engine.autosave(&config.paths.autosave_dir)?;
            info!(path = %path.display(), "page autosaved");
        }
        Commands::Inspect { page, at_ms } => {
            let mut engine = open_engine(&config, page.as_ref())?;
            engine.set_timeline(TimelineProperty::Seek, ms_to_seconds(at_ms))?;
            let frame = engine.preview()?;
            println!("{}", serde_json::to_string_pretty(&frame)?);
        }
    }

    Ok(())
}
