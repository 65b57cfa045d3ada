mod animation;
mod app;
mod build_info;
mod client;
mod config;
mod detection;
mod error;
mod logging;
mod overlay;
mod resize;
mod settings;
mod surface;
mod telemetry;
mod transform;

use iced_custom as iced;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::app::{RoadLensViewer, ViewerFlags};
use crate::build_info::BuildInfo;
use crate::client::ApiClient;
use crate::config::{CONFIG, DEFAULT_RENDER_FPS};
use crate::detection::{load_detections, Gps};
use crate::error::AppError;
use crate::logging::LogBuffer;
use crate::overlay::OverlayRenderer;
use crate::resize::ResizeOutcome;
use crate::settings::UserSettings;
use crate::surface::raster::RasterSurface;
use crate::telemetry::{MetricsSocket, TelemetryEvent};

const APP_NAME: &str = "roadlens";
const LIVE_METRICS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "roadlens")]
#[command(about = "Road damage detection viewer with animated bounding-box overlays")]
#[command(version = BuildInfo::build_string())]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the viewer window
    View(ViewArgs),

    /// Render the reveal animation offline to numbered PNG frames
    Render(RenderArgs),

    /// Send an image to the backend and print the detections
    Predict {
        image: PathBuf,

        #[arg(long)]
        server: Option<String>,

        /// Latitude to send along when the image has no GPS data
        #[arg(long, requires = "lon")]
        lat: Option<f64>,

        #[arg(long, requires = "lat")]
        lon: Option<f64>,

        /// Write the full response JSON here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Upload a video for analysis and print its stream URL
    Video {
        file: PathBuf,

        #[arg(long)]
        server: Option<String>,
    },

    /// Print backend health and metrics, then the live metrics feed
    Health {
        #[arg(long)]
        server: Option<String>,

        /// Keep printing live metrics for this many seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },

    /// Show the settings in effect and where they are read from
    Settings {
        /// Write the values to the settings file, keeping existing comments
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Args, Default)]
struct ViewArgs {
    /// Image to open
    image: Option<PathBuf>,

    /// Detections JSON (a /predict response or a bare array) to overlay
    #[arg(long)]
    detections: Option<PathBuf>,

    #[arg(long)]
    server: Option<String>,

    /// Device pixel ratio to use instead of the window's scale factor
    #[arg(long)]
    dpr: Option<f32>,

    /// Poll live video statistics from the start
    #[arg(long)]
    poll_stats: bool,
}

#[derive(Debug, Clone, Args)]
struct RenderArgs {
    image: PathBuf,

    #[arg(long)]
    detections: PathBuf,

    /// Output directory for frame_NNNN.png
    #[arg(long)]
    out: PathBuf,

    /// Container width in CSS pixels
    #[arg(long, default_value_t = 960)]
    width: u32,

    /// Container height in CSS pixels
    #[arg(long, default_value_t = 540)]
    height: u32,

    #[arg(long, default_value_t = 1.0)]
    dpr: f32,

    #[arg(long, default_value_t = DEFAULT_RENDER_FPS)]
    fps: u32,

    /// Only write the completed last frame
    #[arg(long)]
    final_only: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_buffer = logging::setup_logger();
    logging::setup_panic_hook(APP_NAME, Arc::clone(&log_buffer));
    config::init_settings(cli.settings.as_deref());
    info!("RoadLens {} starting", BuildInfo::display_version());
    debug!("{}", BuildInfo::detailed_info().replace('\n', ", "));

    let result = match cli.command.unwrap_or_else(|| Commands::View(ViewArgs::default())) {
        Commands::View(args) => run_viewer(args, log_buffer),
        Commands::Render(args) => run_render(&args),
        Commands::Predict {
            image,
            server,
            lat,
            lon,
            out,
        } => block_on(run_predict(image, server, lat, lon, out)),
        Commands::Video { file, server } => block_on(run_video(file, server)),
        Commands::Health { server, watch } => block_on(run_health(server, watch)),
        Commands::Settings { write } => run_settings(cli.settings.as_deref(), write),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_viewer(args: ViewArgs, log_buffer: LogBuffer) -> Result<(), AppError> {
    let flags = ViewerFlags {
        settings: config::settings().clone(),
        image: args.image,
        detections: args.detections,
        server_url: args.server.unwrap_or_else(|| CONFIG.server_url.clone()),
        dpr_override: args.dpr,
        poll_stats: args.poll_stats,
        log_buffer,
    };

    iced::application(RoadLensViewer::title, RoadLensViewer::update, RoadLensViewer::view)
        .subscription(RoadLensViewer::subscription)
        .window_size(iced::Size::new(CONFIG.window_width as f32, CONFIG.window_height as f32))
        .theme(|_| iced::Theme::Dark)
        .run_with(move || RoadLensViewer::new(flags))
        .map_err(|e| AppError::new(format!("Viewer failed: {}", e)))
}

fn run_render(args: &RenderArgs) -> Result<(), AppError> {
    let settings = config::settings();
    let image = image::open(&args.image)
        .map_err(|e| AppError::new(format!("Failed to open {}: {}", args.image.display(), e)))?
        .to_rgba8();
    let response = load_detections(&args.detections)?;
    std::fs::create_dir_all(&args.out)?;

    let surface = RasterSurface::with_label_font(settings.label_font_path().as_deref());
    let mut renderer = OverlayRenderer::new(surface, settings.overlay_style(), settings.timeline(), settings.dpr_cap);
    if renderer.resize(args.width as f32, args.height as f32, args.dpr) == ResizeOutcome::NotLaidOut {
        return Err(AppError::new("Output width and height must be non-zero"));
    }
    renderer.set_image(Arc::new(image));

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let mut request = renderer.set_detections(response.detections);
    let mut written = 0usize;
    if !args.final_only {
        write_frame(&renderer, &args.out, written)?;
        written += 1;
    }
    while let Some(current) = request {
        request = renderer.on_frame_after(current, frame_interval);
        if !args.final_only {
            write_frame(&renderer, &args.out, written)?;
            written += 1;
        }
    }
    if args.final_only {
        write_frame(&renderer, &args.out, written)?;
        written += 1;
    }

    info!("Rendered {} frames into {}", written, args.out.display());
    println!("Wrote {} frame(s) to {}", written, args.out.display());
    Ok(())
}

fn write_frame(renderer: &OverlayRenderer<RasterSurface>, dir: &Path, index: usize) -> Result<(), AppError> {
    let path = dir.join(format!("frame_{:04}.png", index));
    renderer.surface().save_png(&path)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn run_settings(custom_path: Option<&Path>, write: bool) -> Result<(), AppError> {
    let settings = config::settings();
    let path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(UserSettings::settings_path);
    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(settings)?);

    if write {
        match custom_path {
            Some(path) => settings.save_to(path)?,
            None => settings.save()?,
        }
        println!("Settings written to {}", path.display());
    }
    Ok(())
}

fn block_on<F>(future: F) -> Result<(), AppError>
where
    F: std::future::Future<Output = Result<(), AppError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::new(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(future)
}

fn api_client(server: Option<String>) -> Result<ApiClient, AppError> {
    let server_url = server.unwrap_or_else(|| CONFIG.server_url.clone());
    ApiClient::new(&server_url, Duration::from_secs(CONFIG.request_timeout_secs.max(1)))
}

async fn run_predict(
    image: PathBuf,
    server: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    out: Option<PathBuf>,
) -> Result<(), AppError> {
    let client = api_client(server)?;
    let gps = Gps { lat, lon };
    let response = client.predict(&image, Some(gps)).await?;

    println!("{}", response.summary());
    for detection in &response.detections {
        println!(
            "  {:<24} [{:.1}, {:.1}, {:.1}, {:.1}]",
            detection.label(),
            detection.x1,
            detection.y1,
            detection.x2,
            detection.y2
        );
    }
    if let Some(path) = out {
        std::fs::write(&path, serde_json::to_string_pretty(&response)?)?;
        println!("Response written to {}", path.display());
    }
    Ok(())
}

async fn run_video(file: PathBuf, server: Option<String>) -> Result<(), AppError> {
    let client = api_client(server)?;
    let upload = client.analyze_video(&file).await?;
    println!("Video id: {}", upload.video_id);
    println!("Stream:   {}", client.video_feed_url(&upload)?);
    Ok(())
}

async fn run_health(server: Option<String>, watch: Option<u64>) -> Result<(), AppError> {
    let client = api_client(server)?;
    let health = client.health().await?;
    println!(
        "{}: status {} | model loaded: {} | uptime {:.0}s",
        client.base_url(),
        health.status,
        health.model_loaded,
        health.uptime_seconds
    );

    match client.metrics().await {
        Ok(metrics) => println!(
            "requests: {} | avg inference: {:.1} ms | websockets: {}",
            metrics.total_requests, metrics.average_inference_time, metrics.active_websockets
        ),
        Err(e) => warn!("Metrics unavailable: {}", e),
    }

    let url = client.metrics_ws_url()?;
    let mut socket = match tokio::time::timeout(LIVE_METRICS_TIMEOUT, MetricsSocket::connect(&url)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            warn!("Live metrics unavailable: {}", e);
            return Ok(());
        }
        Err(_) => {
            warn!("Timed out connecting to {}", url);
            return Ok(());
        }
    };

    // Without --watch, stop after the snapshot sent on connect
    let window = watch.map(Duration::from_secs).unwrap_or(LIVE_METRICS_TIMEOUT);
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let event = match tokio::time::timeout_at(deadline, socket.next_event()).await {
            Ok(Ok(Some(event))) => event,
            Ok(Ok(None)) => {
                println!("live: closed by server");
                break;
            }
            Ok(Err(e)) => {
                warn!("{}", e);
                break;
            }
            Err(_) => break,
        };
        if let Some(line) = describe_event(&event) {
            println!("{}", line);
        }
        if watch.is_none() && matches!(event, TelemetryEvent::Snapshot(_)) {
            break;
        }
    }
    socket.close().await;
    Ok(())
}

fn describe_event(event: &TelemetryEvent) -> Option<String> {
    match event {
        TelemetryEvent::Snapshot(metrics) => {
            let mut line = format!(
                "live: {} requests | {} websockets",
                metrics.total_requests, metrics.active_websockets
            );
            if let Some(latest) = metrics.latest() {
                line.push_str(&format!(" | {}", latest.summary()));
            }
            Some(line)
        }
        TelemetryEvent::InferenceComplete(latest) => Some(format!("live: {}", latest.summary())),
        TelemetryEvent::Disconnected(reason) => Some(format!("live: disconnected ({})", reason)),
        TelemetryEvent::Connected | TelemetryEvent::Heartbeat => None,
    }
}
