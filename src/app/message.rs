use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use iced_custom::Size;

use crate::detection::{PredictResponse, VideoStats};
use crate::error::AppError;
use crate::telemetry::TelemetryEvent;

#[derive(Debug, Clone)]
pub enum Message {
    /// Vsync tick while a reveal is in progress.
    Frame(Instant),
    WindowResized(Size),
    ScaleFactorChanged(f32),
    ImageLoaded(Result<(PathBuf, Arc<RgbaImage>), AppError>),
    DetectionsLoaded(Result<PredictResponse, AppError>),
    Analyze,
    Predicted(Result<PredictResponse, AppError>),
    Replay,
    TogglePolling,
    PollStats,
    StatsReceived(Result<VideoStats, AppError>),
    /// Push from the `/ws/metrics` socket.
    Telemetry(TelemetryEvent),
    ExportDebugLogs,
}
