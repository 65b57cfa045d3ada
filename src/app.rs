// Submodules
mod message;
mod message_handlers;

pub use message::Message;

use iced_custom as iced;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use futures::StreamExt;
use image::RgbaImage;

use iced::widget::image::Handle;
use iced::widget::{button, column, container, image as image_widget, row, text};
use iced::{time, window, Alignment, Element, Length, Size, Subscription, Task};

use crate::build_info::BuildInfo;
use crate::client::ApiClient;
use crate::config::DEFAULT_TELEMETRY_RETRY_SECS;
use crate::detection::{load_detections, LatestInference, PredictResponse, VideoStats};
use crate::error::AppError;
use crate::logging::LogBuffer;
use crate::overlay::{FrameRequest, OverlayRenderer};
use crate::resize::ResizeOutcome;
use crate::settings::UserSettings;
use crate::surface::raster::RasterSurface;
use crate::surface::Surface;
use crate::telemetry::telemetry_events;

pub const STATUS_BAR_HEIGHT: f32 = 40.0;

/// Startup options for the viewer window
pub struct ViewerFlags {
    pub settings: UserSettings,
    pub image: Option<PathBuf>,
    pub detections: Option<PathBuf>,
    pub server_url: String,
    pub dpr_override: Option<f32>,
    pub poll_stats: bool,
    pub log_buffer: LogBuffer,
}

pub struct RoadLensViewer {
    pub title: String,
    pub renderer: OverlayRenderer<RasterSurface>,
    pub frame_request: Option<FrameRequest>,
    pub frame_handle: Option<Handle>,
    pub client: Option<ApiClient>,
    pub image_path: Option<PathBuf>,
    pub detections_path: Option<PathBuf>,
    pub last_response: Option<PredictResponse>,
    pub video_stats: Option<VideoStats>,
    /// `/ws/metrics` endpoint, when the server URL allows one
    pub metrics_url: Option<String>,
    pub latest_inference: Option<LatestInference>,
    pub telemetry_connected: bool,
    pub status: String,
    pub is_analyzing: bool,
    pub poll_stats: bool,
    pub stats_in_flight: bool,
    pub poll_interval: Duration,
    pub window_size: Size,
    pub scale_factor: f32,
    pub dpr_override: Option<f32>,
    pub log_buffer: LogBuffer,
}

impl RoadLensViewer {
    pub fn new(flags: ViewerFlags) -> (Self, Task<Message>) {
        let ViewerFlags {
            settings,
            image,
            detections,
            server_url,
            dpr_override,
            poll_stats,
            log_buffer,
        } = flags;

        let surface = RasterSurface::with_label_font(settings.label_font_path().as_deref());
        let renderer = OverlayRenderer::new(
            surface,
            settings.overlay_style(),
            settings.timeline(),
            settings.dpr_cap,
        );

        let (client, status) = match ApiClient::new(&server_url, settings.request_timeout()) {
            Ok(client) => (Some(client), format!("Server: {}", server_url)),
            Err(e) => {
                error!("{}", e);
                (None, e.to_string())
            }
        };

        let metrics_url = client.as_ref().and_then(|c| match c.metrics_ws_url() {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Live metrics disabled: {}", e);
                None
            }
        });

        let mut viewer = Self {
            title: format!("RoadLens {}", BuildInfo::display_version()),
            renderer,
            frame_request: None,
            frame_handle: None,
            client,
            image_path: None,
            detections_path: detections,
            last_response: None,
            video_stats: None,
            metrics_url,
            latest_inference: None,
            telemetry_connected: false,
            status,
            is_analyzing: false,
            poll_stats,
            stats_in_flight: false,
            poll_interval: settings.poll_interval(),
            window_size: Size::new(settings.window_width as f32, settings.window_height as f32),
            scale_factor: 1.0,
            dpr_override,
            log_buffer,
        };
        viewer.sync_surface_size();

        let mut tasks = vec![window::get_oldest().and_then(|id| {
            Task::batch([
                window::get_size(id).map(Message::WindowResized),
                window::get_scale_factor(id).map(Message::ScaleFactorChanged),
            ])
        })];
        if let Some(path) = image {
            tasks.push(Task::perform(load_image(path), Message::ImageLoaded));
        } else if let Some(path) = viewer.detections_path.take() {
            // Boxes without an image have nothing to be placed on
            warn!("Ignoring detections file {} without an image", path.display());
        }

        (viewer, Task::batch(tasks))
    }

    pub fn title(&self) -> String {
        match &self.image_path {
            Some(path) => format!(
                "{} - {}",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                self.title
            ),
            None => self.title.clone(),
        }
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        message_handlers::handle_message(self, message)
    }

    pub fn view(&self) -> Element<'_, Message> {
        let can_analyze = self.client.is_some() && self.image_path.is_some() && !self.is_analyzing;
        let can_replay = !self.renderer.detections().is_empty();

        let status_bar = row![
            button(text(if self.is_analyzing { "Analyzing..." } else { "Analyze" }))
                .on_press_maybe(can_analyze.then_some(Message::Analyze)),
            button(text("Replay")).on_press_maybe(can_replay.then_some(Message::Replay)),
            button(text(if self.poll_stats { "Stop stats" } else { "Poll stats" }))
                .on_press_maybe(self.client.is_some().then_some(Message::TogglePolling)),
            button(text("Export logs")).on_press(Message::ExportDebugLogs),
            text(&self.status).size(14),
            text(self.result_summary()).size(14),
        ]
        .spacing(8)
        .align_y(Alignment::Center);

        let overlay: Element<'_, Message> = match (&self.frame_handle, self.css_size()) {
            (Some(handle), Some((width, height))) => image_widget(handle.clone())
                .width(Length::Fixed(width))
                .height(Length::Fixed(height))
                .into(),
            _ => container(text("No image loaded")).center(Length::Fill).into(),
        };

        column![
            container(status_bar)
                .padding(6)
                .width(Length::Fill)
                .height(Length::Fixed(STATUS_BAR_HEIGHT)),
            container(overlay).width(Length::Fill).height(Length::Fill),
        ]
        .into()
    }

    pub fn subscription(&self) -> Subscription<Message> {
        let mut subscriptions = vec![window::resize_events().map(|(_id, size)| Message::WindowResized(size))];
        // Frame callbacks only while a reveal cycle wants them
        if self.frame_request.is_some() {
            subscriptions.push(window::frames().map(Message::Frame));
        }
        if self.poll_stats && self.client.is_some() {
            subscriptions.push(time::every(self.poll_interval).map(|_| Message::PollStats));
        }
        if let Some(url) = &self.metrics_url {
            let events = telemetry_events(url.clone(), Duration::from_secs(DEFAULT_TELEMETRY_RETRY_SECS));
            subscriptions.push(Subscription::run_with_id(url.clone(), events.map(Message::Telemetry)));
        }
        Subscription::batch(subscriptions)
    }

    /// Severity of the last analysis, live video stats while polling, then the
    /// backend's most recent scan.
    pub(crate) fn result_summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(response) = &self.last_response {
            parts.push(format!("Severity: {}", response.severity().as_str()));
        }
        if let Some(stats) = &self.video_stats {
            let mut live = format!("Live: {} detections", stats.detections);
            if let (Some(lat), Some(lon)) = (stats.lat, stats.lon) {
                live.push_str(&format!(" @ {:.5}, {:.5}", lat, lon));
            }
            parts.push(live);
        }
        if let Some(latest) = &self.latest_inference {
            parts.push(latest.summary());
        }
        parts.join(" | ")
    }

    /// Overlay area in CSS (logical) pixels: the window below the status bar.
    fn css_size(&self) -> Option<(f32, f32)> {
        let width = self.window_size.width;
        let height = self.window_size.height - STATUS_BAR_HEIGHT;
        (width >= 1.0 && height >= 1.0).then_some((width, height))
    }

    pub(crate) fn device_pixel_ratio(&self) -> f32 {
        self.dpr_override.unwrap_or(self.scale_factor)
    }

    pub(crate) fn sync_surface_size(&mut self) {
        let (width, height) = self.css_size().unwrap_or((0.0, 0.0));
        let dpr = self.device_pixel_ratio();
        if self.renderer.resize(width, height, dpr) != ResizeOutcome::Unchanged {
            if let Some(t) = self.renderer.transform() {
                debug!(
                    "Fit scale {:.4}, offset ({:.1}, {:.1})",
                    t.fit_scale, t.offset_x, t.offset_y
                );
            }
            self.refresh_frame();
        }
    }

    /// Hand the latest surface contents to the image widget.
    pub(crate) fn refresh_frame(&mut self) {
        let surface = self.renderer.surface();
        let size = surface.backing_size();
        self.frame_handle = if size.is_empty() || !self.renderer.has_image() {
            None
        } else {
            Some(Handle::from_rgba(size.width, size.height, surface.image().as_raw().clone()))
        };
    }
}

async fn load_image(path: PathBuf) -> Result<(PathBuf, Arc<RgbaImage>), AppError> {
    tokio::task::spawn_blocking(move || -> Result<_, AppError> {
        let decoded = image::open(&path)
            .map_err(|e| AppError::new(format!("Failed to open {}: {}", path.display(), e)))?;
        Ok((path, Arc::new(decoded.to_rgba8())))
    })
    .await
    .map_err(|e| AppError::new(format!("Image decode task failed: {}", e)))?
}

pub(crate) async fn read_detections(path: PathBuf) -> Result<PredictResponse, AppError> {
    tokio::task::spawn_blocking(move || load_detections(&path))
        .await
        .map_err(|e| AppError::new(format!("Detections load task failed: {}", e)))?
}
