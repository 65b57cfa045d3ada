// Routes viewer messages to the renderer, the backend client and the status bar

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use iced_custom::{Size, Task};
use image::RgbaImage;

use crate::app::{read_detections, Message, RoadLensViewer};
use crate::client::ApiClient;
use crate::detection::{PredictResponse, VideoStats};
use crate::error::AppError;
use crate::logging;
use crate::telemetry::TelemetryEvent;

pub fn handle_message(app: &mut RoadLensViewer, message: Message) -> Task<Message> {
    match message {
        Message::Frame(now) => handle_frame(app, now),
        Message::WindowResized(size) => handle_window_resized(app, size),
        Message::ScaleFactorChanged(scale_factor) => {
            debug!("Window scale factor: {}", scale_factor);
            app.scale_factor = scale_factor;
            app.sync_surface_size();
            Task::none()
        }

        Message::ImageLoaded(result) => handle_image_loaded(app, result),
        Message::DetectionsLoaded(Ok(response)) => {
            info!("Loaded {} detections from file", response.detections.len());
            apply_response(app, response);
            Task::none()
        }
        Message::DetectionsLoaded(Err(e)) => {
            error!("{}", e);
            app.status = e.to_string();
            Task::none()
        }

        Message::Analyze => handle_analyze(app),
        Message::Predicted(Ok(response)) => {
            app.is_analyzing = false;
            apply_response(app, response);
            Task::none()
        }
        Message::Predicted(Err(e)) => {
            // Previous boxes stay on screen
            app.is_analyzing = false;
            error!("Analysis failed: {}", e);
            app.status = format!("Analysis failed: {}", e);
            Task::none()
        }
        Message::Replay => {
            app.frame_request = app.renderer.replay();
            app.refresh_frame();
            Task::none()
        }

        Message::TogglePolling => {
            app.poll_stats = !app.poll_stats;
            info!("Video stats polling {}", if app.poll_stats { "enabled" } else { "disabled" });
            if !app.poll_stats {
                app.video_stats = None;
            }
            Task::none()
        }
        Message::PollStats => match start_stats_poll(app) {
            Some(client) => Task::perform(async move { client.video_stats().await }, Message::StatsReceived),
            None => Task::none(),
        },
        Message::StatsReceived(result) => handle_stats(app, result),
        Message::Telemetry(event) => handle_telemetry(app, event),

        Message::ExportDebugLogs => {
            match logging::export_debug_logs("roadlens", &app.log_buffer) {
                Ok(path) => {
                    info!("Debug logs exported to {}", path.display());
                    app.status = format!("Logs exported to {}", path.display());
                }
                Err(e) => {
                    error!("Failed to export debug logs: {}", e);
                    app.status = format!("Failed to export logs: {}", e);
                }
            }
            Task::none()
        }
    }
}

fn handle_frame(app: &mut RoadLensViewer, now: Instant) -> Task<Message> {
    // A frame may still arrive after the subscription was dropped
    let Some(request) = app.frame_request.take() else {
        return Task::none();
    };
    app.frame_request = app.renderer.on_frame(request, now);
    app.refresh_frame();
    if app.frame_request.is_none() {
        debug!("Reveal finished at progress {:.3}", app.renderer.progress());
    }
    Task::none()
}

fn handle_window_resized(app: &mut RoadLensViewer, size: Size) -> Task<Message> {
    if app.window_size != size {
        debug!("Window resized to {}x{}", size.width, size.height);
        app.window_size = size;
        app.sync_surface_size();
    }
    Task::none()
}

fn handle_image_loaded(
    app: &mut RoadLensViewer,
    result: Result<(PathBuf, Arc<RgbaImage>), AppError>,
) -> Task<Message> {
    match result {
        Ok((path, image)) => {
            info!("Loaded {} ({}x{})", path.display(), image.width(), image.height());
            app.renderer.set_image(image);
            app.image_path = Some(path);
            app.refresh_frame();
            match app.detections_path.take() {
                Some(detections) => Task::perform(read_detections(detections), Message::DetectionsLoaded),
                None => Task::none(),
            }
        }
        Err(e) => {
            error!("{}", e);
            app.status = e.to_string();
            Task::none()
        }
    }
}

fn handle_analyze(app: &mut RoadLensViewer) -> Task<Message> {
    let (Some(client), Some(path)) = (app.client.clone(), app.image_path.clone()) else {
        return Task::none();
    };
    if app.is_analyzing {
        return Task::none();
    }
    app.is_analyzing = true;
    app.status = format!("Analyzing {}...", path.display());
    Task::perform(async move { client.predict(&path, None).await }, Message::Predicted)
}

fn apply_response(app: &mut RoadLensViewer, response: PredictResponse) {
    app.status = response.summary();
    app.frame_request = app.renderer.set_detections(response.detections.clone());
    app.refresh_frame();
    app.last_response = Some(response);
}

/// Client for the next stats request, or `None` while one is still out.
fn start_stats_poll(app: &mut RoadLensViewer) -> Option<ApiClient> {
    if app.stats_in_flight {
        debug!("Previous stats request still running; skipping poll");
        return None;
    }
    let client = app.client.clone()?;
    app.stats_in_flight = true;
    Some(client)
}

fn handle_stats(app: &mut RoadLensViewer, result: Result<VideoStats, AppError>) -> Task<Message> {
    app.stats_in_flight = false;
    if !app.poll_stats {
        debug!("Dropping stats reply that arrived after polling stopped");
        return Task::none();
    }
    match result {
        Ok(stats) => {
            debug!("Video stats: {} detections", stats.detections);
            app.video_stats = Some(stats);
        }
        Err(e) => {
            warn!("Video stats poll failed: {}", e);
            app.status = format!("Stats unavailable: {}", e);
        }
    }
    Task::none()
}

fn handle_telemetry(app: &mut RoadLensViewer, event: TelemetryEvent) -> Task<Message> {
    match event {
        TelemetryEvent::Connected => {
            info!("Live metrics connected");
            app.telemetry_connected = true;
        }
        TelemetryEvent::Snapshot(metrics) => {
            debug!(
                "Metrics snapshot: {} requests, {} websockets",
                metrics.total_requests, metrics.active_websockets
            );
            app.telemetry_connected = true;
            app.latest_inference = metrics.latest().cloned();
        }
        TelemetryEvent::InferenceComplete(latest) => {
            debug!("Backend finished a scan: {}", latest.summary());
            app.latest_inference = Some(latest);
        }
        TelemetryEvent::Heartbeat => {}
        TelemetryEvent::Disconnected(reason) => {
            if app.telemetry_connected {
                warn!("Live metrics disconnected: {}", reason);
            }
            app.telemetry_connected = false;
        }
    }
    Task::none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::app::ViewerFlags;
    use crate::detection::{Detection, LatestInference, Metrics};
    use crate::settings::UserSettings;

    fn viewer() -> RoadLensViewer {
        let (viewer, _startup) = RoadLensViewer::new(ViewerFlags {
            settings: UserSettings::default(),
            image: None,
            detections: None,
            server_url: "http://localhost:8000".to_string(),
            dpr_override: Some(1.0),
            poll_stats: false,
            log_buffer: Arc::new(Mutex::new(VecDeque::new())),
        });
        viewer
    }

    fn viewer_with_image() -> RoadLensViewer {
        let mut app = viewer();
        let image = Arc::new(RgbaImage::new(400, 300));
        let _ = handle_message(&mut app, Message::ImageLoaded(Ok((PathBuf::from("road.jpg"), image))));
        app
    }

    fn response(detections: Vec<Detection>) -> PredictResponse {
        PredictResponse {
            detections,
            severity_score: 20.0,
            ..PredictResponse::default()
        }
    }

    fn finish_reveal(app: &mut RoadLensViewer) {
        let start = Instant::now();
        let _ = handle_message(app, Message::Frame(start));
        let _ = handle_message(app, Message::Frame(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_image_load_publishes_frame() {
        let app = viewer_with_image();
        assert!(app.renderer.has_image());
        assert!(app.frame_handle.is_some());
        assert_eq!(app.metrics_url.as_deref(), Some("ws://localhost:8000/ws/metrics"));
    }

    #[test]
    fn test_new_detections_restart_reveal() {
        let mut app = viewer_with_image();
        let first = vec![Detection::new(0.1, 0.1, 0.4, 0.4, 0.9, "crack")];
        let _ = handle_message(&mut app, Message::DetectionsLoaded(Ok(response(first))));
        assert!(app.frame_request.is_some());
        finish_reveal(&mut app);
        assert!(app.frame_request.is_none());
        assert_eq!(app.renderer.progress(), 1.0);

        let second = vec![
            Detection::new(0.5, 0.5, 0.9, 0.9, 0.6, "pothole"),
            Detection::new(0.2, 0.6, 0.3, 0.8, 0.4, "crack"),
        ];
        let _ = handle_message(&mut app, Message::DetectionsLoaded(Ok(response(second))));
        assert!(app.frame_request.is_some());
        assert_eq!(app.renderer.detections().len(), 2);
        assert!(app.renderer.progress() < 1.0);
        assert!(app.status.starts_with("2 detections"));

        finish_reveal(&mut app);
        assert!(app.frame_request.is_none());
        assert_eq!(app.renderer.progress(), 1.0);
    }

    #[test]
    fn test_frame_without_request_is_ignored() {
        let mut app = viewer_with_image();
        let _ = handle_message(
            &mut app,
            Message::DetectionsLoaded(Ok(response(vec![Detection::new(0.1, 0.1, 0.4, 0.4, 0.9, "crack")]))),
        );
        app.frame_request = None;
        let before = app.renderer.progress();

        let _ = handle_message(&mut app, Message::Frame(Instant::now()));
        let _ = handle_message(&mut app, Message::Frame(Instant::now() + Duration::from_secs(60)));
        assert!(app.frame_request.is_none());
        assert_eq!(app.renderer.progress(), before);
    }

    #[test]
    fn test_failed_analysis_keeps_previous_boxes() {
        let mut app = viewer_with_image();
        let _ = handle_message(
            &mut app,
            Message::DetectionsLoaded(Ok(response(vec![Detection::new(0.1, 0.1, 0.4, 0.4, 0.9, "crack")]))),
        );

        let _ = handle_message(&mut app, Message::Analyze);
        assert!(app.is_analyzing);
        assert!(app.status.starts_with("Analyzing"));

        let _ = handle_message(&mut app, Message::Predicted(Err(AppError::new("Model not loaded"))));
        assert!(!app.is_analyzing);
        assert_eq!(app.status, "Analysis failed: Model not loaded");
        assert_eq!(app.renderer.detections().len(), 1);
        assert!(app.last_response.is_some());
    }

    #[test]
    fn test_analyze_without_image_does_nothing() {
        let mut app = viewer();
        let _ = handle_message(&mut app, Message::Analyze);
        assert!(!app.is_analyzing);
    }

    #[test]
    fn test_stats_poll_waits_for_previous_reply() {
        let mut app = viewer();
        let _ = handle_message(&mut app, Message::TogglePolling);
        assert!(app.poll_stats);

        assert!(start_stats_poll(&mut app).is_some());
        assert!(app.stats_in_flight);
        // Slow backend: later ticks don't stack more requests
        assert!(start_stats_poll(&mut app).is_none());
        assert!(start_stats_poll(&mut app).is_none());

        let stats = VideoStats {
            detections: 4,
            ..VideoStats::default()
        };
        let _ = handle_message(&mut app, Message::StatsReceived(Ok(stats)));
        assert!(!app.stats_in_flight);
        assert_eq!(app.video_stats.as_ref().map(|s| s.detections), Some(4));
        assert!(start_stats_poll(&mut app).is_some());
    }

    #[test]
    fn test_late_stats_reply_after_stop_is_dropped() {
        let mut app = viewer();
        let _ = handle_message(&mut app, Message::TogglePolling);
        let _ = handle_message(&mut app, Message::PollStats);
        assert!(app.stats_in_flight);

        let _ = handle_message(&mut app, Message::TogglePolling);
        let _ = handle_message(&mut app, Message::StatsReceived(Ok(VideoStats::default())));
        assert!(app.video_stats.is_none());
        assert!(!app.stats_in_flight);
    }

    #[test]
    fn test_telemetry_updates_latest_scan() {
        let mut app = viewer();
        let _ = handle_message(&mut app, Message::Telemetry(TelemetryEvent::Connected));
        let _ = handle_message(&mut app, Message::Telemetry(TelemetryEvent::Snapshot(Metrics::default())));
        assert!(app.telemetry_connected);
        assert!(app.latest_inference.is_none());

        let latest = LatestInference {
            severity_score: 62.0,
            severity_level: "Severe".to_string(),
            crack_count: 5,
            inference_time_ms: 48.0,
            timestamp: Some("2026-05-01T08:00:00".to_string()),
        };
        let _ = handle_message(&mut app, Message::Telemetry(TelemetryEvent::InferenceComplete(latest)));
        assert!(app.result_summary().contains("last scan: 5 cracks, Severe"));

        let _ = handle_message(
            &mut app,
            Message::Telemetry(TelemetryEvent::Disconnected("closed by server".to_string())),
        );
        assert!(!app.telemetry_connected);
        // Last known scan stays visible
        assert!(app.latest_inference.is_some());
    }
}
