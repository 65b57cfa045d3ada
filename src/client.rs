//! HTTP client for the inference backend.

use std::path::Path;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::detection::{Gps, Health, Metrics, PredictResponse, VideoStats, VideoUpload};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

/// Error body the backend attaches to non-2xx responses. `detail` is a plain
/// string for handled errors and a list of objects for validation failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| AppError::new(format!("Invalid server URL '{}': {}", base_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::new(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Upload an image for detection. Browser-style GPS is sent alongside so
    /// the backend can fall back to it when the image has no EXIF location.
    pub async fn predict(&self, image_path: &Path, gps: Option<Gps>) -> Result<PredictResponse, AppError> {
        let mut form = Form::new().part("file", file_part(image_path).await?);
        if let Some((lat, lon)) = gps.and_then(|g| g.coordinates()) {
            form = form
                .text("browser_lat", lat.to_string())
                .text("browser_lon", lon.to_string());
        }

        info!("Uploading {} for detection", image_path.display());
        let response = self.http.post(self.endpoint("/predict")).multipart(form).send().await?;
        let result: PredictResponse = decode(response).await?;
        debug!("Prediction: {}", result.summary());
        Ok(result)
    }

    pub async fn analyze_video(&self, video_path: &Path) -> Result<VideoUpload, AppError> {
        let form = Form::new().part("file", file_part(video_path).await?);
        info!("Uploading video {}", video_path.display());
        let response = self
            .http
            .post(self.endpoint("/analyze_video"))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    /// MJPEG stream URL for an uploaded video.
    pub fn video_feed_url(&self, upload: &VideoUpload) -> Result<String, AppError> {
        let mut url = Url::parse(&self.endpoint(&format!("/video_feed/{}", upload.video_id)))
            .map_err(|e| AppError::new(format!("Invalid video feed URL: {}", e)))?;
        url.query_pairs_mut().append_pair("path", &upload.path);
        Ok(url.to_string())
    }

    pub async fn video_stats(&self) -> Result<VideoStats, AppError> {
        self.get_json("/video_stats").await
    }

    pub async fn health(&self) -> Result<Health, AppError> {
        self.get_json("/health").await
    }

    pub async fn metrics(&self) -> Result<Metrics, AppError> {
        self.get_json("/metrics").await
    }

    /// `/ws/metrics` on the same host, with the scheme switched to ws/wss.
    pub fn metrics_ws_url(&self) -> Result<String, AppError> {
        let mut url = Url::parse(&self.endpoint("/ws/metrics"))
            .map_err(|e| AppError::new(format!("Invalid metrics URL: {}", e)))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| AppError::new(format!("Cannot open a WebSocket to {}", self.base_url)))?;
        Ok(url.to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self.http.get(self.endpoint(path)).send().await?;
        decode(response).await
    }
}

async fn file_part(path: &Path) -> Result<Part, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::new(format!("Failed to read {}: {}", path.display(), e)))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let part = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(path))?;
    Ok(part)
}

fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    let status = response.status();
    let body = response.text().await?;
    decode_body(status, &body)
}

fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, AppError> {
    if !status.is_success() {
        let message = error_message(status, body);
        warn!("{}", message);
        return Err(AppError::new(message));
    }
    Ok(serde_json::from_str(body)?)
}

fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|e| match e.detail {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    });
    match detail {
        Some(detail) => format!("Server returned {}: {}", status, detail),
        None => format!("Server returned {}", status),
    }
}
