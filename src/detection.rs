/// Detection payloads exchanged with the inference backend
///
/// Shapes follow the `/predict`, `/analyze_video`, `/video_stats`, `/health`
/// and `/metrics` responses. Boxes arrive either in original-image pixels or
/// normalized to [0, 1]; see [`Detection::coordinate_space`].
use std::path::Path;

use image::Rgba;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Space a detection's corner coordinates are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Pixels of the original (un-resized) media.
    Pixel,
    /// Fractions of the original media width/height.
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
    /// Explicit tag; when absent the space is inferred from the values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate_space: Option<CoordinateSpace>,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_name: &str) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_name: class_name.to_string(),
            color: None,
            class_id: None,
            depth: None,
            coordinate_space: None,
        }
    }

    /// Resolve the coordinate space: the explicit tag wins, otherwise a box
    /// whose four values are all <= 1.0 is treated as normalized.
    ///
    /// The fallback misreads a genuine 1x1 pixel box at the image origin.
    pub fn coordinate_space(&self) -> CoordinateSpace {
        if let Some(space) = self.coordinate_space {
            return space;
        }
        if self.x1 <= 1.0 && self.y1 <= 1.0 && self.x2 <= 1.0 && self.y2 <= 1.0 {
            CoordinateSpace::Normalized
        } else {
            CoordinateSpace::Pixel
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.x2 < self.x1 || self.y2 < self.y1
    }

    /// Copy with x1<=x2 and y1<=y2.
    pub fn normalized_corners(&self) -> Self {
        let mut det = self.clone();
        det.x1 = self.x1.min(self.x2);
        det.x2 = self.x1.max(self.x2);
        det.y1 = self.y1.min(self.y2);
        det.y2 = self.y1.max(self.y2);
        det
    }

    /// Label chip text, e.g. `"pothole 87%"`.
    pub fn label(&self) -> String {
        format!("{} {}%", self.class_name, (self.confidence * 100.0).round() as i64)
    }

    /// Backend-supplied color, or the confidence tier color when missing or unparsable.
    pub fn display_color(&self) -> Rgba<u8> {
        self.color
            .as_deref()
            .and_then(parse_hex_color)
            .unwrap_or_else(|| confidence_color(self.confidence))
    }
}

/// Same tiers the backend uses when it fills in `color`.
pub fn confidence_color(confidence: f32) -> Rgba<u8> {
    if confidence >= 0.8 {
        Rgba([0x00, 0xFF, 0x00, 0xFF])
    } else if confidence >= 0.5 {
        Rgba([0xFF, 0xFF, 0x00, 0xFF])
    } else {
        Rgba([0xFF, 0x00, 0x00, 0xFF])
    }
}

/// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` (leading `#` optional).
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                rgb[i] = v * 17;
            }
            Some(Rgba([rgb[0], rgb[1], rgb[2], 0xFF]))
        }
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 0xFF])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum SeverityLevel {
    Low,
    Moderate,
    Severe,
    Other(String),
}

impl SeverityLevel {
    /// Thresholds used by the backend on its 0..100 severity score.
    pub fn from_score(score: f32) -> Self {
        if score < 30.0 {
            SeverityLevel::Low
        } else if score < 60.0 {
            SeverityLevel::Moderate
        } else {
            SeverityLevel::Severe
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SeverityLevel::Low => "Low",
            SeverityLevel::Moderate => "Moderate",
            SeverityLevel::Severe => "Severe",
            SeverityLevel::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for SeverityLevel {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "low" => SeverityLevel::Low,
            "moderate" => SeverityLevel::Moderate,
            "severe" => SeverityLevel::Severe,
            _ => SeverityLevel::Other(value),
        }
    }
}

impl From<SeverityLevel> for String {
    fn from(level: SeverityLevel) -> Self {
        level.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct Gps {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl Gps {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// `POST /predict` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub severity_score: f32,
    #[serde(default)]
    pub severity_level: Option<SeverityLevel>,
    #[serde(default)]
    pub crack_count: Option<u32>,
    #[serde(default)]
    pub avg_confidence: Option<f32>,
    #[serde(default)]
    pub inference_time_ms: f32,
    #[serde(default)]
    pub scans_remaining: Option<i64>,
    #[serde(default)]
    pub image_dimensions: Option<ImageDimensions>,
    #[serde(default)]
    pub gps: Gps,
}

impl PredictResponse {
    pub fn severity(&self) -> SeverityLevel {
        self.severity_level
            .clone()
            .unwrap_or_else(|| SeverityLevel::from_score(self.severity_score))
    }

    /// One-line summary for status bars and CLI output.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} detections | severity {:.1} ({}) | {:.0} ms",
            self.detections.len(),
            self.severity_score,
            self.severity().as_str(),
            self.inference_time_ms
        );
        if let Some((lat, lon)) = self.gps.coordinates() {
            summary.push_str(&format!(" | GPS {:.5}, {:.5}", lat, lon));
        }
        summary
    }
}

/// `POST /analyze_video` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VideoUpload {
    pub video_id: String,
    pub path: String,
}

/// `GET /video_stats` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VideoStats {
    #[serde(default)]
    pub detections: u32,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Base64 JPEG of the latest annotated frame, when the processor has one.
    #[serde(default)]
    pub snapshot: Option<String>,
}

/// `GET /health` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Health {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub uptime_seconds: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `GET /metrics` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Metrics {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub average_inference_time: f64,
    #[serde(default)]
    pub uptime_seconds: f64,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub active_websockets: u32,
    /// Empty object until the first prediction finishes
    #[serde(default)]
    pub latest_inference: Option<LatestInference>,
}

impl Metrics {
    pub fn latest(&self) -> Option<&LatestInference> {
        self.latest_inference.as_ref().filter(|l| l.timestamp.is_some())
    }
}

/// Summary of the most recent prediction, as pushed over `/ws/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LatestInference {
    #[serde(default)]
    pub severity_score: f64,
    #[serde(default)]
    pub severity_level: String,
    #[serde(default)]
    pub crack_count: u32,
    #[serde(default)]
    pub inference_time_ms: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LatestInference {
    pub fn summary(&self) -> String {
        format!(
            "last scan: {} cracks, {} ({:.0}/100), {:.0} ms",
            self.crack_count, self.severity_level, self.severity_score, self.inference_time_ms
        )
    }
}

/// A detections file is either a full `/predict` response or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectionsFile {
    Response(PredictResponse),
    Bare(Vec<Detection>),
}

/// Parse detections JSON, keeping the full response when there is one.
pub fn parse_detections(content: &str) -> Result<PredictResponse, AppError> {
    match serde_json::from_str::<DetectionsFile>(content) {
        Ok(DetectionsFile::Response(response)) => Ok(response),
        Ok(DetectionsFile::Bare(detections)) => Ok(PredictResponse {
            detections,
            ..PredictResponse::default()
        }),
        Err(e) => Err(AppError::new(format!("Failed to parse detections: {}", e))),
    }
}

pub fn load_detections(path: &Path) -> Result<PredictResponse, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(format!("Failed to read {}: {}", path.display(), e)))?;
    let response = parse_detections(&content)?;
    debug!("Loaded {} detections from {}", response.detections.len(), path.display());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_heuristic() {
        let det = Detection::new(0.1, 0.1, 0.5, 0.5, 0.9, "crack");
        assert_eq!(det.coordinate_space(), CoordinateSpace::Normalized);

        let det = Detection::new(100.0, 100.0, 300.0, 300.0, 0.9, "crack");
        assert_eq!(det.coordinate_space(), CoordinateSpace::Pixel);

        // One value above 1.0 is enough to make the whole box pixel-space
        let det = Detection::new(0.1, 0.1, 0.5, 1.5, 0.9, "crack");
        assert_eq!(det.coordinate_space(), CoordinateSpace::Pixel);
    }

    #[test]
    fn test_explicit_space_overrides_heuristic() {
        let mut det = Detection::new(0.0, 0.0, 1.0, 1.0, 0.9, "crack");
        det.coordinate_space = Some(CoordinateSpace::Pixel);
        assert_eq!(det.coordinate_space(), CoordinateSpace::Pixel);
    }

    #[test]
    fn test_label_rounds_confidence() {
        let det = Detection::new(0.0, 0.0, 1.0, 1.0, 0.876, "pothole");
        assert_eq!(det.label(), "pothole 88%");
        let det = Detection::new(0.0, 0.0, 1.0, 1.0, 0.125, "crack");
        assert_eq!(det.label(), "crack 13%");
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#00FF00"), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(parse_hex_color("ff0"), Some(Rgba([255, 255, 0, 255])));
        assert_eq!(parse_hex_color("#11223344"), Some(Rgba([0x11, 0x22, 0x33, 0x44])));
        assert_eq!(parse_hex_color("#GG0000"), None);
        assert_eq!(parse_hex_color("#1234"), None);
        assert_eq!(parse_hex_color("red"), None);
    }

    #[test]
    fn test_display_color_falls_back_to_confidence_tier() {
        let mut det = Detection::new(0.0, 0.0, 1.0, 1.0, 0.85, "crack");
        assert_eq!(det.display_color(), Rgba([0, 255, 0, 255]));
        det.confidence = 0.6;
        assert_eq!(det.display_color(), Rgba([255, 255, 0, 255]));
        det.confidence = 0.2;
        assert_eq!(det.display_color(), Rgba([255, 0, 0, 255]));

        det.color = Some("#0000FF".to_string());
        assert_eq!(det.display_color(), Rgba([0, 0, 255, 255]));
        det.color = Some("not-a-color".to_string());
        assert_eq!(det.display_color(), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_normalized_corners_swaps_inverted() {
        let det = Detection::new(300.0, 50.0, 100.0, 150.0, 0.5, "crack");
        assert!(det.is_inverted());
        let fixed = det.normalized_corners();
        assert!(!fixed.is_inverted());
        assert_eq!((fixed.x1, fixed.x2), (100.0, 300.0));
        assert_eq!((fixed.y1, fixed.y2), (50.0, 150.0));
    }

    #[test]
    fn test_parse_predict_response() {
        let json = r##"{
            "success": true,
            "detections": [
                {"x1": 10.0, "y1": 20.0, "x2": 110.0, "y2": 220.0, "confidence": 0.91,
                 "class_id": 2, "class_name": "pothole", "color": "#00FF00", "depth": 0.91}
            ],
            "severity_score": 42.5,
            "severity_level": "Moderate",
            "crack_count": 1,
            "avg_confidence": 0.91,
            "inference_time_ms": 35.2,
            "scans_remaining": 999,
            "image_dimensions": {"width": 1280, "height": 720},
            "gps": {"lat": 12.97, "lon": null}
        }"##;
        let response = parse_detections(json).unwrap();
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].class_id, Some(2));
        assert_eq!(response.severity(), SeverityLevel::Moderate);
        assert_eq!(
            response.image_dimensions,
            Some(ImageDimensions { width: 1280, height: 720 })
        );
        assert_eq!(response.gps.coordinates(), None);
    }

    #[test]
    fn test_parse_bare_detection_array() {
        let json = r#"[{"x1": 0.1, "y1": 0.1, "x2": 0.5, "y2": 0.5, "confidence": 0.7, "class_name": "crack"}]"#;
        let response = parse_detections(json).unwrap();
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.severity(), SeverityLevel::Low);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_detections("{\"detections\": 5}").is_err());
        assert!(parse_detections("nope").is_err());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(SeverityLevel::from_score(10.0), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_score(30.0), SeverityLevel::Moderate);
        assert_eq!(SeverityLevel::from_score(60.0), SeverityLevel::Severe);
        let other: SeverityLevel = "Critical".to_string().into();
        assert_eq!(other, SeverityLevel::Other("Critical".to_string()));
        assert_eq!(other.as_str(), "Critical");
    }

    #[test]
    fn test_video_stats_with_nulls() {
        let stats: VideoStats =
            serde_json::from_str(r#"{"lat": null, "lon": null, "detections": 0, "snapshot": null}"#)
                .unwrap();
        assert_eq!(stats, VideoStats::default());
    }

    #[test]
    fn test_metrics_latest_inference() {
        let metrics: Metrics = serde_json::from_str(
            r#"{"total_requests": 0, "model_loaded": true, "active_websockets": 1, "latest_inference": {}}"#,
        )
        .unwrap();
        assert!(metrics.latest().is_none());

        let metrics: Metrics = serde_json::from_str(
            r#"{"latest_inference": {"severity_score": 55.0, "severity_level": "Severe",
                "crack_count": 3, "inference_time_ms": 41.2, "timestamp": "2026-01-02T03:04:05"}}"#,
        )
        .unwrap();
        let latest = metrics.latest().unwrap();
        assert_eq!(latest.crack_count, 3);
        assert_eq!(latest.summary(), "last scan: 3 cracks, Severe (55/100), 41 ms");
    }
}
