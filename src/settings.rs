use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::animation::{Timeline, DEFAULT_BOX_DURATION, DEFAULT_PROGRESS_PER_SECOND, DEFAULT_STAGGER_STEP};
use crate::config::{
    DEFAULT_GLOW_RADIUS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVER_URL,
    DEFAULT_STROKE_WIDTH, DEFAULT_WINDOW_HEIGHT, DEFAULT_WINDOW_WIDTH,
};
use crate::error::AppError;
use crate::overlay::{InvertedBoxPolicy, OverlayStyle};
use crate::transform::DEFAULT_DPR_CAP;

/// User-specific settings that persist across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Inference backend base URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How often the viewer polls /video_stats while polling is on
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Upper bound on the device pixel ratio used for the overlay buffer
    #[serde(default = "default_dpr_cap")]
    pub dpr_cap: f32,

    /// Animate the box reveal (false = draw boxes complete immediately)
    #[serde(default = "default_animate")]
    pub animate: bool,

    #[serde(default = "default_progress_per_second")]
    pub progress_per_second: f32,

    #[serde(default = "default_stagger_step")]
    pub stagger_step: f32,

    #[serde(default = "default_box_duration")]
    pub box_duration: f32,

    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,

    /// Glow blur radius around completed boxes (0 disables the glow)
    #[serde(default = "default_glow_radius")]
    pub glow_radius: f32,

    /// TrueType font for label text; empty draws label chips without text
    #[serde(default)]
    pub label_font: String,

    /// Inverted boxes: "draw", "normalize" or "skip"
    #[serde(default)]
    pub inverted_boxes: InvertedBoxPolicy,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_window_width() -> u32 {
    DEFAULT_WINDOW_WIDTH
}

fn default_window_height() -> u32 {
    DEFAULT_WINDOW_HEIGHT
}

fn default_dpr_cap() -> f32 {
    DEFAULT_DPR_CAP
}

fn default_animate() -> bool {
    true
}

fn default_progress_per_second() -> f32 {
    DEFAULT_PROGRESS_PER_SECOND
}

fn default_stagger_step() -> f32 {
    DEFAULT_STAGGER_STEP
}

fn default_box_duration() -> f32 {
    DEFAULT_BOX_DURATION
}

fn default_stroke_width() -> f32 {
    DEFAULT_STROKE_WIDTH
}

fn default_glow_radius() -> f32 {
    DEFAULT_GLOW_RADIUS
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
            dpr_cap: DEFAULT_DPR_CAP,
            animate: true,
            progress_per_second: DEFAULT_PROGRESS_PER_SECOND,
            stagger_step: DEFAULT_STAGGER_STEP,
            box_duration: DEFAULT_BOX_DURATION,
            stroke_width: DEFAULT_STROKE_WIDTH,
            glow_radius: DEFAULT_GLOW_RADIUS,
            label_font: String::new(),
            inverted_boxes: InvertedBoxPolicy::Draw,
        }
    }
}

impl UserSettings {
    /// Path to the settings file
    /// On macOS: ~/Library/Application Support/RoadLens/settings.yaml
    /// On Linux: ~/.config/RoadLens/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\RoadLens\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("RoadLens").join("settings.yaml")
    }

    /// Load settings from YAML. `custom_path` overrides the default location.
    /// Missing, unreadable or invalid files fall back to defaults.
    pub fn load(custom_path: Option<&Path>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {}", p.display());
                p.to_path_buf()
            }
            None => Self::settings_path(),
        };

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match serde_yaml::from_str::<UserSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    debug!(
                        "Settings: server_url={}, animate={}, dpr_cap={}, inverted_boxes={:?}",
                        settings.server_url, settings.animate, settings.dpr_cap, settings.inverted_boxes
                    );
                    settings
                }
                Err(e) => {
                    error!("Failed to parse settings file at {:?}: {}", path, e);
                    warn!("Using default settings");
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Save to the default settings path, preserving comments of an existing file
    pub fn save(&self) -> Result<(), AppError> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| AppError::new(format!("Failed to create settings directory: {}", e)))?;
            }
        }

        // Existing file: update values in place so user comments survive
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    let updated = self.update_yaml_values(&contents);
                    fs::write(path, updated)
                        .map_err(|e| AppError::new(format!("Failed to write settings file: {}", e)))?;
                    info!("Saved settings to {:?} (comments preserved)", path);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read existing settings file for comment preservation: {}", e);
                }
            }
        }

        fs::write(path, self.to_yaml_with_comments())
            .map_err(|e| AppError::new(format!("Failed to write settings file: {}", e)))?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn timeline(&self) -> Timeline {
        Timeline::sanitized(self.progress_per_second, self.stagger_step, self.box_duration)
    }

    pub fn overlay_style(&self) -> OverlayStyle {
        let defaults = OverlayStyle::default();
        OverlayStyle {
            stroke_width: if self.stroke_width.is_finite() && self.stroke_width > 0.0 {
                self.stroke_width
            } else {
                defaults.stroke_width
            },
            glow_radius: if self.glow_radius.is_finite() {
                self.glow_radius.max(0.0)
            } else {
                defaults.glow_radius
            },
            animate: self.animate,
            inverted_boxes: self.inverted_boxes,
            ..defaults
        }
    }

    pub fn label_font_path(&self) -> Option<PathBuf> {
        let trimmed = self.label_font.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    fn update_yaml_values(&self, yaml_content: &str) -> String {
        let values = [
            ("server_url", yaml_scalar(&self.server_url)),
            ("request_timeout_secs", self.request_timeout_secs.to_string()),
            ("poll_interval_ms", self.poll_interval_ms.to_string()),
            ("window_width", self.window_width.to_string()),
            ("window_height", self.window_height.to_string()),
            ("dpr_cap", self.dpr_cap.to_string()),
            ("animate", self.animate.to_string()),
            ("progress_per_second", self.progress_per_second.to_string()),
            ("stagger_step", self.stagger_step.to_string()),
            ("box_duration", self.box_duration.to_string()),
            ("stroke_width", self.stroke_width.to_string()),
            ("glow_radius", self.glow_radius.to_string()),
            ("label_font", yaml_scalar(&self.label_font)),
            ("inverted_boxes", yaml_scalar(&self.inverted_boxes)),
        ];

        values
            .iter()
            .fold(yaml_content.to_string(), |yaml, (key, value)| {
                Self::replace_yaml_value(&yaml, key, value)
            })
    }

    /// Replace a key's value, keeping indentation and the rest of the file.
    /// A key the file doesn't mention yet is appended at the end.
    fn replace_yaml_value(yaml: &str, key: &str, new_value: &str) -> String {
        // Horizontal whitespace only: `\s` would run across line breaks
        let pattern = format!(r"(?mR)^([ \t]*{}[ \t]*:)[^\r\n]*$", regex::escape(key));
        let replacement = format!("${{1}} {}", new_value.replace('$', "$$"));

        match regex::Regex::new(&pattern) {
            Ok(re) if re.is_match(yaml) => re.replace_all(yaml, replacement.as_str()).to_string(),
            Ok(_) => {
                let mut yaml = yaml.to_string();
                if !yaml.is_empty() && !yaml.ends_with('\n') {
                    yaml.push('\n');
                }
                yaml.push_str(&format!("{}: {}\n", key, new_value));
                yaml
            }
            Err(e) => {
                warn!("Failed to create regex for key '{}': {}", key, e);
                yaml.to_string()
            }
        }
    }

    fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# RoadLens User Settings
# This file is loaded automatically when the application starts.
# Settings specified here override the default values.

# Inference backend base URL
server_url: {}

# Timeout for each backend request, in seconds
request_timeout_secs: {}

# Polling period for live video statistics, in milliseconds
poll_interval_ms: {}

# Initial viewer window size
window_width: {}
window_height: {}

# Highest device pixel ratio used for the overlay buffer
dpr_cap: {}

# Animate the box reveal (false = draw all boxes at once)
animate: {}

# Reveal timing: global progress per second, start delay between boxes,
# and the share of the timeline each box takes to draw
progress_per_second: {}
stagger_step: {}
box_duration: {}

# Box outline width and glow blur radius (0 disables the glow)
stroke_width: {}
glow_radius: {}

# TrueType font used for label text (empty = chips without text)
label_font: {}

# Boxes whose corners are swapped:
# - "draw": draw exactly as received
# - "normalize": swap corners into a well-formed box
# - "skip": leave them out
inverted_boxes: {}
"#,
            yaml_scalar(&self.server_url),
            self.request_timeout_secs,
            self.poll_interval_ms,
            self.window_width,
            self.window_height,
            self.dpr_cap,
            self.animate,
            self.progress_per_second,
            self.stagger_step,
            self.box_duration,
            self.stroke_width,
            self.glow_radius,
            yaml_scalar(&self.label_font),
            yaml_scalar(&self.inverted_boxes),
        )
    }
}

/// Single-line YAML scalar for a string-like value. A JSON string is a valid
/// YAML double-quoted scalar once DEL is escaped too.
fn yaml_scalar<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(quoted) => quoted.replace('\u{7f}', "\\u007f"),
        Err(e) => {
            warn!("Failed to serialize settings value: {}", e);
            "\"\"".to_string()
        }
    }
}
