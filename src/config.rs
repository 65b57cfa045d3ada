use std::path::Path;

use once_cell::sync::{Lazy, OnceCell};

#[allow(unused_imports)]
use log::{debug, warn};

use crate::settings::UserSettings;

// Fallback values, also used for "reset to defaults"
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;
pub const DEFAULT_WINDOW_WIDTH: u32 = 1200;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;
pub const DEFAULT_STROKE_WIDTH: f32 = 3.0;
pub const DEFAULT_GLOW_RADIUS: f32 = 10.0;
pub const DEFAULT_RENDER_FPS: u32 = 60;
pub const DEFAULT_TELEMETRY_RETRY_SECS: u64 = 5;

pub struct Config {
    pub server_url: String,        // Inference backend base URL
    pub request_timeout_secs: u64, // Per-request timeout for backend calls
    pub window_width: u32,         // Initial viewer window width
    pub window_height: u32,        // Initial viewer window height
}

static SETTINGS: OnceCell<UserSettings> = OnceCell::new();

/// Load settings from `custom_path` instead of the default location. Must run
/// before the first call to [`settings`] or access to [`CONFIG`].
pub fn init_settings(custom_path: Option<&Path>) {
    if SETTINGS.set(UserSettings::load(custom_path)).is_err() {
        warn!("Settings were already loaded; ignoring {:?}", custom_path);
    }
}

/// Process-wide settings, loaded from the default path on first use.
pub fn settings() -> &'static UserSettings {
    SETTINGS.get_or_init(|| UserSettings::load(None))
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let settings = settings();
    debug!("Config snapshot taken (server {})", settings.server_url);

    Config {
        server_url: settings.server_url.clone(),
        request_timeout_secs: settings.request_timeout_secs,
        window_width: settings.window_width,
        window_height: settings.window_height,
    }
});
