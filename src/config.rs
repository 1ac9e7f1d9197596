//! Viewer configuration.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use tracing::warn;

/// Dpi a zoom level of 100% maps to.
pub const BASE_ZOOM_DPI: u32 = 96;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Physical pixels per CSS pixel. Draw requests are made at
    /// `dpi * device_pixel_ratio` and the image is shown at `1 / ratio`.
    pub device_pixel_ratio: f32,
    /// Resolution page views are created at.
    pub default_dpi: u32,
    /// Upper bound on hits a search returns per page.
    pub max_search_hits: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            device_pixel_ratio: 1.0,
            default_dpi: BASE_ZOOM_DPI,
            max_search_hits: 500,
        }
    }
}

/// Parse `key`, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(key: &str, default: T, valid: impl Fn(&T) -> bool) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => value,
            _ => {
                warn!(key, value = %raw, "ignoring invalid config value");
                default
            }
        },
        Err(_) => default,
    }
}

impl ViewerConfig {
    pub fn from_env() -> Self {
        let defaults = ViewerConfig::default();
        ViewerConfig {
            device_pixel_ratio: env_or(
                "KIOSK_DEVICE_PIXEL_RATIO",
                defaults.device_pixel_ratio,
                |r: &f32| r.is_finite() && *r > 0.0,
            ),
            default_dpi: env_or("KIOSK_DEFAULT_DPI", defaults.default_dpi, |d: &u32| *d > 0),
            max_search_hits: env_or("KIOSK_MAX_SEARCH_HITS", defaults.max_search_hits, |_| true),
        }
    }
}

/// Dpi for a zoom percentage, truncated. Saturates at `u32::MAX`.
pub fn zoom_to_dpi(zoom_level: u32) -> u32 {
    let dpi = u64::from(zoom_level) * u64::from(BASE_ZOOM_DPI) / 100;
    u32::try_from(dpi).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ViewerConfig =
            serde_json::from_str(r#"{ "device_pixel_ratio": 2.0 }"#).unwrap();
        assert_eq!(config.device_pixel_ratio, 2.0);
        assert_eq!(config.default_dpi, 96);
        assert_eq!(config.max_search_hits, 500);
    }

    #[test]
    fn test_env_overrides_and_rejects_invalid() {
        env::set_var("KIOSK_DEFAULT_DPI", "150");
        env::set_var("KIOSK_DEVICE_PIXEL_RATIO", "-1");
        let config = ViewerConfig::from_env();
        env::remove_var("KIOSK_DEFAULT_DPI");
        env::remove_var("KIOSK_DEVICE_PIXEL_RATIO");

        assert_eq!(config.default_dpi, 150);
        assert_eq!(config.device_pixel_ratio, 1.0);
    }

    #[test]
    fn test_zoom_to_dpi_truncates() {
        assert_eq!(zoom_to_dpi(100), 96);
        assert_eq!(zoom_to_dpi(150), 144);
        assert_eq!(zoom_to_dpi(33), 31);
    }

    #[test]
    fn test_zoom_to_dpi_does_not_overflow() {
        assert_eq!(zoom_to_dpi(50_000_000), 48_000_000);
        assert_eq!(zoom_to_dpi(u32::MAX), 4_123_168_603);
    }
}
