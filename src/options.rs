//! Browser-context options applied per attached target

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Viewport and screen dimensions emulated on the main frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: i64,
    pub height: i64,
}

/// Screen dimensions backing the emulated viewport
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Screen {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorScheme {
    Light,
    Dark,
    #[default]
    NoPreference,
}

impl ColorScheme {
    pub fn as_feature_value(&self) -> &'static str {
        match self {
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
            ColorScheme::NoPreference => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducedMotion {
    Reduce,
    #[default]
    NoPreference,
}

impl ReducedMotion {
    pub fn as_feature_value(&self) -> &'static str {
        match self {
            ReducedMotion::Reduce => "reduce",
            ReducedMotion::NoPreference => "",
        }
    }
}

/// Options shared by every page of a browser context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserContextOptions {
    pub viewport: Option<Viewport>,
    pub screen: Option<Screen>,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
    pub javascript_enabled: bool,
    pub bypass_csp: bool,
    pub ignore_https_errors: bool,
    pub user_agent: String,
    pub locale: String,
    pub timezone_id: String,
    pub geolocation: Option<Geolocation>,
    pub extra_http_headers: HashMap<String, String>,
    pub http_credentials: Option<Credentials>,
    pub offline: bool,
    pub media_type: String,
    pub color_scheme: ColorScheme,
    pub reduced_motion: ReducedMotion,
    /// Tags attached to every emitted sample
    pub metric_tags: HashMap<String, String>,
    /// Whether samples also carry the frame URL as a tag
    pub url_metric_tag: bool,
}

impl Default for BrowserContextOptions {
    fn default() -> Self {
        Self {
            viewport: Some(Viewport {
                width: 1280,
                height: 720,
            }),
            screen: None,
            device_scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
            javascript_enabled: true,
            bypass_csp: false,
            ignore_https_errors: false,
            user_agent: String::new(),
            locale: String::new(),
            timezone_id: String::new(),
            geolocation: None,
            extra_http_headers: HashMap::new(),
            http_credentials: None,
            offline: false,
            media_type: String::new(),
            color_scheme: ColorScheme::default(),
            reduced_motion: ReducedMotion::default(),
            metric_tags: HashMap::new(),
            url_metric_tag: true,
        }
    }
}

/// Default deadlines for user-facing actions and navigations
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSettings {
    timeout: Duration,
    navigation_timeout: Duration,
}

impl TimeoutSettings {
    pub fn new(timeout: Duration, navigation_timeout: Duration) -> Self {
        Self {
            timeout,
            navigation_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}
