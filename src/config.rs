use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use url::Url;

use crate::{http::UrlFilter, rate_limit};

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub user_agent: String,

    /// Name of the playback device this session claims.
    pub device_name: String,
    /// Volume applied when the engine connects, in `[0, 1]`.
    pub volume: f32,

    pub api_url: Url,
    /// Prefix every album art URL must carry to be used as background.
    pub image_host: String,
    pub url_filter: UrlFilter,

    pub secrets_file: PathBuf,
    pub logout_url: Option<Url>,
    pub entry_page: Option<Url>,
    /// Whether track, album and artist link to their web player pages.
    pub use_links: bool,

    pub poll_interval: Duration,
    /// Polling interval after the rate limiter rejected a request.
    pub backoff_interval: Duration,
    pub progress_interval: Duration,
    /// Delay before refreshing track info after skipping.
    pub skip_refresh_delay: Duration,
    /// Quiet time after the last play/pause toggle before it is applied.
    pub toggle_debounce: Duration,
    /// Consecutive failed polls after which polling stops.
    pub max_poll_failures: u32,

    pub rate_limit_window: Duration,
    pub rate_limit_ceiling: NonZeroU32,
}

impl Config {
    pub const DEFAULT_DEVICE_NAME: &'static str = "WebPlayerV1.0";
    pub const DEFAULT_API_URL: &'static str = "https://api.spotify.com/v1";
    pub const DEFAULT_IMAGE_HOST: &'static str = "https://i.scdn.co/";
    pub const DEFAULT_SECRETS_FILE: &'static str = "secrets.toml";

    /// # Panics
    ///
    /// Panics when the package name or version cannot form a valid
    /// `User-Agent`, which is a build-time defect.
    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            panic!("application name and/or version invalid (\"{app_name}\"; \"{app_version}\")");
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        let api_url = Url::parse(Self::DEFAULT_API_URL).expect("invalid default api url");

        Self {
            app_name,
            app_version,
            user_agent,

            device_name: Self::DEFAULT_DEVICE_NAME.to_owned(),
            volume: 0.3,

            api_url,
            image_host: Self::DEFAULT_IMAGE_HOST.to_owned(),
            url_filter: UrlFilter::default(),

            secrets_file: PathBuf::from(Self::DEFAULT_SECRETS_FILE),
            logout_url: None,
            entry_page: None,
            use_links: false,

            poll_interval: Duration::from_secs(12),
            backoff_interval: Duration::from_secs(18),
            progress_interval: Duration::from_millis(900),
            skip_refresh_delay: Duration::from_millis(1900),
            toggle_debounce: Duration::from_millis(80),
            max_poll_failures: 1,

            rate_limit_window: rate_limit::WINDOW,
            rate_limit_ceiling: NonZeroU32::new(rate_limit::CEILING)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
