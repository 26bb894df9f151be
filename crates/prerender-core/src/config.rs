//! Configuration for the prerender gateway
//!
//! Two layers: `RenderOptions` tunes a single render (timeouts, quiescence,
//! blocked hosts), `GatewayConfig` holds process-wide settings read from the
//! environment at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Hosts and globs that must never be fetched during a render.
///
/// Analytics beacons, ad networks, web fonts and raster images contribute
/// nothing to the serialized DOM and keep the network from going quiet.
pub const DEFAULT_BLOCKED_URLS: &[&str] = &[
    "google-analytics.com",
    "api.mixpanel.com",
    "fonts.googleapis.com",
    "stats.g.doubleclick.net",
    "mc.yandex.ru",
    "use.typekit.net",
    "beacon.tapfiliate.com",
    "js-agent.newrelic.com",
    "api.segment.io",
    "woopra.com",
    "static.olark.com",
    "static.getclicky.com",
    "fast.fonts.com",
    "youtube.com/embed",
    "cdn.heapanalytics.com",
    "googleads.g.doubleclick.net",
    "pagead2.googlesyndication.com",
    "fullstory.com/rec",
    "navilytics.com/nls_ajax.php",
    "log.optimizely.com/event",
    "hn.inspectlet.com",
    "tpc.googlesyndication.com",
    "partner.googleadservices.com",
    "static.hotjar.com",
    "www.google.com/recaptcha",
    "securepubads.g.doubleclick.net",
    "www.gstatic.com/recaptcha",
    "d31qbv1cthcecs.cloudfront.net",
    "sb.scorecardresearch.com",
    "www.googletagservices.com",
    "px.mooba.com.br",
    "data:image*",
    "*.ttf",
    "*.eot",
    "*.woff",
    "*.woff2",
    "*.jpg",
    "*.png",
    "*.gif",
];

/// Default suffix appended to the client user agent so upstreams can
/// recognize gateway traffic.
pub const DEFAULT_UA_SUFFIX: &str = "Prerender (+https://github.com/prerender-rs/prerender)";

/// Per-render tuning, initialized once at startup
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Hard cap on a render, measured from navigation start
    pub page_load_timeout: Duration,
    /// Minimum idle duration after the last response before the network
    /// counts as quiet
    pub quiescence_grace: Duration,
    /// Cadence of the quiescence check
    pub poll_interval: Duration,
    /// URL patterns the browser must not fetch
    pub blocked_url_patterns: Vec<String>,
    /// Appended to the client user agent
    pub user_agent_suffix: String,
    /// Remove `<script>` blocks from rendered HTML
    pub strip_scripts: bool,
    /// Honor `prerender-status-code` / `prerender-header` meta tags
    pub honor_meta_directives: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            page_load_timeout: Duration::from_secs(20),
            quiescence_grace: Duration::from_millis(400),
            poll_interval: Duration::from_millis(200),
            blocked_url_patterns: DEFAULT_BLOCKED_URLS.iter().map(|s| s.to_string()).collect(),
            user_agent_suffix: DEFAULT_UA_SUFFIX.to_string(),
            strip_scripts: true,
            honor_meta_directives: true,
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// No cache; every request renders
    None,
    /// In-process TTL map
    Memory,
    /// Redis key-value store
    Redis { url: String },
    /// Object store; recognized but provided by deployment plumbing
    S3,
}

/// Process-wide gateway configuration, read from the environment
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen port
    pub port: u16,
    /// Path to the headless browser binary; autodetected when absent
    pub chrome_path: Option<PathBuf>,
    /// Cache backend
    pub cache: CacheBackend,
    /// TTL applied on cache save
    pub cache_ttl: Duration,
    /// Render tuning
    pub render: RenderOptions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            chrome_path: None,
            cache: CacheBackend::None,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            render: RenderOptions::default(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from process environment variables.
    ///
    /// Recognized: `PORT`, `CHROME_PATH`, `RENDER_TIMEOUT` /
    /// `PAGE_LOAD_TIMEOUT`, `CACHE`, `REDIS_URL`, `PLUGIN_STATUS_CODE`,
    /// `PLUGIN_SCRIPT_TAGS`.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = var("PORT").and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(path) = var("CHROME_PATH").filter(|v| !v.is_empty()) {
            config.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = var("RENDER_TIMEOUT")
            .or_else(|| var("PAGE_LOAD_TIMEOUT"))
            .and_then(|v| parse_duration(&v))
        {
            config.render.page_load_timeout = timeout;
        }

        config.cache = match var("CACHE").unwrap_or_default().as_str() {
            "redis" => CacheBackend::Redis {
                url: var("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379/0".to_string()),
            },
            "s3" => CacheBackend::S3,
            "memory" => CacheBackend::Memory,
            _ => CacheBackend::None,
        };

        if var("PLUGIN_STATUS_CODE").as_deref() == Some("false") {
            config.render.honor_meta_directives = false;
        }
        if var("PLUGIN_SCRIPT_TAGS").as_deref() == Some("false") {
            config.render.strip_scripts = false;
        }

        config
    }
}

/// Parse a duration of the form `20s`, `750ms` or bare seconds (`20`).
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|v| Duration::try_from_secs_f64(v).ok());
    }
    value.parse().ok().map(Duration::from_secs)
}
