use crate::EdgeError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Quality used when the request does not carry one.
pub const DEFAULT_QUALITY: u8 = 75;

/// Largest width or height a transform may produce.
pub const MAX_DIMENSION: u32 = 8192;

/// One year, never revalidated. Callers vary the URL to invalidate.
pub const IMMUTABLE_MAX_AGE: u32 = 31_536_000;

/// The single normalized output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    WebP,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::WebP => write!(f, "webp"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Base address of the origin store, e.g. `http://127.0.0.1:9000`.
    pub origin_base: String,
    /// Bucket path holding preview images.
    pub preview_prefix: String,
    /// Bucket path holding public passthrough files.
    pub public_prefix: String,
    /// The only origin CORS will allow.
    pub allowed_origin: String,
    /// Sled directory. `None` keeps the response cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub max_cache_size: Option<u64>, // bytes
    pub max_input_size: usize,       // bytes
    pub fetch_timeout: Duration,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            origin_base: "http://127.0.0.1:9000".into(),
            preview_prefix: "ui-trade-preview".into(),
            public_prefix: "ui-trade-public".into(),
            allowed_origin: "http://localhost:3000".into(),
            cache_dir: None,
            max_cache_size: None,
            max_input_size: 16 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Origin base is not a valid URL: {0}")] InvalidOriginBase(String),
    #[error("Allowed CORS origin is not a valid header value: {0}")] InvalidAllowedOrigin(String),
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Fetch timeout must be > 0")] InvalidTimeout,
    #[error("Invalid value for {0}: {1}")] InvalidEnv(&'static str, String),
}

impl EdgeConfig {
    /// Reads `EDGE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("EDGE_ORIGIN_BASE") { cfg.origin_base = v; }
        if let Ok(v) = std::env::var("EDGE_PREVIEW_PREFIX") { cfg.preview_prefix = v; }
        if let Ok(v) = std::env::var("EDGE_PUBLIC_PREFIX") { cfg.public_prefix = v; }
        if let Ok(v) = std::env::var("EDGE_ALLOWED_ORIGIN") { cfg.allowed_origin = v; }
        if let Ok(v) = std::env::var("EDGE_CACHE_DIR") { cfg.cache_dir = Some(PathBuf::from(v)); }
        if let Some(v) = env_number::<u64>("EDGE_MAX_CACHE_BYTES")? { cfg.max_cache_size = Some(v); }
        if let Some(v) = env_number::<usize>("EDGE_MAX_INPUT_BYTES")? { cfg.max_input_size = v; }
        if let Some(v) = env_number::<u64>("EDGE_FETCH_TIMEOUT_SECS")? {
            cfg.fetch_timeout = Duration::from_secs(v);
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.origin_base)
            .map_err(|e| ConfigError::InvalidOriginBase(format!("{}: {}", self.origin_base, e)))?;
        if axum::http::HeaderValue::from_str(&self.allowed_origin).is_err() {
            return Err(ConfigError::InvalidAllowedOrigin(self.allowed_origin.clone()));
        }
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.fetch_timeout.is_zero() { return Err(ConfigError::InvalidTimeout); }
        Ok(())
    }

    /// Origin location of a preview image.
    pub fn preview_url(&self, key: &str) -> crate::Result<String> {
        self.bucket_url(&self.preview_prefix, key)
    }

    /// Origin location of a public passthrough file.
    pub fn public_url(&self, key: &str) -> crate::Result<String> {
        self.bucket_url(&self.public_prefix, key)
    }

    /// `{origin_base}/{prefix}/{key}` with `key` percent-encoded as exactly
    /// one path segment, so `/`, `?` and `#` inside it stay part of the name.
    fn bucket_url(&self, prefix: &str, key: &str) -> crate::Result<String> {
        if key.is_empty() || key == "." || key == ".." {
            return Err(EdgeError::BadRequest(format!("invalid resource key {:?}", key)));
        }

        let mut url = reqwest::Url::parse(&self.origin_base)
            .map_err(|e| EdgeError::Internal(format!("origin base {}: {}", self.origin_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| EdgeError::Internal(format!("origin base {} cannot carry a path", self.origin_base)))?
            .pop_if_empty()
            .extend(prefix.split('/').filter(|s| !s.is_empty()))
            .push(key);
        Ok(url.into())
    }
}

fn env_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv(name, raw)),
        Err(_) => Ok(None),
    }
}
