/// Application configuration module
use anyhow::bail;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Public demo key accepted by api.nasa.gov; heavily rate-limited.
pub const DEMO_API_KEY: &str = "DEMO_KEY";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub public_base_url: String,
    pub nasa_api_key: String,
    pub api_key_provided: bool,
    pub store: StoreConfig,
    pub cache_ttls: CacheTtls,
    pub timeouts: FetchTimeouts,
    pub endpoints: Endpoints,
    pub cache_purge_seconds: u64,
    pub card_font_dir: Option<PathBuf>,
}

/// Favorites store connection settings
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub uri: Option<String>,
    pub table: String,
    pub connect_timeout: Duration,
    pub retry_after: Duration,
    pub max_connections: u32,
}

/// Per-operation cache lifetimes
#[derive(Clone, Debug)]
pub struct CacheTtls {
    pub apod: Duration,
    pub images: Duration,
    pub events: Duration,
    pub categories: Duration,
    pub neo: Duration,
}

/// Per-operation remote call timeouts
#[derive(Clone, Debug)]
pub struct FetchTimeouts {
    pub single: Duration,
    pub range: Duration,
}

/// Upstream base URL overrides (mirrors, local stand-ins); `None` keeps the public endpoint
#[derive(Clone, Debug, Default)]
pub struct Endpoints {
    pub nasa: Option<String>,
    pub images: Option<String>,
    pub eonet: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let (nasa_api_key, api_key_provided) = match env::var("NASA_API_KEY") {
            Ok(key) if !key.trim().is_empty() => (key.trim().to_string(), true),
            _ => {
                warn!("NASA_API_KEY not set, falling back to {}", DEMO_API_KEY);
                (DEMO_API_KEY.to_string(), false)
            }
        };

        let table = env::var("FAVORITES_TABLE").unwrap_or_else(|_| "favorites".to_string());
        if !is_valid_identifier(&table) {
            bail!("FAVORITES_TABLE must be a plain SQL identifier, got {:?}", table);
        }

        let store = StoreConfig {
            uri: env_opt("FAVORITES_DATABASE_URL"),
            table,
            connect_timeout: env_secs("STORE_CONNECT_TIMEOUT_SECONDS", 8),
            retry_after: env_secs("STORE_RETRY_SECONDS", 30),
            max_connections: env_u64("STORE_MAX_CONNECTIONS", 5).max(1) as u32,
        };

        let cache_ttls = CacheTtls {
            apod: env_secs("APOD_TTL_SECONDS", 3600),
            images: env_secs("IMAGES_TTL_SECONDS", 900),
            events: env_secs("EVENTS_TTL_SECONDS", 600),
            categories: env_secs("CATEGORIES_TTL_SECONDS", 1200),
            neo: env_secs("NEO_TTL_SECONDS", 1200),
        };

        let timeouts = FetchTimeouts {
            single: env_secs("FETCH_TIMEOUT_SECONDS", 20),
            range: env_secs("RANGE_FETCH_TIMEOUT_SECONDS", 30),
        };

        let endpoints = Endpoints {
            nasa: env_opt("NASA_API_BASE_URL"),
            images: env_opt("IMAGES_API_BASE_URL"),
            eonet: env_opt("EONET_API_BASE_URL"),
        };

        Ok(Self {
            bind_addr,
            public_base_url,
            nasa_api_key,
            api_key_provided,
            store,
            cache_ttls,
            timeouts,
            endpoints,
            cache_purge_seconds: env_u64("CACHE_PURGE_SECONDS", 300).max(1),
            card_font_dir: env::var("CARD_FONT_DIR").ok().map(PathBuf::from),
        })
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            apod: Duration::from_secs(60 * 60),
            images: Duration::from_secs(15 * 60),
            events: Duration::from_secs(10 * 60),
            categories: Duration::from_secs(20 * 60),
            neo: Duration::from_secs(20 * 60),
        }
    }
}

/// Table names are interpolated into SQL, so only bare identifiers pass.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default))
}
