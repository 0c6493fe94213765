//! Configuration management for the client.

use std::env;
use std::time::Duration;

use stockline_engine::{ProductStatus, DEFAULT_BEST_SELLERS, DEFAULT_DEBOUNCE_MS, DEFAULT_PAGE_SIZE};

use crate::transport::CatalogQuery;

/// Who is looking at the storefront. Decides which products are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Sees approved products only
    Buyer,
    /// Sees their own products in every status
    Seller { seller_id: String },
    /// Sees everything
    Admin,
}

impl Role {
    pub fn catalog_query(&self) -> CatalogQuery {
        match self {
            Role::Buyer => CatalogQuery {
                status: Some(ProductStatus::Approved),
                seller_id: None,
            },
            Role::Seller { seller_id } => CatalogQuery {
                status: None,
                seller_id: Some(seller_id.clone()),
            },
            Role::Admin => CatalogQuery::default(),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the marketplace HTTP API
    pub api_url: String,
    /// WebSocket URL of the invalidation feed; no push updates when absent
    pub ws_url: Option<String>,
    /// Quiet period before queued cart writes are sent
    pub debounce_ms: u64,
    /// Delay before the single retry of a transient failure
    pub retry_backoff_ms: u64,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
    pub page_size: usize,
    pub best_sellers: usize,
    pub role: Role,
}

impl Config {
    /// Configuration with default tuning for the given API.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ws_url: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            retry_backoff_ms: 300,
            request_timeout_ms: 10_000,
            page_size: DEFAULT_PAGE_SIZE,
            best_sellers: DEFAULT_BEST_SELLERS,
            role: Role::Buyer,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("STOCKLINE_API_URL").map_err(|_| ConfigError::MissingApiUrl)?;
        let mut config = Self::new(api_url);

        config.ws_url = env::var("STOCKLINE_WS_URL").ok().filter(|url| !url.is_empty());
        config.debounce_ms = number("STOCKLINE_DEBOUNCE_MS", config.debounce_ms)?;
        config.retry_backoff_ms = number("STOCKLINE_RETRY_BACKOFF_MS", config.retry_backoff_ms)?;
        config.request_timeout_ms =
            number("STOCKLINE_REQUEST_TIMEOUT_MS", config.request_timeout_ms)?;
        config.page_size = number("STOCKLINE_PAGE_SIZE", config.page_size)?;
        config.best_sellers = number("STOCKLINE_BEST_SELLERS", config.best_sellers)?;

        let role = env::var("STOCKLINE_ROLE").unwrap_or_else(|_| "buyer".to_string());
        config.role = match role.to_lowercase().as_str() {
            "buyer" => Role::Buyer,
            "admin" => Role::Admin,
            "seller" => Role::Seller {
                seller_id: env::var("STOCKLINE_SELLER_ID")
                    .map_err(|_| ConfigError::MissingSellerId)?,
            },
            _ => return Err(ConfigError::InvalidRole(role)),
        };

        Ok(config)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STOCKLINE_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("STOCKLINE_SELLER_ID is required when STOCKLINE_ROLE is seller")]
    MissingSellerId,

    #[error("Invalid STOCKLINE_ROLE value: {0}")]
    InvalidRole(String),

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),
}
