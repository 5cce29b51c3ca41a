use std::env;
use tracing::warn;

pub const DEFAULT_HOLD_MINUTES: u32 = 15;
pub const DEFAULT_SLOT_GRANULARITY_MINUTES: u32 = 15;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub document_store_url: String,
    pub document_store_api_key: String,
    pub default_hold_minutes: u32,
    pub slot_granularity_minutes: u32,
    pub notifications_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            document_store_url: String::new(),
            document_store_api_key: String::new(),
            default_hold_minutes: DEFAULT_HOLD_MINUTES,
            slot_granularity_minutes: DEFAULT_SLOT_GRANULARITY_MINUTES,
            notifications_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and then read the environment.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let config = Self {
            document_store_url: env::var("DOCUMENT_STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("DOCUMENT_STORE_URL not set, using empty value");
                    String::new()
                }),
            document_store_api_key: env::var("DOCUMENT_STORE_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("DOCUMENT_STORE_API_KEY not set, using empty value");
                    String::new()
                }),
            default_hold_minutes: parse_or("DEFAULT_HOLD_MINUTES", DEFAULT_HOLD_MINUTES),
            slot_granularity_minutes: parse_or(
                "SLOT_GRANULARITY_MINUTES",
                DEFAULT_SLOT_GRANULARITY_MINUTES,
            ),
            notifications_enabled: parse_or("NOTIFICATIONS_ENABLED", true),
        };

        if !config.is_configured() {
            warn!("Document store not configured - only the in-memory store is usable");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.document_store_url.is_empty() && !self.document_store_api_key.is_empty()
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => {
            warn!("{} not set, using default {}", key, default);
            default
        }
    }
}
