//! Environment-driven configuration
//!
//! Every setting has a default so the server starts with an empty environment.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_STORAGE_KEY_PREFIX: &str = "chatMessages";
/// Roughly what a browser grants a single origin for local storage
const DEFAULT_STORAGE_QUOTA_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

const DEFAULT_ENDPOINT: &str = "https://api.cohere.ai/v1/generate";
const DEFAULT_MODEL: &str = "command";
const DEFAULT_MAX_TOKENS: u32 = 150;
const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Stop generation before the model starts writing the next user turn
pub const TURN_STOP_SEQUENCE: &str = "You:";

const DEFAULT_GREETING: &str =
    "👋 Hi! I'm Rooney's AI assistant. Ask me about software development, projects, or contact info.";
const DEFAULT_CONTACT_EMAIL: &str = "walwendarooney@gmail.com";
const DEFAULT_CONTACT_PHONE: &str = "+254743485063";
const DEFAULT_PORTFOLIO_URL: &str = "https://www.winstec.me";

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Largest value the key-value substrate accepts
    pub storage_quota_bytes: usize,
    /// Sessions without activity or a stream client for this long are closed
    pub session_idle_timeout: Duration,
    pub llm: LlmConfig,
    pub widget: WidgetConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("CHAT_DB_PATH").map_or_else(
            |_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(format!("{home}/.portfolio-chat/chat.db"))
            },
            PathBuf::from,
        );

        Self {
            db_path,
            port: env_parse("CHAT_PORT").unwrap_or(DEFAULT_PORT),
            storage_quota_bytes: env_parse("CHAT_STORAGE_QUOTA_BYTES")
                .unwrap_or(DEFAULT_STORAGE_QUOTA_BYTES),
            session_idle_timeout: Duration::from_secs(
                env_parse("CHAT_SESSION_IDLE_SECS").unwrap_or(DEFAULT_SESSION_IDLE_SECS),
            ),
            llm: LlmConfig::from_env(),
            widget: WidgetConfig::from_env(),
        }
    }
}

/// Settings for the text-generation service
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("COHERE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            endpoint: std::env::var("COHERE_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: env_parse("CHAT_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: env_parse("CHAT_TEMPERATURE").unwrap_or(DEFAULT_TEMPERATURE),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Per-widget settings shared by every session
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Prefix of the private key given to a session that does not name its own
    pub storage_key_prefix: String,
    /// Text of the single seed message
    pub greeting: String,
    pub contact: ContactInfo,
    pub portfolio_url: String,
}

impl WidgetConfig {
    pub fn from_env() -> Self {
        Self {
            storage_key_prefix: std::env::var("CHAT_STORAGE_KEY")
                .unwrap_or_else(|_| DEFAULT_STORAGE_KEY_PREFIX.to_string()),
            greeting: std::env::var("CHAT_GREETING")
                .unwrap_or_else(|_| DEFAULT_GREETING.to_string()),
            contact: ContactInfo {
                email: std::env::var("CHAT_CONTACT_EMAIL")
                    .unwrap_or_else(|_| DEFAULT_CONTACT_EMAIL.to_string()),
                phone: std::env::var("CHAT_CONTACT_PHONE")
                    .unwrap_or_else(|_| DEFAULT_CONTACT_PHONE.to_string()),
            },
            portfolio_url: std::env::var("CHAT_PORTFOLIO_URL")
                .unwrap_or_else(|_| DEFAULT_PORTFOLIO_URL.to_string()),
        }
    }
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            contact: ContactInfo {
                email: DEFAULT_CONTACT_EMAIL.to_string(),
                phone: DEFAULT_CONTACT_PHONE.to_string(),
            },
            portfolio_url: DEFAULT_PORTFOLIO_URL.to_string(),
        }
    }
}

/// Contact details highlighted in assistant replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub email: String,
    pub phone: String,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
