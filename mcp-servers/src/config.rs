//! Configuration module for environment variable parsing.
//!
//! Every server reads the same environment; each binary only uses the parts
//! it needs.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server
    // =========================================================================
    /// Port override for the HTTP server (each binary has its own default)
    pub port: Option<u16>,

    /// Host/interface to bind
    pub host: [u8; 4],

    // =========================================================================
    // GitHub
    // =========================================================================
    /// Personal access token used for the REST and GraphQL APIs
    pub github_token: Option<String>,

    /// REST API base URL
    pub github_api_url: String,

    /// Value of the `X-GitHub-Api-Version` header
    pub github_api_version: String,

    /// Shared secret for `X-Hub-Signature-256` verification
    pub github_webhook_secret: Option<String>,

    /// Public URL GitHub should deliver webhooks to
    pub webhook_public_url: Option<String>,

    /// Whether received deliveries are kept in the cache
    pub webhook_store_events: bool,

    // =========================================================================
    // Studio backend
    // =========================================================================
    /// Studio REST API base URL
    pub studio_api_url: String,

    /// Bearer key for the Studio API
    pub studio_api_key: Option<String>,

    /// Per-request timeout for Studio calls
    pub studio_api_timeout: Duration,

    // =========================================================================
    // PR automation defaults
    // =========================================================================
    pub automation: AutomationDefaults,
}

/// Defaults applied to repositories without an explicit automation config.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationDefaults {
    pub auto_assign: bool,
    pub auto_label: bool,
    pub required_reviews: u32,
    pub draft_on_wip: bool,
    pub close_stale_days: u32,
    pub protected_branches: Vec<String>,
}

impl Default for AutomationDefaults {
    fn default() -> Self {
        Self {
            auto_assign: true,
            auto_label: true,
            required_reviews: 2,
            draft_on_wip: true,
            close_stale_days: 30,
            protected_branches: vec![
                "main".to_string(),
                "master".to_string(),
                "production".to_string(),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            host: [0, 0, 0, 0],
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            github_api_version: "2022-11-28".to_string(),
            github_webhook_secret: None,
            webhook_public_url: None,
            webhook_store_events: true,
            studio_api_url: "http://localhost:3000".to_string(),
            studio_api_key: None,
            studio_api_timeout: Duration::from_secs(30),
            automation: AutomationDefaults::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let automation_defaults = AutomationDefaults::default();

        Config {
            port: env::var("SERVER_PORT").ok().and_then(|v| v.parse().ok()),

            host: parse_host("SERVER_HOST", [0, 0, 0, 0]),

            github_token: non_empty("GITHUB_TOKEN"),

            github_api_url: env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),

            github_api_version: env::var("GITHUB_API_VERSION")
                .unwrap_or_else(|_| "2022-11-28".to_string()),

            github_webhook_secret: non_empty("GITHUB_WEBHOOK_SECRET"),

            webhook_public_url: non_empty("GITHUB_WEBHOOK_URL"),

            webhook_store_events: parse_bool("WEBHOOK_STORE_EVENTS", true),

            studio_api_url: env::var("STUDIO_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            studio_api_key: non_empty("STUDIO_API_KEY"),

            studio_api_timeout: Duration::from_secs(
                env::var("STUDIO_API_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),

            automation: AutomationDefaults {
                auto_assign: parse_bool("PR_AUTO_ASSIGN", automation_defaults.auto_assign),
                auto_label: parse_bool("PR_AUTO_LABEL", automation_defaults.auto_label),
                required_reviews: env::var("PR_REQUIRED_REVIEWS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(automation_defaults.required_reviews),
                draft_on_wip: parse_bool("PR_DRAFT_ON_WIP", automation_defaults.draft_on_wip),
                close_stale_days: env::var("PR_CLOSE_STALE_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(automation_defaults.close_stale_days),
                protected_branches: parse_csv("PROTECTED_BRANCHES")
                    .unwrap_or(automation_defaults.protected_branches),
            },
        }
    }

    /// Port to listen on, falling back to the binary's default.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean flag ("true"/"false", "1"/"0", "yes"/"no").
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a dotted IPv4 address like "127.0.0.1".
fn parse_host(name: &str, default: [u8; 4]) -> [u8; 4] {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<std::net::Ipv4Addr>() {
        Ok(addr) => addr.octets(),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid host, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
