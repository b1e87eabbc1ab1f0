// Configuration module for routelens
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

pub const DEFAULT_LSP_COMMAND: &str = "npx";
pub const DEFAULT_LSP_ARGS: &str = "typescript-language-server --stdio";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum helper expansion depth (ROUTELENS_MAX_EXPAND_DEPTH)
    pub max_expand_depth: usize,

    /// Language server executable (ROUTELENS_LSP_COMMAND)
    pub lsp_command: String,

    /// Whitespace separated language server arguments (ROUTELENS_LSP_ARGS)
    pub lsp_args: Vec<String>,

    /// Whether the language server fallback may be spawned (ROUTELENS_LSP_ENABLED)
    pub lsp_enabled: bool,

    /// Per-request language server timeout in milliseconds (ROUTELENS_LSP_TIMEOUT_MS)
    pub lsp_timeout_ms: u64,

    /// Debounce window for file events in milliseconds (ROUTELENS_WATCH_DEBOUNCE_MS)
    pub watch_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_expand_depth: 5,
            lsp_command: DEFAULT_LSP_COMMAND.to_string(),
            lsp_args: split_args(DEFAULT_LSP_ARGS),
            lsp_enabled: true,
            lsp_timeout_ms: 10_000,
            watch_debounce_ms: 50,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        read_parsed("ROUTELENS_MAX_EXPAND_DEPTH", &mut config.max_expand_depth);
        read_parsed("ROUTELENS_LSP_TIMEOUT_MS", &mut config.lsp_timeout_ms);
        read_parsed("ROUTELENS_WATCH_DEBOUNCE_MS", &mut config.watch_debounce_ms);

        if let Ok(val) = env::var("ROUTELENS_LSP_COMMAND") {
            let trimmed = val.trim();
            if trimmed.is_empty() {
                eprintln!(
                    "routelens: Warning: Empty ROUTELENS_LSP_COMMAND, using default: {}",
                    config.lsp_command
                );
            } else {
                config.lsp_command = trimmed.to_string();
            }
        }

        if let Ok(val) = env::var("ROUTELENS_LSP_ARGS") {
            config.lsp_args = split_args(&val);
        }

        if let Ok(val) = env::var("ROUTELENS_LSP_ENABLED") {
            match parse_flag(&val) {
                Some(flag) => config.lsp_enabled = flag,
                None => eprintln!(
                    "routelens: Warning: Invalid ROUTELENS_LSP_ENABLED value: {}, using default: {}",
                    val, config.lsp_enabled
                ),
            }
        }

        config
    }
}

fn read_parsed<T>(key: &str, slot: &mut T)
where
    T: FromStr + std::fmt::Display,
{
    let Ok(val) = env::var(key) else {
        return;
    };
    match val.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => eprintln!(
            "routelens: Warning: Invalid {} value: {}, using default: {}",
            key, val, slot
        ),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

/// Get the global configuration instance
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
