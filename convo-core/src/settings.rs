//! Runtime settings loaded from environment variables.
//!
//! Callers that use a `.env` file must load it first (e.g. `dotenvy::dotenv()`
//! in the CLI) so the variables are visible here.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Recognized configuration, with defaults for every option.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Storage backend selection: `json` or `sqlite`.
    pub storage_backend: String,
    /// Directory holding one JSON document per user (json backend).
    pub json_storage_dir: PathBuf,
    /// SQLite database file path (sqlite backend).
    pub database_url: String,
    /// Retention cap: archived conversations beyond this count are removed
    /// by cleanup, oldest first.
    pub max_conversations_per_user: usize,
    /// Default number of recent messages in a context window.
    pub context_window_size: usize,
    /// Message count at which the manager requests a summary.
    pub auto_summarize_threshold: u64,
    /// Archived conversations untouched for this many days are removed by
    /// cleanup.
    pub cleanup_old_data_days: i64,
    /// Upper bound on any single storage call made by the manager.
    pub request_timeout: Duration,
    /// Log file path for `init_tracing`.
    pub log_file: String,
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn load() -> Self {
        Self {
            storage_backend: env::var("STORAGE_BACKEND").unwrap_or_else(|_| "json".to_string()),
            json_storage_dir: env::var("JSON_STORAGE_DIR")
                .unwrap_or_else(|_| "data/conversations".to_string())
                .into(),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/conversations.db".to_string()),
            max_conversations_per_user: parse_env("MAX_CONVERSATIONS_PER_USER", 100),
            context_window_size: parse_env("CONTEXT_WINDOW_SIZE", 10),
            auto_summarize_threshold: parse_env("AUTO_SUMMARIZE_THRESHOLD", 50),
            cleanup_old_data_days: parse_env("CLEANUP_OLD_DATA_DAYS", 30),
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30)),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "logs/convo.log".to_string()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_backend: "json".to_string(),
            json_storage_dir: "data/conversations".into(),
            database_url: "data/conversations.db".to_string(),
            max_conversations_per_user: 100,
            context_window_size: 10,
            auto_summarize_threshold: 50,
            cleanup_old_data_days: 30,
            request_timeout: Duration::from_secs(30),
            log_file: "logs/convo.log".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_option() {
        let settings = Settings::default();
        assert_eq!(settings.storage_backend, "json");
        assert_eq!(settings.max_conversations_per_user, 100);
        assert_eq!(settings.context_window_size, 10);
        assert_eq!(settings.auto_summarize_threshold, 50);
        assert_eq!(settings.cleanup_old_data_days, 30);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unparsable_values_fall_back_to_default() {
        env::set_var("CONVO_TEST_BAD_NUMBER", "not-a-number");
        let parsed: usize = parse_env("CONVO_TEST_BAD_NUMBER", 7);
        assert_eq!(parsed, 7);
        env::remove_var("CONVO_TEST_BAD_NUMBER");
    }
}
