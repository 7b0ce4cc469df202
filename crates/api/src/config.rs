//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,

    // Shared secrets
    pub billing_webhook_secret: String,
    pub batch_trigger_secret: String,
    pub unsubscribe_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // Shared secrets. Each one authenticates a different caller:
            // the billing provider, the batch cron, and unsubscribe links.
            billing_webhook_secret: required_secret("BILLING_WEBHOOK_SECRET")?,
            batch_trigger_secret: required_secret("BATCH_TRIGGER_SECRET")?,
            unsubscribe_secret: required_secret("UNSUBSCRIBE_HMAC_SECRET")?,
        })
    }
}

/// Read a required secret, rejecting values too short to resist brute force
fn required_secret(name: &'static str) -> Result<String, ConfigError> {
    let secret = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if secret.len() < 32 {
        return Err(ConfigError::WeakSecret(name));
    }
    Ok(secret)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("{0} must be at least 32 characters")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        // Secrets must be at least 32 characters
        env::set_var(
            "BILLING_WEBHOOK_SECRET",
            "test-webhook-secret-at-least-32-characters",
        );
        env::set_var(
            "BATCH_TRIGGER_SECRET",
            "test-batch-secret-at-least-32-characters",
        );
        env::set_var(
            "UNSUBSCRIBE_HMAC_SECRET",
            "test-unsubscribe-secret-at-least-32-chars",
        );
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("BIND_ADDRESS");
        env::remove_var("BILLING_WEBHOOK_SECRET");
        env::remove_var("BATCH_TRIGGER_SECRET");
        env::remove_var("UNSUBSCRIBE_HMAC_SECRET");
    }

    #[test]
    fn test_config_validation() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        // === Test 1: Missing DATABASE_URL ===
        cleanup_config();
        setup_minimal_config();
        env::remove_var("DATABASE_URL");

        let result = Config::from_env();
        match result {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing error for DATABASE_URL, got: {:?}", other),
        }

        // === Test 2: Short webhook secret rejected ===
        setup_minimal_config();
        env::set_var("BILLING_WEBHOOK_SECRET", "too-short");

        let result = Config::from_env();
        assert!(
            matches!(result, Err(ConfigError::WeakSecret("BILLING_WEBHOOK_SECRET"))),
            "Short webhook secret should be rejected, got: {:?}",
            result
        );

        // === Test 3: Short batch secret rejected ===
        setup_minimal_config();
        env::set_var("BATCH_TRIGGER_SECRET", "too-short");

        let result = Config::from_env();
        assert!(
            matches!(result, Err(ConfigError::WeakSecret("BATCH_TRIGGER_SECRET"))),
            "Short batch secret should be rejected, got: {:?}",
            result
        );

        // === Test 4: Valid config accepted with defaults ===
        setup_minimal_config();
        env::remove_var("BIND_ADDRESS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.database_url, "postgres://test");

        // === Test 5: Explicit bind address wins ===
        env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:8080");

        cleanup_config();
    }
}
