//! API key lookup for the Anthropic completion client

use huddle_core::{HuddleError, Result};
use std::env;

/// Read the API key from the named environment variable
pub fn api_key_from_env(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", var);
            Ok(key)
        }
        _ => Err(HuddleError::Auth(format!(
            "No API key found. Set {}=sk-ant-api03-...",
            var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes env var modifications across tests
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_reads_configured_variable() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("HUDDLE_TEST_KEY", "sk-test");
        assert_eq!(api_key_from_env("HUDDLE_TEST_KEY").unwrap(), "sk-test");
        env::remove_var("HUDDLE_TEST_KEY");
    }

    #[test]
    fn test_missing_or_blank_variable() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("HUDDLE_TEST_MISSING");
        assert!(matches!(
            api_key_from_env("HUDDLE_TEST_MISSING"),
            Err(HuddleError::Auth(_))
        ));

        env::set_var("HUDDLE_TEST_MISSING", "  ");
        assert!(api_key_from_env("HUDDLE_TEST_MISSING").is_err());
        env::remove_var("HUDDLE_TEST_MISSING");
    }
}
