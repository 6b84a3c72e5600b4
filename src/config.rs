//! Runtime configuration
//!
//! Values come from the environment first and fall back to defaults, so a
//! bare `cargo run` gives a working development server.

use std::env;

use tracing::warn;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,
    /// Secret used to sign and verify host tokens
    pub secret_key: String,
    /// Capacity of the worker pool running client IO tasks
    pub task_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            secret_key: "supersecret".to_string(),
            task_pool_size: 4096,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `PORT`, `SECRET_KEY`, `TASK_POOL_SIZE`.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            port: parsed_var("PORT", defaults.port),
            secret_key: env::var("SECRET_KEY").unwrap_or(defaults.secret_key),
            task_pool_size: parsed_var("TASK_POOL_SIZE", defaults.task_pool_size),
        }
    }
}

fn parsed_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparseable env value, using default");
            default
        }),
        Err(_) => default,
    }
}
