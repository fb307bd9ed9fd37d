// Environment detection and logger configuration.

use std::sync::OnceLock;

static ENV_MODE: OnceLock<EnvMode> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    Production,
    Development,
    Test,
}

/// Detect the environment mode from `SSO_BRIDGE_ENV`, then `RUST_ENV`.
pub fn detect_env_mode() -> EnvMode {
    *ENV_MODE.get_or_init(|| {
        let env_val = std::env::var("SSO_BRIDGE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        parse_env_mode(&env_val)
    })
}

fn parse_env_mode(value: &str) -> EnvMode {
    match value.to_lowercase().as_str() {
        "production" | "prod" => EnvMode::Production,
        "test" | "testing" => EnvMode::Test,
        _ => EnvMode::Development,
    }
}

pub fn is_production() -> bool {
    detect_env_mode() == EnvMode::Production
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins; otherwise `sso_bridge=info` in production and
/// `sso_bridge=debug` elsewhere. Safe to call more than once.
pub fn init_logger() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production() {
            EnvFilter::new("sso_bridge=info")
        } else {
            EnvFilter::new("sso_bridge=debug")
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_mode() {
        assert_eq!(parse_env_mode("production"), EnvMode::Production);
        assert_eq!(parse_env_mode("PROD"), EnvMode::Production);
        assert_eq!(parse_env_mode("test"), EnvMode::Test);
        assert_eq!(parse_env_mode(""), EnvMode::Development);
    }

    #[test]
    fn test_init_logger_twice_is_harmless() {
        init_logger();
        init_logger();
    }
}
