//! Centralized configuration for Millrace.
//!
//! All tunable parameters are defined here; components receive their
//! section instead of reading the environment themselves.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Central configuration for all Millrace components.
///
/// Groups related settings into logical sections. Supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MillraceConfig {
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
}

/// Request runtime tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum concurrent in-flight handler invocations
    pub concurrency_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
        }
    }
}

/// HTTP listener and content delivery configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds
    pub bind_address: SocketAddr,
    /// Directory served as the content root
    pub content_root: PathBuf,
    /// Permissive CORS headers for development setups
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            content_root: PathBuf::from("."),
            enable_cors: false,
        }
    }
}

impl MillraceConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values fall back to
    /// the default rather than aborting startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(limit) = std::env::var("MILLRACE_CONCURRENCY_LIMIT") {
            match limit.parse::<usize>() {
                Ok(value) => config.runtime.concurrency_limit = value,
                Err(_) => {
                    tracing::warn!("Ignoring unparseable MILLRACE_CONCURRENCY_LIMIT: {}", limit);
                }
            }
        }

        if let Ok(address) = std::env::var("MILLRACE_BIND_ADDRESS") {
            match address.parse::<SocketAddr>() {
                Ok(value) => config.server.bind_address = value,
                Err(_) => {
                    tracing::warn!("Ignoring unparseable MILLRACE_BIND_ADDRESS: {}", address);
                }
            }
        }

        if let Ok(root) = std::env::var("MILLRACE_CONTENT_ROOT") {
            config.server.content_root = PathBuf::from(root);
        }

        if let Ok(cors) = std::env::var("MILLRACE_ENABLE_CORS") {
            config.server.enable_cors = cors.parse().unwrap_or(false);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = MillraceConfig::default();

        assert_eq!(config.runtime.concurrency_limit, 100);
        assert_eq!(
            config.server.bind_address,
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
        assert_eq!(config.server.content_root, PathBuf::from("."));
        assert!(!config.server.enable_cors);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("MILLRACE_CONCURRENCY_LIMIT", "8");
            std::env::set_var("MILLRACE_BIND_ADDRESS", "nowhere");
            std::env::set_var("MILLRACE_CONTENT_ROOT", "/srv/content");
            std::env::set_var("MILLRACE_ENABLE_CORS", "true");
        }

        let config = MillraceConfig::from_env();

        assert_eq!(config.runtime.concurrency_limit, 8);
        // Unparseable values keep the default instead of aborting.
        assert_eq!(
            config.server.bind_address,
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
        assert_eq!(config.server.content_root, PathBuf::from("/srv/content"));
        assert!(config.server.enable_cors);

        // Cleanup
        unsafe {
            std::env::remove_var("MILLRACE_CONCURRENCY_LIMIT");
            std::env::remove_var("MILLRACE_BIND_ADDRESS");
            std::env::remove_var("MILLRACE_CONTENT_ROOT");
            std::env::remove_var("MILLRACE_ENABLE_CORS");
        }
    }
}
