use crate::error::AdapterError;

/// Application configuration, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub amqp: AmqpConfig,
    pub qms: QmsConfig,
}

/// AMQP consumer settings
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub uri: String,
    pub exchange: String,
    pub exchange_type: String,
    pub queue: String,
    pub routing_key: String,
    /// Maximum unacknowledged deliveries in flight (0 = unlimited)
    pub prefetch_count: u16,
    /// Optional deadline for a single handler invocation, in seconds.
    /// Unset means the handler may block the receive loop indefinitely.
    pub handler_timeout_secs: Option<u64>,
}

/// QMS forwarding settings
#[derive(Debug, Clone)]
pub struct QmsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub usage_path: String,
    pub user_domain: String,
}

fn required(name: &str) -> Result<String, AdapterError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdapterError::Config(format!("{} must be set", name)))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, AdapterError> {
        let qms_enabled = optional("QMS_ENABLED", "false")
            .parse::<bool>()
            .map_err(|_| AdapterError::Config("QMS_ENABLED must be true or false".to_string()))?;

        let qms = QmsConfig {
            enabled: qms_enabled,
            base_url: if qms_enabled {
                required("QMS_BASE_URL")?
            } else {
                optional("QMS_BASE_URL", "")
            },
            usage_path: if qms_enabled {
                required("QMS_USAGE_PATH")?
            } else {
                optional("QMS_USAGE_PATH", "")
            },
            user_domain: required("USERS_DOMAIN")?,
        };

        let amqp = AmqpConfig {
            uri: required("AMQP_URI")?,
            exchange: required("AMQP_EXCHANGE")?,
            exchange_type: optional("AMQP_EXCHANGE_TYPE", "topic"),
            queue: optional("AMQP_QUEUE", "qms-adapter"),
            routing_key: optional("AMQP_ROUTING_KEY", "qms.usages"),
            prefetch_count: optional("AMQP_PREFETCH_COUNT", "0")
                .parse()
                .map_err(|_| {
                    AdapterError::Config("AMQP_PREFETCH_COUNT must be an integer".to_string())
                })?,
            handler_timeout_secs: match std::env::var("HANDLER_TIMEOUT_SECS") {
                Ok(v) if !v.is_empty() => Some(v.parse().map_err(|_| {
                    AdapterError::Config("HANDLER_TIMEOUT_SECS must be an integer".to_string())
                })?),
                _ => None,
            },
        };

        Ok(Config { amqp, qms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // Environment variables are process-wide; these tests must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "AMQP_URI",
        "AMQP_EXCHANGE",
        "AMQP_EXCHANGE_TYPE",
        "AMQP_QUEUE",
        "AMQP_ROUTING_KEY",
        "AMQP_PREFETCH_COUNT",
        "HANDLER_TIMEOUT_SECS",
        "QMS_ENABLED",
        "QMS_BASE_URL",
        "QMS_USAGE_PATH",
        "USERS_DOMAIN",
    ];

    fn scoped_env(vars: &[(&str, &str)]) -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in ALL_VARS {
            std::env::remove_var(name);
        }
        for (name, value) in vars {
            std::env::set_var(name, value);
        }
        guard
    }

    fn minimal_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AMQP_URI", "amqp://broker.example.org:5672"),
            ("AMQP_EXCHANGE", "de"),
            ("USERS_DOMAIN", "iplantcollaborative.org"),
        ]
    }

    #[test]
    fn test_from_env_applies_defaults() {
        let _guard = scoped_env(&minimal_vars());

        let config = Config::from_env().unwrap();
        assert_eq!(config.amqp.exchange_type, "topic");
        assert_eq!(config.amqp.queue, "qms-adapter");
        assert_eq!(config.amqp.routing_key, "qms.usages");
        assert_eq!(config.amqp.prefetch_count, 0);
        assert_eq!(config.amqp.handler_timeout_secs, None);
        assert!(!config.qms.enabled);
    }

    #[test]
    fn test_from_env_missing_uri_names_the_variable() {
        let _guard = scoped_env(&[
            ("AMQP_EXCHANGE", "de"),
            ("USERS_DOMAIN", "iplantcollaborative.org"),
        ]);

        let err = Config::from_env().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: AMQP_URI must be set");
    }

    #[test]
    fn test_from_env_qms_disabled_does_not_require_endpoint() {
        let mut vars = minimal_vars();
        vars.push(("QMS_ENABLED", "false"));
        let _guard = scoped_env(&vars);

        let config = Config::from_env().unwrap();
        assert!(!config.qms.enabled);
        assert!(config.qms.base_url.is_empty());
        assert!(config.qms.usage_path.is_empty());
    }

    #[test]
    fn test_from_env_qms_enabled_requires_base_url() {
        let mut vars = minimal_vars();
        vars.push(("QMS_ENABLED", "true"));
        let _guard = scoped_env(&vars);

        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: QMS_BASE_URL must be set"
        );
    }

    #[test]
    fn test_from_env_qms_enabled_loads_endpoint() {
        let mut vars = minimal_vars();
        vars.push(("QMS_ENABLED", "true"));
        vars.push(("QMS_BASE_URL", "http://qms.example.org"));
        vars.push(("QMS_USAGE_PATH", "/v1/usages"));
        let _guard = scoped_env(&vars);

        let config = Config::from_env().unwrap();
        assert!(config.qms.enabled);
        assert_eq!(config.qms.base_url, "http://qms.example.org");
        assert_eq!(config.qms.usage_path, "/v1/usages");
    }

    #[test]
    fn test_from_env_parses_handler_timeout() {
        let mut vars = minimal_vars();
        vars.push(("HANDLER_TIMEOUT_SECS", "30"));
        let _guard = scoped_env(&vars);

        let config = Config::from_env().unwrap();
        assert_eq!(config.amqp.handler_timeout_secs, Some(30));
    }

    #[test]
    fn test_from_env_rejects_non_numeric_handler_timeout() {
        let mut vars = minimal_vars();
        vars.push(("HANDLER_TIMEOUT_SECS", "soon"));
        let _guard = scoped_env(&vars);

        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: HANDLER_TIMEOUT_SECS must be an integer"
        );
    }

    #[test]
    fn test_from_env_rejects_non_numeric_prefetch() {
        let mut vars = minimal_vars();
        vars.push(("AMQP_PREFETCH_COUNT", "lots"));
        let _guard = scoped_env(&vars);

        let err = Config::from_env().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: AMQP_PREFETCH_COUNT must be an integer"
        );
    }
}
