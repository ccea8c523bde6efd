use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    /// Where workflow definitions are persisted; in-memory only when unset
    pub workflow_store_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

/// Runtime knobs for the workflow engine itself
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied to handler calls whose action does not set its own
    pub default_action_timeout: Option<Duration>,
    pub retention: RetentionPolicy,
    /// How often the host prunes finished executions
    pub sweep_interval: Duration,
}

/// Bounds on how many finished executions the tracker keeps around
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub max_finished: usize,
    pub finished_ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_finished: 1000,
            finished_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl RetentionPolicy {
    /// Keep every execution forever
    pub fn unbounded() -> Self {
        Self {
            max_finished: usize::MAX,
            finished_ttl: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_action_timeout: None,
            retention: RetentionPolicy::default(),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let defaults = EngineConfig::default();

        let default_action_timeout = parse_u64("ACTION_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let max_finished = parse_u64("EXECUTION_RETENTION_MAX")
            .map(|max| max as usize)
            .unwrap_or(defaults.retention.max_finished);

        // 0 disables age based pruning
        let finished_ttl = match parse_u64("EXECUTION_RETENTION_TTL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.retention.finished_ttl,
        };

        let sweep_interval = parse_u64("EXECUTION_SWEEP_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        Ok(Config {
            server_addr: lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            workflow_store_path: lookup("WORKFLOW_STORE_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            engine: EngineConfig {
                default_action_timeout,
                retention: RetentionPolicy {
                    max_finished,
                    finished_ttl,
                },
                sweep_interval,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert!(config.workflow_store_path.is_none());
        assert!(config.engine.default_action_timeout.is_none());
        assert_eq!(config.engine.retention, RetentionPolicy::default());
        assert_eq!(config.engine.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_ADDR", "127.0.0.1:9000"),
            ("WORKFLOW_STORE_PATH", "/var/lib/guildflow/workflows.json"),
            ("ACTION_TIMEOUT_SECS", "15"),
            ("EXECUTION_RETENTION_MAX", "50"),
            ("EXECUTION_RETENTION_TTL_SECS", "0"),
        ]);

        assert_eq!(config.server_addr, "127.0.0.1:9000");
        assert_eq!(
            config.workflow_store_path,
            Some(PathBuf::from("/var/lib/guildflow/workflows.json"))
        );
        assert_eq!(config.engine.default_action_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.engine.retention.max_finished, 50);
        assert!(config.engine.retention.finished_ttl.is_none());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_from(&[
            ("EXECUTION_RETENTION_MAX", "lots"),
            ("EXECUTION_SWEEP_INTERVAL_SECS", "-1"),
        ]);

        assert_eq!(config.engine.retention.max_finished, 1000);
        assert_eq!(config.engine.sweep_interval, Duration::from_secs(300));
    }
}
