use crate::config::types::{ChannelConfig, Config, CoordinatorConfig, FrontierConfig, WorkerConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_coordinator_config(&config.coordinator)?;
    validate_worker_config(&config.worker, &config.coordinator)?;
    validate_frontier_config(&config.frontier)?;
    validate_channel_config(&config.channel)?;
    Ok(())
}

/// Validates coordinator configuration
fn validate_coordinator_config(config: &CoordinatorConfig) -> Result<(), ConfigError> {
    if config.heartbeat_timeout == 0 {
        return Err(ConfigError::Validation(
            "heartbeat-timeout must be >= 1s".to_string(),
        ));
    }

    if config.sweep_interval == 0 || config.sweep_interval >= config.heartbeat_timeout {
        return Err(ConfigError::Validation(format!(
            "sweep-interval must be between 1s and heartbeat-timeout ({}s), got {}s",
            config.heartbeat_timeout, config.sweep_interval
        )));
    }

    if config.dispatch_interval < 10 {
        return Err(ConfigError::Validation(format!(
            "dispatch-interval must be >= 10ms, got {}ms",
            config.dispatch_interval
        )));
    }

    if config.dashboard_interval == 0 {
        return Err(ConfigError::Validation(
            "dashboard-interval must be >= 1s".to_string(),
        ));
    }

    if config.max_in_flight_per_worker < 1 {
        return Err(ConfigError::Validation(format!(
            "max-in-flight-per-worker must be >= 1, got {}",
            config.max_in_flight_per_worker
        )));
    }

    if config.max_in_flight == Some(0) {
        return Err(ConfigError::Validation(
            "max-in-flight must be >= 1 when set".to_string(),
        ));
    }

    if config.max_attempts == Some(0) {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker configuration against the coordinator's liveness window
fn validate_worker_config(
    config: &WorkerConfig,
    coordinator: &CoordinatorConfig,
) -> Result<(), ConfigError> {
    if config.request_timeout == 0 {
        return Err(ConfigError::Validation(
            "request-timeout must be >= 1s".to_string(),
        ));
    }

    // A worker that heartbeats slower than the timeout is always presumed dead.
    if config.heartbeat_interval == 0 || config.heartbeat_interval >= coordinator.heartbeat_timeout
    {
        return Err(ConfigError::Validation(format!(
            "heartbeat-interval must be between 1s and heartbeat-timeout ({}s), got {}s",
            coordinator.heartbeat_timeout, config.heartbeat_interval
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates seed URLs
fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use the http or https scheme",
                seed
            )));
        }
    }

    if let Some(path) = &config.database_path {
        if path.is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_channel_config(config: &ChannelConfig) -> Result<(), ConfigError> {
    if config.ack_deadline == 0 {
        return Err(ConfigError::Validation(
            "ack-deadline must be >= 1s".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_sweep_interval_must_be_below_timeout() {
        let mut config = Config::default();
        config.coordinator.sweep_interval = config.coordinator.heartbeat_timeout;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_heartbeat_interval_must_be_below_timeout() {
        let mut config = Config::default();
        config.worker.heartbeat_interval = 120;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = Config::default();
        config.coordinator.max_in_flight_per_worker = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.coordinator.max_attempts = Some(0);
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.coordinator.max_in_flight = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_seed_urls() {
        let mut config = Config::default();
        config.frontier.seeds = vec!["https://a.test".to_string()];
        assert!(validate(&config).is_ok());

        config.frontier.seeds = vec!["ftp://a.test".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));

        config.frontier.seeds = vec!["not a url".to_string()];
        assert!(validate(&config).is_err());
    }
}
