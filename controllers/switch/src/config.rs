//! Controller configuration.
//!
//! Loaded once at startup from environment variables. Every setting has a
//! default so the controller runs without any configuration at all.

use crate::error::ControllerError;
use crds::AddressFamily;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the switch controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch (`None` = all namespaces)
    pub namespace: Option<String>,
    /// Requeue delay once a pass produced no net change
    pub requeue_interval: Duration,
    /// Requeue delay while a switch is still converging
    pub fast_requeue: Duration,
    /// Maximum age of the configuration agent heartbeat
    pub config_agent_timeout: Duration,
    /// IPAM parent subnet for IPv4 south subnets
    pub subnet_pool_v4: String,
    /// IPAM parent subnet for IPv6 south subnets
    pub subnet_pool_v6: String,
    /// Interface name prefixes that identify management ports
    pub management_port_prefixes: Vec<String>,
    /// Maximum concurrent reconciliations per watched kind
    pub concurrency: u16,
    /// Error backoff lower bound, seconds
    pub error_backoff_min_secs: u64,
    /// Error backoff upper bound, seconds
    pub error_backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_interval: Duration::from_secs(5),
            fast_requeue: Duration::from_millis(500),
            config_agent_timeout: Duration::from_secs(300),
            subnet_pool_v4: "switch-south-v4".to_string(),
            subnet_pool_v6: "switch-south-v6".to_string(),
            management_port_prefixes: vec!["eth".to_string()],
            concurrency: 4,
            error_backoff_min_secs: 1,
            error_backoff_max_secs: 60,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            namespace: lookup("WATCH_NAMESPACE"),
            requeue_interval: Duration::from_secs(parse_or(
                &lookup,
                "REQUEUE_INTERVAL_SECS",
                defaults.requeue_interval.as_secs(),
            )?),
            fast_requeue: Duration::from_millis(parse_or(
                &lookup,
                "FAST_REQUEUE_MILLIS",
                500,
            )?),
            config_agent_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CONFIG_AGENT_TIMEOUT_SECS",
                defaults.config_agent_timeout.as_secs(),
            )?),
            subnet_pool_v4: lookup("SUBNET_POOL_V4").unwrap_or(defaults.subnet_pool_v4),
            subnet_pool_v6: lookup("SUBNET_POOL_V6").unwrap_or(defaults.subnet_pool_v6),
            management_port_prefixes: lookup("MANAGEMENT_PORT_PREFIXES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.management_port_prefixes),
            concurrency: parse_or(&lookup, "CONTROLLER_CONCURRENCY", defaults.concurrency)?,
            error_backoff_min_secs: parse_or(
                &lookup,
                "ERROR_BACKOFF_MIN_SECS",
                defaults.error_backoff_min_secs,
            )?,
            error_backoff_max_secs: parse_or(
                &lookup,
                "ERROR_BACKOFF_MAX_SECS",
                defaults.error_backoff_max_secs,
            )?,
        };

        if config.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "CONTROLLER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if config.error_backoff_min_secs == 0
            || config.error_backoff_min_secs > config.error_backoff_max_secs
        {
            return Err(ControllerError::InvalidConfig(format!(
                "error backoff bounds {}..{} are invalid",
                config.error_backoff_min_secs, config.error_backoff_max_secs
            )));
        }
        Ok(config)
    }

    /// IPAM parent subnet for the given family
    #[must_use]
    pub fn subnet_pool(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::Ipv4 => &self.subnet_pool_v4,
            AddressFamily::Ipv6 => &self.subnet_pool_v6,
        }
    }

    /// Whether the interface is a management port
    #[must_use]
    pub fn is_management_port(&self, interface: &str) -> bool {
        self.management_port_prefixes
            .iter()
            .any(|prefix| interface.starts_with(prefix.as_str()))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{key} has an invalid value '{raw}'"))
        }),
        None => Ok(default),
    }
}
