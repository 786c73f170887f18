use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration - environment driven
// ============================================================================

pub const ORDER_SERVICE_GROUP: &str = "order-service";
pub const ASSEMBLY_WORKER_GROUP: &str = "assembly-worker";
pub const NOTIFIER_GROUP: &str = "notifier";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which part of the saga this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    OrderService,
    AssemblyWorker,
    Notifier,
    /// Everything in one process, plus a scripted demo order
    All,
}

impl ServiceRole {
    pub fn runs_order_service(&self) -> bool {
        matches!(self, ServiceRole::OrderService | ServiceRole::All)
    }

    pub fn runs_assembly_worker(&self) -> bool {
        matches!(self, ServiceRole::AssemblyWorker | ServiceRole::All)
    }

    pub fn runs_notifier(&self) -> bool {
        matches!(self, ServiceRole::Notifier | ServiceRole::All)
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order-service" => Ok(ServiceRole::OrderService),
            "assembly-worker" => Ok(ServiceRole::AssemblyWorker),
            "notifier" => Ok(ServiceRole::Notifier),
            "all" => Ok(ServiceRole::All),
            _ => Err("expected order-service, assembly-worker, notifier or all".to_string()),
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceRole::OrderService => "order-service",
            ServiceRole::AssemblyWorker => "assembly-worker",
            ServiceRole::Notifier => "notifier",
            ServiceRole::All => "all",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Scylla,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "scylla" => Ok(StoreKind::Scylla),
            _ => Err("expected memory or scylla".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub role: ServiceRole,
    /// `None` runs the in-process broker
    pub redpanda_brokers: Option<String>,
    pub payment_completed_topic: String,
    pub assembly_completed_topic: String,
    pub store: StoreKind,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    /// `None` disables the metrics exporter
    pub metrics_port: Option<u16>,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let role = parse_or("SERVICE_ROLE", get("SERVICE_ROLE"), ServiceRole::All)?;
        let store = parse_or("ORDER_STORE", get("ORDER_STORE"), StoreKind::Memory)?;

        let scylla_nodes = get("SCYLLA_NODES")
            .unwrap_or_else(|| "127.0.0.1:9042".to_string())
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        let scylla_keyspace = get("SCYLLA_KEYSPACE").unwrap_or_else(|| "orders_ks".to_string());
        if !is_cql_identifier(&scylla_keyspace) {
            return Err(ConfigError::Invalid {
                var: "SCYLLA_KEYSPACE",
                value: scylla_keyspace,
                reason: "must be letters, digits and underscores, starting with a letter".into(),
            });
        }

        let metrics_port: u16 = parse_or("METRICS_PORT", get("METRICS_PORT"), 9090)?;
        let grace_secs: u64 = parse_or("SHUTDOWN_GRACE_SECS", get("SHUTDOWN_GRACE_SECS"), 10)?;

        Ok(Self {
            role,
            redpanda_brokers: get("REDPANDA_BROKERS"),
            payment_completed_topic: get("PAYMENT_COMPLETED_TOPIC")
                .unwrap_or_else(|| "payment-completed".to_string()),
            assembly_completed_topic: get("ASSEMBLY_COMPLETED_TOPIC")
                .unwrap_or_else(|| "assembly-completed".to_string()),
            store,
            scylla_nodes,
            scylla_keyspace,
            metrics_port: (metrics_port != 0).then_some(metrics_port),
            shutdown_grace: Duration::from_secs(grace_secs),
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn is_cql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 48
}
