//! Fleet registry: the fixed, read-only set of configured nodes plus the
//! per-fleet policy knobs. Built from the environment at process start, but
//! constructible directly for tests so fleets can run on arbitrary ports.

use std::time::Duration;

use thiserror::Error;

use crate::models::{FleetKind, NodeRole};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for environment variable {name}: {value}")]
    InvalidVar { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    /// Lower is preferred; 0 for the primary, 1/2 for the backups. Unused
    /// (always 0) for workers.
    pub priority: u8,
    /// Opaque tag carried by workers; not consulted by the coordination
    /// core.
    pub focus_area: Option<String>,
}

impl NodeInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Per-fleet behavioural differences that are otherwise identical
/// coordination code.
#[derive(Debug, Clone, Copy)]
pub struct FleetPolicy {
    pub kind: FleetKind,
    /// Summarizer: short-circuit a new task whose URL already completed.
    /// Crawler: always enqueue a fresh task.
    pub dedupe_by_url: bool,
    /// Summarizer: fewest-outstanding-assignments worker selection.
    /// Crawler: uniform random among online workers.
    pub select_fewest_assignments: bool,
}

impl FleetPolicy {
    pub fn for_kind(kind: FleetKind) -> Self {
        match kind {
            FleetKind::Crawler => FleetPolicy {
                kind,
                dedupe_by_url: false,
                select_fewest_assignments: false,
            },
            FleetKind::Summarizer => FleetPolicy {
                kind,
                dedupe_by_url: true,
                select_fewest_assignments: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_missed_beats: u32,
    pub stall_threshold: Duration,
    pub election_cooldown: Duration,
    pub election_delay_min: Duration,
    pub election_delay_max: Duration,
    pub client_wait_deadline: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            max_missed_beats: 3,
            stall_threshold: Duration::from_secs(60),
            election_cooldown: Duration::from_secs(60),
            election_delay_min: Duration::from_secs(5),
            election_delay_max: Duration::from_secs(10),
            client_wait_deadline: Duration::from_secs(60),
        }
    }
}

impl TimingConfig {
    /// Build from environment variables (all in seconds except
    /// `MAX_MISSED_BEATS`, a bare count), falling back to the production
    /// defaults above for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TimingConfig::default();

        let secs = |var: &str, default: Duration| -> Result<Duration, ConfigError> {
            match std::env::var(var) {
                Ok(v) => v
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidVar { name: var.to_string(), value: v }),
                Err(_) => Ok(default),
            }
        };
        let count = |var: &str, default: u32| -> Result<u32, ConfigError> {
            match std::env::var(var) {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ConfigError::InvalidVar { name: var.to_string(), value: v }),
                Err(_) => Ok(default),
            }
        };

        Ok(TimingConfig {
            heartbeat_interval: secs("HEARTBEAT_INTERVAL", defaults.heartbeat_interval)?,
            heartbeat_timeout: secs("HEARTBEAT_TIMEOUT", defaults.heartbeat_timeout)?,
            max_missed_beats: count("MAX_MISSED_BEATS", defaults.max_missed_beats)?,
            stall_threshold: secs("STALL_THRESHOLD", defaults.stall_threshold)?,
            election_cooldown: secs("ELECTION_COOLDOWN", defaults.election_cooldown)?,
            election_delay_min: secs("ELECTION_DELAY_MIN", defaults.election_delay_min)?,
            election_delay_max: secs("ELECTION_DELAY_MAX", defaults.election_delay_max)?,
            client_wait_deadline: secs("CLIENT_WAIT_DEADLINE", defaults.client_wait_deadline)?,
        })
    }
}

/// The full, read-only view of a fleet's configured nodes. Injected into
/// every node's state rather than read from process-wide globals, so tests
/// can build arbitrary fleets on arbitrary ports.
#[derive(Debug, Clone)]
pub struct FleetRegistry {
    pub primary: NodeInfo,
    pub backups: Vec<NodeInfo>,
    pub workers: Vec<NodeInfo>,
    pub policy: FleetPolicy,
    pub timing: TimingConfig,
}

impl FleetRegistry {
    /// All leaders in priority order: primary first, then backups in their
    /// declared order. This order is load-bearing for the election
    /// tie-break rule (`backups[0]` is "backup-1").
    pub fn leaders(&self) -> Vec<&NodeInfo> {
        let mut v = vec![&self.primary];
        v.extend(self.backups.iter());
        v
    }

    /// Every other configured node, used as the heartbeat broadcast target
    /// set for a leader.
    pub fn all_other_nodes<'a>(&'a self, self_id: &str) -> Vec<&'a NodeInfo> {
        self.leaders()
            .into_iter()
            .chain(self.workers.iter())
            .filter(|n| n.id != self_id)
            .collect()
    }

    pub fn node_by_id(&self, id: &str) -> Option<&NodeInfo> {
        self.leaders()
            .into_iter()
            .chain(self.workers.iter())
            .find(|n| n.id == id)
    }

    pub fn worker_by_id(&self, id: &str) -> Option<&NodeInfo> {
        self.workers.iter().find(|n| n.id == id)
    }

    /// 0 for the primary, 1.. for backups in declared order.
    pub fn priority_of(&self, id: &str) -> Option<u8> {
        self.leaders().into_iter().find(|n| n.id == id).map(|n| n.priority)
    }

    /// Build a default registry for `kind` from environment variables,
    /// falling back to a fixed local-port layout when unset. Mirrors the
    /// env-var-overridable node tables the reference implementation uses.
    pub fn from_env(kind: FleetKind) -> Result<Self, ConfigError> {
        let (leader_base, worker_base) = match kind {
            FleetKind::Crawler => (8300u16, 8400u16),
            FleetKind::Summarizer => (8100u16, 8200u16),
        };

        let host = |var: &str, default: &str| -> String {
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        };
        let port = |var: &str, default: u16| -> Result<u16, ConfigError> {
            match std::env::var(var) {
                Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar {
                    name: var.to_string(),
                    value: v,
                }),
                Err(_) => Ok(default),
            }
        };

        let primary = NodeInfo {
            id: "leader-primary".to_string(),
            host: host("PRIMARY_LEADER_HOST", "127.0.0.1"),
            port: port("PRIMARY_LEADER_PORT", leader_base)?,
            role: NodeRole::PrimaryLeader,
            priority: 0,
            focus_area: None,
        };

        let backups = vec![
            NodeInfo {
                id: "leader-backup-1".to_string(),
                host: host("BACKUP_LEADER_1_HOST", "127.0.0.1"),
                port: port("BACKUP_LEADER_1_PORT", leader_base + 1)?,
                role: NodeRole::BackupLeader,
                priority: 1,
                focus_area: None,
            },
            NodeInfo {
                id: "leader-backup-2".to_string(),
                host: host("BACKUP_LEADER_2_HOST", "127.0.0.1"),
                port: port("BACKUP_LEADER_2_PORT", leader_base + 2)?,
                role: NodeRole::BackupLeader,
                priority: 2,
                focus_area: None,
            },
        ];

        let workers = (1..=3u16)
            .map(|i| {
                Ok(NodeInfo {
                    id: format!("worker-{i}"),
                    host: host(&format!("WORKER_{i}_HOST"), "127.0.0.1"),
                    port: port(&format!("WORKER_{i}_PORT"), worker_base + i - 1)?,
                    role: NodeRole::Worker,
                    priority: 0,
                    focus_area: std::env::var(format!("WORKER_{i}_FOCUS")).ok(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(FleetRegistry {
            primary,
            backups,
            workers,
            policy: FleetPolicy::for_kind(kind),
            timing: TimingConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> FleetRegistry {
        FleetRegistry {
            primary: NodeInfo {
                id: "leader-primary".into(),
                host: "127.0.0.1".into(),
                port: 9100,
                role: NodeRole::PrimaryLeader,
                priority: 0,
                focus_area: None,
            },
            backups: vec![
                NodeInfo {
                    id: "leader-backup-1".into(),
                    host: "127.0.0.1".into(),
                    port: 9101,
                    role: NodeRole::BackupLeader,
                    priority: 1,
                    focus_area: None,
                },
                NodeInfo {
                    id: "leader-backup-2".into(),
                    host: "127.0.0.1".into(),
                    port: 9102,
                    role: NodeRole::BackupLeader,
                    priority: 2,
                    focus_area: None,
                },
            ],
            workers: vec![NodeInfo {
                id: "worker-1".into(),
                host: "127.0.0.1".into(),
                port: 9200,
                role: NodeRole::Worker,
                priority: 0,
                focus_area: None,
            }],
            policy: FleetPolicy::for_kind(FleetKind::Summarizer),
            timing: TimingConfig::default(),
        }
    }

    #[test]
    fn leaders_are_ordered_primary_first() {
        let r = test_registry();
        let ids: Vec<_> = r.leaders().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["leader-primary", "leader-backup-1", "leader-backup-2"]);
    }

    #[test]
    fn all_other_nodes_excludes_self() {
        let r = test_registry();
        let others = r.all_other_nodes("leader-primary");
        assert!(!others.iter().any(|n| n.id == "leader-primary"));
        assert_eq!(others.len(), 3);
    }

    #[test]
    fn priority_lookup() {
        let r = test_registry();
        assert_eq!(r.priority_of("leader-backup-1"), Some(1));
        assert_eq!(r.priority_of("leader-backup-2"), Some(2));
        assert_eq!(r.priority_of("worker-1"), None);
    }

    #[test]
    fn timing_from_env_overrides_defaults() {
        std::env::set_var("HEARTBEAT_INTERVAL", "1");
        std::env::set_var("MAX_MISSED_BEATS", "5");
        let timing = TimingConfig::from_env().unwrap();
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(timing.max_missed_beats, 5);
        assert_eq!(timing.stall_threshold, TimingConfig::default().stall_threshold);
        std::env::remove_var("HEARTBEAT_INTERVAL");
        std::env::remove_var("MAX_MISSED_BEATS");
    }

    #[test]
    fn policy_differs_per_fleet() {
        let crawler = FleetPolicy::for_kind(FleetKind::Crawler);
        let summarizer = FleetPolicy::for_kind(FleetKind::Summarizer);
        assert!(!crawler.dedupe_by_url);
        assert!(summarizer.dedupe_by_url);
    }
}
