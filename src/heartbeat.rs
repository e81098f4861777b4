//! Heartbeat service: periodic emit to peers, receipt tracking, and
//! liveness detection with missed-beat hysteresis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{FleetRegistry, NodeInfo};
use crate::models::{HeartbeatMessage, NodeRole, NodeStatus};

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("request to {peer} failed: {source}")]
    RequestFailed { peer: String, source: reqwest::Error },

    #[error("peer {peer} responded {status}")]
    PeerError { peer: String, status: u16 },
}

#[derive(Debug, Clone)]
struct PeerRecord {
    last_seen: chrono::DateTime<Utc>,
    status: NodeStatus,
    missed_beats: u32,
}

/// Counters reported in each outbound heartbeat. Populated by the caller
/// (state manager stats) on every emit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCounters {
    pub total: usize,
    pub pending_or_processing: usize,
    pub completed: usize,
}

pub type StatusCallback = Arc<dyn Fn(&str, NodeStatus) + Send + Sync>;

/// Tracks peer liveness and emits outbound heartbeats. One instance per
/// node; leaders additionally register a `status_callback` to drive
/// election/reassignment, workers do not.
pub struct HeartbeatService {
    node_id: String,
    role: NodeRole,
    http: Client,
    interval: Duration,
    timeout: Duration,
    max_missed_beats: u32,
    peers: DashMap<String, PeerRecord>,
    failed: DashMap<String, ()>,
    current_leader_id: Arc<std::sync::Mutex<String>>,
    counters: Arc<std::sync::Mutex<TaskCounters>>,
    status_callback: Option<StatusCallback>,
    dispatch_count: AtomicUsize,
}

impl HeartbeatService {
    pub fn new(
        node_id: impl Into<String>,
        role: NodeRole,
        registry: &FleetRegistry,
        initial_leader_id: impl Into<String>,
        status_callback: Option<StatusCallback>,
    ) -> Self {
        let node_id = node_id.into();

        // Seed every peer this node expects to see as optimistically online
        // as of "now": real deployments start all configured nodes close
        // together, so a fresh node has no basis to treat an unheard-from
        // peer as failed rather than merely not-yet-observed. Without this
        // seed, a peer that crashes before ever being heard from would
        // never be tracked, and so could never be declared offline.
        let peers = DashMap::new();
        let now = Utc::now();
        let seed_targets: Vec<String> = match role {
            NodeRole::PrimaryLeader | NodeRole::BackupLeader => registry
                .all_other_nodes(&node_id)
                .into_iter()
                .map(|n| n.id.clone())
                .collect(),
            NodeRole::Worker => vec![registry.primary.id.clone()],
        };
        for id in seed_targets {
            peers.insert(
                id,
                PeerRecord {
                    last_seen: now,
                    status: NodeStatus::Online,
                    missed_beats: 0,
                },
            );
        }

        HeartbeatService {
            node_id,
            role,
            http: Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .expect("failed to build heartbeat http client"),
            interval: registry.timing.heartbeat_interval,
            timeout: registry.timing.heartbeat_timeout,
            max_missed_beats: registry.timing.max_missed_beats,
            peers,
            failed: DashMap::new(),
            current_leader_id: Arc::new(std::sync::Mutex::new(initial_leader_id.into())),
            counters: Arc::new(std::sync::Mutex::new(TaskCounters::default())),
            status_callback,
            dispatch_count: AtomicUsize::new(0),
        }
    }

    pub fn current_leader_id(&self) -> String {
        self.current_leader_id.lock().unwrap().clone()
    }

    pub fn set_current_leader_id(&self, id: impl Into<String>) {
        *self.current_leader_id.lock().unwrap() = id.into();
    }

    pub fn update_task_counters(&self, counters: TaskCounters) {
        *self.counters.lock().unwrap() = counters;
    }

    pub fn is_node_active(&self, peer_id: &str) -> bool {
        !self.failed.contains_key(peer_id)
    }

    /// Force a peer into the failed set without waiting out the real
    /// missed-beat hysteresis window. Used by election tests elsewhere in
    /// the crate that need a deterministic "this peer is down" starting
    /// point rather than a timing-dependent one.
    #[cfg(test)]
    pub(crate) fn mark_failed_for_test(&self, peer_id: &str) {
        self.failed.insert(peer_id.to_string(), ());
    }

    pub fn failed_nodes(&self) -> Vec<String> {
        self.failed.iter().map(|e| e.key().clone()).collect()
    }

    pub fn active_nodes(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !self.failed.contains_key(id))
            .collect()
    }

    /// Handle an inbound heartbeat. Adopts the sender's reported leader if
    /// it differs from ours and the sender is a leader. Clears a missed
    /// counter and fires a recovery callback if the peer had been marked
    /// failed.
    pub fn receive_heartbeat(&self, hb: &HeartbeatMessage) {
        let was_failed = self.failed.remove(&hb.node_id).is_some();

        match self.peers.get_mut(&hb.node_id) {
            Some(mut rec) => {
                rec.last_seen = Utc::now();
                rec.status = hb.status;
                rec.missed_beats = 0;
            }
            None => {
                self.peers.insert(
                    hb.node_id.clone(),
                    PeerRecord {
                        last_seen: Utc::now(),
                        status: hb.status,
                        missed_beats: 0,
                    },
                );
            }
        }

        if was_failed {
            info!(peer = %hb.node_id, "peer recovered");
            if let Some(cb) = &self.status_callback {
                cb(&hb.node_id, hb.status);
            }
        }

        if matches!(hb.role, NodeRole::PrimaryLeader | NodeRole::BackupLeader) {
            if let Some(ref leader_id) = hb.leader_id {
                if leader_id != &self.current_leader_id() {
                    info!(from = %self.current_leader_id(), to = %leader_id, "adopting new leader id from heartbeat");
                    self.set_current_leader_id(leader_id.clone());
                }
            }
        }
    }

    /// Scan tracked peers for silence exceeding `timeout`, applying the
    /// missed-beat hysteresis. Runs under the emit loop's cadence.
    fn check_liveness(&self) {
        let now = Utc::now();
        let mut newly_failed = Vec::new();

        for mut entry in self.peers.iter_mut() {
            let id = entry.key().clone();
            if self.failed.contains_key(&id) {
                continue;
            }
            let silent_for = (now - entry.last_seen).num_milliseconds();
            if silent_for > self.timeout.as_millis() as i64 {
                entry.missed_beats += 1;
                if entry.missed_beats >= self.max_missed_beats {
                    newly_failed.push(id.clone());
                } else {
                    debug!(peer = %id, missed = entry.missed_beats, "missed heartbeat window");
                }
            }
        }

        for id in newly_failed {
            if let Some(mut rec) = self.peers.get_mut(&id) {
                rec.missed_beats = 0;
            }
            self.failed.insert(id.clone(), ());
            warn!(peer = %id, "peer marked offline");
            if let Some(cb) = &self.status_callback {
                cb(&id, NodeStatus::Offline);
            }
        }
    }

    async fn send_one(&self, peer: &NodeInfo, targets_for_leader: bool) -> Result<(), HeartbeatError> {
        let counters = *self.counters.lock().unwrap();
        let msg = HeartbeatMessage {
            node_id: self.node_id.clone(),
            role: self.role,
            status: NodeStatus::Online,
            timestamp: Utc::now(),
            leader_id: Some(self.current_leader_id()),
            tasks_count: counters.total,
            pending_tasks: counters.pending_or_processing,
            completed_tasks: counters.completed,
        };
        let _ = targets_for_leader;

        let url = format!("{}/heartbeat", peer.base_url());
        let resp = self
            .http
            .post(&url)
            .json(&msg)
            .send()
            .await
            .map_err(|e| HeartbeatError::RequestFailed {
                peer: peer.id.clone(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(HeartbeatError::PeerError {
                peer: peer.id.clone(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Emit to every target (all other nodes for a leader, just the
    /// believed leader for a worker). Failures are logged and otherwise
    /// ignored: the liveness check, not the send path, is what declares a
    /// peer dead.
    async fn emit_round(&self, targets: &[NodeInfo]) {
        for peer in targets {
            if let Err(e) = self.send_one(peer, true).await {
                debug!(peer = %peer.id, error = %e, "heartbeat send failed");
            }
        }
        self.dispatch_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Run the emit/check loop until `shutdown` fires. `targets` is
    /// recomputed each tick via `target_fn` since a worker's sole target
    /// (the believed leader) can change between ticks.
    pub async fn run(
        self: Arc<Self>,
        target_fn: impl Fn() -> Vec<NodeInfo> + Send + Sync + 'static,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(node_id = %self.node_id, "starting heartbeat service");
        loop {
            let jitter_ms = rand::thread_rng().gen_range(-50i64..=50i64);
            let sleep_ms = (self.interval.as_millis() as i64 + jitter_ms).max(0) as u64;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {
                    let targets = target_fn();
                    self.emit_round(&targets).await;
                    self.check_liveness();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(node_id = %self.node_id, "heartbeat service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

pub fn spawn_heartbeat(
    service: Arc<HeartbeatService>,
    target_fn: impl Fn() -> Vec<NodeInfo> + Send + Sync + 'static,
) -> watch::Sender<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        service.run(target_fn, rx).await;
    });
    tx
}
