//! Leader node: public task-submission API, worker dispatch, stall
//! recovery, state replication, and the leader-selection protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::FleetRegistry;
use crate::heartbeat::{HeartbeatService, TaskCounters};
use crate::models::{
    CrawlMultiResponse, CrawlRequest, CrawlResultEntry, FleetKind, HeartbeatMessage,
    LeaderChangeMessage, NodeRole, NodeStatus, SummarizeAcceptedResponse, SummarizeRequest, Task,
    TaskCompletedMessage, TaskFailedMessage, TaskPayload, TaskStatus, result_is_embedded_failure,
};
use crate::state::{ExportedState, StateManager};

pub struct LeaderState {
    pub node_id: String,
    pub registry: Arc<FleetRegistry>,
    pub state: Arc<StateManager>,
    pub heartbeat: Arc<HeartbeatService>,
    pub http: Client,
    is_active: AtomicBool,
    primary_leader_failed: AtomicBool,
    selection_in_progress: AtomicBool,
    last_selection_time: Mutex<Option<std::time::Instant>>,
    worker_assignments: DashMap<String, Vec<String>>,
}

impl LeaderState {
    pub fn new(node_id: impl Into<String>, registry: Arc<FleetRegistry>) -> Arc<Self> {
        let node_id = node_id.into();
        let is_primary = node_id == registry.primary.id;
        let dedupe = registry.policy.dedupe_by_url;

        Arc::new_cyclic(|weak: &std::sync::Weak<LeaderState>| {
            let weak_for_cb = weak.clone();
            let status_cb: crate::heartbeat::StatusCallback = Arc::new(move |peer_id: &str, status: NodeStatus| {
                if let Some(leader) = weak_for_cb.upgrade() {
                    on_peer_status_change(leader, peer_id.to_string(), status);
                }
            });

            let heartbeat = Arc::new(HeartbeatService::new(
                node_id.clone(),
                if is_primary { NodeRole::PrimaryLeader } else { NodeRole::BackupLeader },
                &registry,
                registry.primary.id.clone(),
                Some(status_cb),
            ));
            heartbeat.set_current_leader_id(registry.primary.id.clone());

            LeaderState {
                node_id,
                registry,
                state: Arc::new(StateManager::new(is_primary, dedupe)),
                heartbeat,
                http: Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                    .expect("failed to build leader http client"),
                is_active: AtomicBool::new(is_primary),
                primary_leader_failed: AtomicBool::new(false),
                selection_in_progress: AtomicBool::new(false),
                last_selection_time: Mutex::new(None),
                worker_assignments: DashMap::new(),
            }
        })
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    fn become_leader(&self) {
        self.is_active.store(true, Ordering::SeqCst);
        self.state.become_leader();
        self.heartbeat.set_current_leader_id(self.node_id.clone());
        info!(node_id = %self.node_id, "became active leader");
    }

    fn become_follower(&self) {
        self.is_active.store(false, Ordering::SeqCst);
        self.state.become_follower();
        info!(node_id = %self.node_id, "became follower");
    }

    fn public_path(&self) -> &'static str {
        match self.registry.policy.kind {
            FleetKind::Crawler => "/crawl",
            FleetKind::Summarizer => "/summarize",
        }
    }

    async fn broadcast_leader_change(&self) {
        let targets = self.registry.all_other_nodes(&self.node_id);
        let msg = LeaderChangeMessage {
            leader_id: self.node_id.clone(),
        };
        for node in targets {
            let url = format!("{}/leader-change", node.base_url());
            if let Err(e) = self.http.post(&url).json(&msg).send().await {
                warn!(peer = %node.id, error = %e, "leader-change broadcast failed");
            }
        }
    }

    fn select_worker(&self) -> Option<String> {
        let online: Vec<_> = self
            .registry
            .workers
            .iter()
            .filter(|w| self.heartbeat.is_node_active(&w.id))
            .collect();
        if online.is_empty() {
            return None;
        }
        if self.registry.policy.select_fewest_assignments {
            online
                .iter()
                .min_by_key(|w| self.worker_assignments.get(&w.id).map(|v| v.len()).unwrap_or(0))
                .map(|w| w.id.clone())
        } else {
            online.choose(&mut rand::thread_rng()).map(|w| w.id.clone())
        }
    }

    /// Attempt to dispatch exactly one queued task. No-op if the queue is
    /// empty or no worker is currently online.
    async fn dispatch_one(self: &Arc<Self>) {
        let Some(worker_id) = self.select_worker() else {
            return;
        };
        let Some(task) = self.state.get_next_task() else {
            return;
        };

        if let Err(e) = self.state.assign_task(&task.task_id, &worker_id) {
            warn!(task_id = %task.task_id, error = %e, "failed to record assignment");
            return;
        }
        self.worker_assignments
            .entry(worker_id.clone())
            .or_default()
            .push(task.task_id.clone());

        let Some(worker) = self.registry.worker_by_id(&worker_id) else {
            return;
        };
        let url = format!("{}/task", worker.base_url());
        let sent = self.state.get_task(&task.task_id).unwrap_or(task);
        match self.http.post(&url).json(&sent).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(task_id = %sent.task_id, worker = %worker_id, "dispatched task");
            }
            _ => {
                warn!(task_id = %sent.task_id, worker = %worker_id, "dispatch failed, requeueing");
                remove_assignment(&self.worker_assignments, &worker_id, &sent.task_id);
                let _ = self.state.requeue_task(&sent.task_id);
            }
        }
    }

    async fn check_stalled(&self, threshold: chrono::Duration) {
        for task_id in self.state.stalled_tasks(threshold) {
            if let Some(task) = self.state.get_task(&task_id) {
                if let Some(worker_id) = task.assigned_worker {
                    remove_assignment(&self.worker_assignments, &worker_id, &task_id);
                }
            }
            warn!(task_id = %task_id, "task stalled, requeueing");
            let _ = self.state.requeue_task(&task_id);
        }
    }

    fn refresh_heartbeat_counters(&self) {
        let stats = self.state.stats();
        self.heartbeat.update_task_counters(TaskCounters {
            total: stats.total,
            pending_or_processing: stats.pending + stats.processing,
            completed: stats.completed,
        });
    }

    /// Reassign every task still held by a now-offline worker.
    fn reassign_worker_tasks(&self, worker_id: &str) {
        let task_ids = self
            .worker_assignments
            .remove(worker_id)
            .map(|(_, v)| v)
            .unwrap_or_default();
        for task_id in task_ids {
            if let Some(task) = self.state.get_task(&task_id) {
                if task.status == TaskStatus::Processing {
                    warn!(task_id = %task_id, worker = %worker_id, "worker offline, requeueing task");
                    let _ = self.state.requeue_task(&task_id);
                }
            }
        }
    }
}

fn remove_assignment(map: &DashMap<String, Vec<String>>, worker_id: &str, task_id: &str) {
    if let Some(mut v) = map.get_mut(worker_id) {
        v.retain(|t| t != task_id);
    }
}

fn on_peer_status_change(leader: Arc<LeaderState>, peer_id: String, status: NodeStatus) {
    tokio::spawn(async move {
        let is_primary_peer = peer_id == leader.registry.primary.id;

        if is_primary_peer {
            match status {
                NodeStatus::Offline => {
                    leader.primary_leader_failed.store(true, Ordering::SeqCst);
                    maybe_start_election(leader.clone()).await;
                }
                _ => {
                    leader.primary_leader_failed.store(false, Ordering::SeqCst);
                }
            }
            return;
        }

        if leader.is_active() && matches!(status, NodeStatus::Offline) {
            if leader.registry.worker_by_id(&peer_id).is_some() {
                leader.reassign_worker_tasks(&peer_id);
            }
        }
    });
}

/// Arm the randomised-delay election timer if the cooldown/backoff
/// conditions allow it. The timer's purpose is solely to de-synchronise
/// observation timing between backups; the priority rule below resolves
/// the actual outcome once it fires.
async fn maybe_start_election(leader: Arc<LeaderState>) {
    if leader.is_active() {
        return;
    }
    if leader.selection_in_progress.swap(true, Ordering::SeqCst) {
        return;
    }

    {
        let mut last = leader.last_selection_time.lock().await;
        if let Some(t) = *last {
            if t.elapsed() < leader.registry.timing.election_cooldown {
                leader.selection_in_progress.store(false, Ordering::SeqCst);
                return;
            }
        }
        *last = Some(std::time::Instant::now());
    }

    tokio::spawn(async move {
        let (min, max) = (
            leader.registry.timing.election_delay_min.as_millis() as u64,
            leader.registry.timing.election_delay_max.as_millis() as u64,
        );
        let delay_ms = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        run_selection(leader).await;
    });
}

async fn run_selection(leader: Arc<LeaderState>) {
    let primary_id = &leader.registry.primary.id;
    if leader.heartbeat.is_node_active(primary_id) {
        leader.primary_leader_failed.store(false, Ordering::SeqCst);
        leader.selection_in_progress.store(false, Ordering::SeqCst);
        return;
    }

    let backup1 = leader.registry.backups.first();
    let backup1_alive = backup1.map(|b| leader.heartbeat.is_node_active(&b.id) || b.id == leader.node_id).unwrap_or(false);

    let wins = match backup1 {
        Some(b1) if b1.id == leader.node_id => true,
        _ => !backup1_alive,
    };

    if wins {
        leader.become_leader();
        leader.broadcast_leader_change().await;
    }

    leader.selection_in_progress.store(false, Ordering::SeqCst);
}

pub fn router(state: Arc<LeaderState>) -> Router {
    let public_path = state.public_path();
    Router::new()
        .route(public_path, post(submit_task))
        .route("/task/{id}", get(get_task_status))
        .route("/tasks", get(list_tasks))
        .route("/state", get(get_state))
        .route("/heartbeat", post(receive_heartbeat))
        .route("/worker/task_completed", post(task_completed))
        .route("/worker/task_failed", post(task_failed))
        .route("/leader-change", post(leader_change))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn submit_task(State(state): State<Arc<LeaderState>>, body: axum::body::Bytes) -> Response {
    if !state.is_active() {
        return redirect_or_unavailable(&state, state.public_path());
    }

    let task_ids: Vec<String> = match state.registry.policy.kind {
        FleetKind::Crawler => {
            let req: CrawlRequest = match serde_json::from_slice(&body) {
                Ok(r) => r,
                Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            };
            req.urls
                .into_iter()
                .map(|url| {
                    let task = Task::new(TaskPayload::Crawl {
                        url,
                        max_depth: req.max_depth,
                        timeout: req.timeout,
                        formats: req.formats.clone(),
                    });
                    state.state.add_task(task)
                })
                .collect()
        }
        FleetKind::Summarizer => {
            let req: SummarizeRequest = match serde_json::from_slice(&body) {
                Ok(r) => r,
                Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            };
            let task = Task::new(TaskPayload::Summarize {
                text: req.text,
                url: req.url,
                title: req.title,
                source: req.source,
            });
            vec![state.state.add_task(task)]
        }
    };

    for _ in &task_ids {
        state.dispatch_one().await;
    }

    match state.registry.policy.kind {
        FleetKind::Summarizer => {
            Json(SummarizeAcceptedResponse {
                task_id: task_ids[0].clone(),
                status: "processing",
            })
            .into_response()
        }
        FleetKind::Crawler => {
            let deadline = tokio::time::Instant::now() + state.registry.timing.client_wait_deadline;
            loop {
                let all_terminal = task_ids
                    .iter()
                    .filter_map(|id| state.state.get_task(id))
                    .all(|t| t.is_terminal());
                if all_terminal || tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let results = task_ids
                .iter()
                .map(|id| {
                    let task = state.state.get_task(id);
                    crawl_result_entry(task)
                })
                .collect();

            Json(CrawlMultiResponse {
                results,
                timestamp: Utc::now(),
            })
            .into_response()
        }
    }
}

fn crawl_result_entry(task: Option<Task>) -> CrawlResultEntry {
    match task {
        Some(t) if t.status == TaskStatus::Completed => {
            let r = t.result.unwrap_or_default();
            CrawlResultEntry {
                markdown: r.get("markdown").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                summary: r.get("summary").and_then(|v| v.as_str()).map(|s| s.to_string()),
                url: t.url().unwrap_or_default().to_string(),
                timestamp: Utc::now(),
                map: r
                    .get("map")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|x| x.as_str().map(|s| s.to_string())).collect())
                    .unwrap_or_default(),
            }
        }
        Some(t) => CrawlResultEntry {
            markdown: String::new(),
            summary: None,
            url: t.url().unwrap_or_default().to_string(),
            timestamp: Utc::now(),
            map: vec![],
        },
        None => CrawlResultEntry {
            markdown: String::new(),
            summary: None,
            url: String::new(),
            timestamp: Utc::now(),
            map: vec![],
        },
    }
}

fn redirect_or_unavailable(state: &LeaderState, path: &str) -> Response {
    let believed_leader_id = state.heartbeat.current_leader_id();
    if believed_leader_id == state.node_id {
        return (StatusCode::SERVICE_UNAVAILABLE, "no active leader known").into_response();
    }
    match state.registry.node_by_id(&believed_leader_id) {
        Some(leader) => {
            let location = format!("{}{}", leader.base_url(), path);
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "no active leader known").into_response(),
    }
}

async fn get_task_status(State(state): State<Arc<LeaderState>>, Path(id): Path<String>) -> Response {
    match state.state.get_task(&id) {
        Some(task) => Json(task).into_response(),
        None => (StatusCode::NOT_FOUND, "task not found").into_response(),
    }
}

async fn list_tasks(State(state): State<Arc<LeaderState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "tasks": state.state.all_tasks() }))
}

async fn get_state(State(state): State<Arc<LeaderState>>) -> Response {
    if !state.is_active() {
        return (StatusCode::FORBIDDEN, "not the active leader").into_response();
    }
    Json(state.state.export_state()).into_response()
}

async fn receive_heartbeat(
    State(state): State<Arc<LeaderState>>,
    Json(hb): Json<HeartbeatMessage>,
) -> impl IntoResponse {
    state.heartbeat.receive_heartbeat(&hb);
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn task_completed(
    State(state): State<Arc<LeaderState>>,
    Json(msg): Json<TaskCompletedMessage>,
) -> Response {
    if result_is_embedded_failure(&msg.result) {
        let error = msg
            .result
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return finish_task(&state, &msg.task_id, TaskStatus::Failed, Some(serde_json::json!({"error": error}))).await;
    }

    finish_task(&state, &msg.task_id, TaskStatus::Completed, Some(msg.result)).await
}

async fn task_failed(
    State(state): State<Arc<LeaderState>>,
    Json(msg): Json<TaskFailedMessage>,
) -> Response {
    finish_task(&state, &msg.task_id, TaskStatus::Failed, Some(serde_json::json!({"error": msg.error}))).await
}

async fn finish_task(
    state: &Arc<LeaderState>,
    task_id: &str,
    status: TaskStatus,
    result: Option<serde_json::Value>,
) -> Response {
    let worker_id = state.state.get_task(task_id).and_then(|t| t.assigned_worker);
    match state.state.update_task(task_id, status, result) {
        Ok(()) => {
            if let Some(w) = worker_id {
                remove_assignment(&state.worker_assignments, &w, task_id);
            }
            (StatusCode::OK, Json(serde_json::json!({"status": "acknowledged"}))).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "task not found").into_response(),
    }
}

async fn leader_change(
    State(state): State<Arc<LeaderState>>,
    Json(msg): Json<LeaderChangeMessage>,
) -> impl IntoResponse {
    let previous = state.heartbeat.current_leader_id();
    state.heartbeat.set_current_leader_id(msg.leader_id.clone());
    if msg.leader_id == state.node_id {
        state.become_leader();
    } else {
        state.become_follower();
    }
    Json(serde_json::json!({"status": "acknowledged", "previous_leader": previous}))
}

#[derive(Serialize)]
struct LeaderHealthResponse {
    status: &'static str,
    node_id: String,
    is_active_leader: bool,
    current_leader: String,
    active_peers: Vec<String>,
    failed_peers: Vec<String>,
    tasks_total: usize,
    tasks_pending: usize,
    tasks_processing: usize,
    tasks_completed: usize,
    tasks_failed: usize,
}

async fn health(State(state): State<Arc<LeaderState>>) -> impl IntoResponse {
    let stats = state.state.stats();
    Json(LeaderHealthResponse {
        status: "healthy",
        node_id: state.node_id.clone(),
        is_active_leader: state.is_active(),
        current_leader: state.heartbeat.current_leader_id(),
        active_peers: state.heartbeat.active_nodes(),
        failed_peers: state.heartbeat.failed_nodes(),
        tasks_total: stats.total,
        tasks_pending: stats.pending,
        tasks_processing: stats.processing,
        tasks_completed: stats.completed,
        tasks_failed: stats.failed,
    })
}

/// Runs forever: on the active leader, dispatch/stall/heartbeat-stat duties
/// once per second; on a follower, pull-replicate from the believed leader
/// every 5 seconds (10s backoff on failure). Whichever role this node holds
/// at each tick determines which half runs; the other half is a no-op.
pub async fn run_background_loop(state: Arc<LeaderState>) {
    let mut follower_next_attempt = tokio::time::Instant::now();
    loop {
        if state.is_active() {
            state.dispatch_one().await;
            state.check_stalled(state.registry.timing.stall_threshold).await;
            state.refresh_heartbeat_counters();
            tokio::time::sleep(Duration::from_secs(1)).await;
        } else {
            if tokio::time::Instant::now() < follower_next_attempt {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
            match sync_with_believed_leader(&state).await {
                Ok(()) => {
                    follower_next_attempt = tokio::time::Instant::now() + Duration::from_secs(5);
                }
                Err(e) => {
                    warn!(error = %e, "state sync failed, backing off");
                    follower_next_attempt = tokio::time::Instant::now() + Duration::from_secs(10);
                }
            }
        }
    }
}

async fn sync_with_believed_leader(state: &Arc<LeaderState>) -> Result<(), String> {
    let leader_id = state.heartbeat.current_leader_id();
    let leader = state
        .registry
        .node_by_id(&leader_id)
        .ok_or_else(|| format!("unknown leader id {leader_id}"))?;
    let url = format!("{}/state", leader.base_url());
    let resp = state.http.get(&url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("leader responded {}", resp.status()));
    }
    let exported: ExportedState = resp.json().await.map_err(|e| e.to_string())?;
    match state.state.import_state(exported) {
        Ok(()) | Err(crate::state::StateError::StaleVersion { .. }) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn registry(kind: FleetKind) -> Arc<FleetRegistry> {
        Arc::new(FleetRegistry::from_env(kind).unwrap())
    }

    #[tokio::test]
    async fn primary_boots_active_backups_boot_follower() {
        let reg = registry(FleetKind::Summarizer);
        let primary = LeaderState::new("leader-primary", reg.clone());
        let backup = LeaderState::new("leader-backup-1", reg);
        assert!(primary.is_active());
        assert!(!backup.is_active());
    }

    #[tokio::test]
    async fn follower_redirects_to_known_leader() {
        let reg = registry(FleetKind::Crawler);
        let backup = LeaderState::new("leader-backup-1", reg);
        let app = router(backup);
        let req = CrawlRequest {
            urls: vec!["https://example.com".into()],
            max_depth: 2,
            timeout: 30,
            formats: vec!["markdown".into()],
        };
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/crawl")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&req).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.contains("/crawl"));
    }

    #[tokio::test]
    async fn state_endpoint_forbidden_on_follower() {
        let reg = registry(FleetKind::Summarizer);
        let backup = LeaderState::new("leader-backup-1", reg);
        let app = router(backup);
        let resp = app
            .oneshot(Request::builder().uri("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn summarize_returns_processing_immediately() {
        let reg = registry(FleetKind::Summarizer);
        let primary = LeaderState::new("leader-primary", reg);
        let app = router(primary);
        let req = SummarizeRequest {
            text: "hello".into(),
            url: None,
            title: None,
            source: None,
        };
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/summarize")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&req).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn worker_offline_reassigns_its_tasks() {
        let reg = registry(FleetKind::Summarizer);
        let leader = LeaderState::new("leader-primary", reg);
        let task = Task::new(TaskPayload::Summarize {
            text: "x".into(),
            url: None,
            title: None,
            source: None,
        });
        let id = leader.state.add_task(task);
        leader.state.get_next_task();
        leader.state.assign_task(&id, "worker-1").unwrap();
        leader.worker_assignments.entry("worker-1".to_string()).or_default().push(id.clone());

        leader.reassign_worker_tasks("worker-1");

        let t = leader.state.get_task(&id).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.assigned_worker.is_none());
        assert!(leader.worker_assignments.get("worker-1").is_none());
    }

    /// Drives `run_selection` directly against a peer table manipulated via
    /// the test-only `mark_failed_for_test` hook, rather than waiting out
    /// the real missed-beat hysteresis window.
    #[tokio::test]
    async fn run_selection_promotes_backup1_when_primary_is_down() {
        let reg = registry(FleetKind::Summarizer);
        let backup1 = LeaderState::new("leader-backup-1", reg);
        backup1.heartbeat.mark_failed_for_test("leader-primary");

        run_selection(backup1.clone()).await;

        assert!(backup1.is_active(), "backup-1 must win once the primary is down");
    }

    #[tokio::test]
    async fn run_selection_leaves_backup2_passive_while_backup1_is_alive() {
        let reg = registry(FleetKind::Summarizer);
        let backup2 = LeaderState::new("leader-backup-2", reg);
        backup2.heartbeat.mark_failed_for_test("leader-primary");

        run_selection(backup2.clone()).await;

        assert!(!backup2.is_active(), "backup-2 must defer while backup-1 is still reachable");
    }

    #[tokio::test]
    async fn run_selection_promotes_backup2_when_backup1_is_also_down() {
        let reg = registry(FleetKind::Summarizer);
        let backup2 = LeaderState::new("leader-backup-2", reg);
        backup2.heartbeat.mark_failed_for_test("leader-primary");
        backup2.heartbeat.mark_failed_for_test("leader-backup-1");

        run_selection(backup2.clone()).await;

        assert!(backup2.is_active(), "backup-2 must win when both primary and backup-1 are down");
    }

    #[tokio::test]
    async fn run_selection_is_a_no_op_when_primary_is_reachable() {
        let reg = registry(FleetKind::Summarizer);
        let backup1 = LeaderState::new("leader-backup-1", reg);

        run_selection(backup1.clone()).await;

        assert!(!backup1.is_active(), "no election should occur while the primary is reachable");
    }
}
