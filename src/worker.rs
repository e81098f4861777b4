//! Worker node: accepts tasks from whichever leader currently believes
//! itself active, executes them through the configured engine, and reports
//! the outcome back.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::FleetRegistry;
use crate::engine::{execute, PageExtractor, Summarizer};
use crate::heartbeat::HeartbeatService;
use crate::models::{
    HeartbeatMessage, LeaderChangeMessage, NodeRole, Task, TaskCompletedMessage, TaskFailedMessage,
};

pub struct WorkerState {
    pub worker_id: String,
    pub registry: Arc<FleetRegistry>,
    pub heartbeat: Arc<HeartbeatService>,
    pub http: Client,
    pub extractor: Arc<dyn PageExtractor>,
    pub summarizer: Arc<dyn Summarizer>,
    pub current_leader: Mutex<(String, String, u16)>,
    pub processing_count: std::sync::atomic::AtomicUsize,
    pub completed_count: std::sync::atomic::AtomicUsize,
}

impl WorkerState {
    pub fn new(
        worker_id: impl Into<String>,
        registry: Arc<FleetRegistry>,
        extractor: Arc<dyn PageExtractor>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let worker_id = worker_id.into();
        let primary = registry.primary.clone();
        let heartbeat = Arc::new(HeartbeatService::new(
            worker_id.clone(),
            NodeRole::Worker,
            &registry,
            primary.id.clone(),
            None,
        ));
        WorkerState {
            worker_id,
            registry,
            heartbeat,
            http: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build worker http client"),
            extractor,
            summarizer,
            current_leader: Mutex::new((primary.id, primary.host, primary.port)),
            processing_count: std::sync::atomic::AtomicUsize::new(0),
            completed_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    async fn adopt_leader(&self, leader_id: &str) {
        if let Some(info) = self.registry.node_by_id(leader_id) {
            let mut cur = self.current_leader.lock().await;
            if cur.0 != leader_id {
                info!(from = %cur.0, to = %leader_id, "worker adopting new leader");
            }
            *cur = (info.id.clone(), info.host.clone(), info.port);
        }
    }

    async fn leader_base_url(&self) -> String {
        let cur = self.current_leader.lock().await;
        format!("http://{}:{}", cur.1, cur.2)
    }
}

pub fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/task", post(receive_task))
        .route("/heartbeat", post(receive_heartbeat))
        .route("/election/victory", post(election_victory))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn receive_task(State(state): State<Arc<WorkerState>>, Json(task): Json<Task>) -> impl IntoResponse {
    info!(task_id = %task.task_id, "worker received task");
    state
        .processing_count
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let worker = state.clone();
    tokio::spawn(async move {
        process_task(worker, task).await;
    });

    (StatusCode::OK, Json(TaskAcceptedResponse { status: "accepted" }))
}

#[derive(Serialize)]
struct TaskAcceptedResponse {
    status: &'static str,
}

async fn process_task(state: Arc<WorkerState>, task: Task) {
    let result = execute(&task.payload, state.extractor.as_ref(), state.summarizer.as_ref()).await;

    state
        .processing_count
        .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

    let base = state.leader_base_url().await;

    match result {
        Ok(value) => {
            state
                .completed_count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let body = TaskCompletedMessage { task_id: task.task_id.clone(), result: value };
            let url = format!("{base}/worker/task_completed");
            match state.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = %resp.status(), "leader rejected task completion"),
                Err(e) => warn!(error = %e, "failed to reach leader with task completion"),
            }
        }
        Err(e) => {
            warn!(task_id = %task.task_id, error = %e, "task execution failed");
            let body = TaskFailedMessage { task_id: task.task_id.clone(), error: e.to_string() };
            let url = format!("{base}/worker/task_failed");
            match state.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = %resp.status(), "leader rejected task failure report"),
                Err(e) => warn!(error = %e, "failed to reach leader with task failure report"),
            }
        }
    }
}

async fn receive_heartbeat(
    State(state): State<Arc<WorkerState>>,
    Json(hb): Json<HeartbeatMessage>,
) -> impl IntoResponse {
    state.heartbeat.receive_heartbeat(&hb);
    if let Some(ref leader_id) = hb.leader_id {
        if matches!(hb.role, NodeRole::PrimaryLeader | NodeRole::BackupLeader) {
            state.adopt_leader(leader_id).await;
        }
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn election_victory(
    State(state): State<Arc<WorkerState>>,
    Json(msg): Json<LeaderChangeMessage>,
) -> impl IntoResponse {
    info!(leader_id = %msg.leader_id, "worker acknowledging election victory");
    state.heartbeat.set_current_leader_id(msg.leader_id.clone());
    state.adopt_leader(&msg.leader_id).await;
    (StatusCode::OK, Json(serde_json::json!({"status": "acknowledged"})))
}

#[derive(Serialize)]
struct WorkerHealthResponse {
    status: &'static str,
    worker_id: String,
    tasks_in_progress: usize,
    tasks_completed: usize,
    current_leader: String,
}

async fn health(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let current_leader = state.current_leader.lock().await.0.clone();
    Json(WorkerHealthResponse {
        status: "healthy",
        worker_id: state.worker_id.clone(),
        tasks_in_progress: state
            .processing_count
            .load(std::sync::atomic::Ordering::Relaxed),
        tasks_completed: state
            .completed_count
            .load(std::sync::atomic::Ordering::Relaxed),
        current_leader,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockPageExtractor, MockSummarizer};
    use crate::models::{FleetKind, TaskPayload};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<WorkerState> {
        let registry = Arc::new(FleetRegistry::from_env(FleetKind::Summarizer).unwrap());
        Arc::new(WorkerState::new(
            "worker-1",
            registry,
            Arc::new(MockPageExtractor),
            Arc::new(MockSummarizer),
        ))
    }

    #[tokio::test]
    async fn health_reports_defaults() {
        let app = router(state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn task_is_accepted_immediately() {
        let app = router(state());
        let task = Task::new(TaskPayload::Summarize {
            text: "hello".into(),
            url: None,
            title: None,
            source: None,
        });
        let body = serde_json::to_vec(&task).unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/task")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn election_victory_updates_leader_view() {
        let s = state();
        let app = router(s.clone());
        let msg = LeaderChangeMessage {
            leader_id: "leader-backup-1".to_string(),
        };
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/election/victory")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&msg).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(s.current_leader.lock().await.0, "leader-backup-1");
    }
}
