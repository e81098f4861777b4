//! In-memory task table, dispatch queue, and completed-URL dedup set.
//!
//! A single node-wide lock guards the table and queue together so that
//! `add_task`/`get_next_task`/`import_state` observe a consistent view;
//! independent-key maps elsewhere (heartbeat peers, worker assignments) use
//! `dashmap` instead since their access pattern is per-key, not whole-table.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Task, TaskStatus};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("rejected import: incoming version {incoming} is not newer than local {local}")]
    StaleVersion { incoming: u64, local: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedState {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub completed_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

struct Inner {
    is_leader: bool,
    tasks: HashMap<String, Task>,
    completed_urls: std::collections::HashSet<String>,
    queue: VecDeque<String>,
    version: u64,
}

pub struct StateManager {
    dedupe_by_url: bool,
    inner: Mutex<Inner>,
}

impl StateManager {
    pub fn new(is_leader: bool, dedupe_by_url: bool) -> Self {
        StateManager {
            dedupe_by_url,
            inner: Mutex::new(Inner {
                is_leader,
                tasks: HashMap::new(),
                completed_urls: std::collections::HashSet::new(),
                queue: VecDeque::new(),
                version: 0,
            }),
        }
    }

    /// Insert a task, short-circuiting to the existing completed task's id
    /// if its URL already completed under a dedup-enabled fleet. The
    /// short-circuit branch performs no mutation, so it does not bump the
    /// version counter (matching the reference implementation: a no-op
    /// insert is not a state change).
    pub fn add_task(&self, task: Task) -> String {
        let mut inner = self.inner.lock().unwrap();

        if self.dedupe_by_url {
            if let Some(url) = task.url() {
                if inner.completed_urls.contains(url) {
                    if let Some(existing) = inner
                        .tasks
                        .values()
                        .find(|t| t.url() == Some(url) && t.status == TaskStatus::Completed)
                    {
                        return existing.task_id.clone();
                    }
                }
            }
        }

        let id = task.task_id.clone();
        let is_leader = inner.is_leader;
        inner.tasks.insert(id.clone(), task);
        if is_leader {
            inner.queue.push_back(id.clone());
        }
        inner.version += 1;
        id
    }

    /// Pop the next pending task and mark it processing. Leader-only; a
    /// follower's queue is always empty since it never inserts into it.
    pub fn get_next_task(&self) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.queue.pop_front()?;
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Processing;
                task.updated_at = Utc::now();
                let out = task.clone();
                inner.version += 1;
                Some(out)
            }
            None => {
                tracing::error!(task_id = %id, "queued task id missing from table");
                None
            }
        }
    }

    pub fn update_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        let url = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| StateError::TaskNotFound(task_id.to_string()))?;
            task.status = status;
            task.updated_at = Utc::now();
            if let Some(r) = result {
                task.result = Some(r);
            }
            task.url().map(|s| s.to_string())
        };
        if matches!(status, TaskStatus::Completed) {
            if let Some(url) = url {
                inner.completed_urls.insert(url);
            }
        }
        inner.version += 1;
        Ok(())
    }

    pub fn assign_task(&self, task_id: &str, worker_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateError::TaskNotFound(task_id.to_string()))?;
        task.assigned_worker = Some(worker_id.to_string());
        task.status = TaskStatus::Processing;
        task.updated_at = Utc::now();
        inner.version += 1;
        Ok(())
    }

    /// Reset a task to pending, drop its worker assignment, and put it
    /// back at the tail of the dispatch queue. Used by both worker-failure
    /// reassignment and stall recovery.
    pub fn requeue_task(&self, task_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| StateError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::Pending;
            task.assigned_worker = None;
            task.updated_at = Utc::now();
        }
        inner.queue.push_back(task_id.to_string());
        inner.version += 1;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(task_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.inner.lock().unwrap().tasks.values().cloned().collect()
    }

    /// Tasks still `processing` with `updated_at` older than `threshold`
    /// ago, for the stall detector.
    pub fn stalled_tasks(&self, threshold: chrono::Duration) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Processing && now - t.updated_at > threshold)
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let inner = self.inner.lock().unwrap();
        let mut s = TaskStats::default();
        s.total = inner.tasks.len();
        for t in inner.tasks.values() {
            match t.status {
                TaskStatus::Pending => s.pending += 1,
                TaskStatus::Processing => s.processing += 1,
                TaskStatus::Completed => s.completed += 1,
                TaskStatus::Failed => s.failed += 1,
            }
        }
        s
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    pub fn export_state(&self) -> ExportedState {
        let inner = self.inner.lock().unwrap();
        ExportedState {
            version: inner.version,
            timestamp: Utc::now(),
            tasks: inner.tasks.values().cloned().collect(),
            completed_urls: inner.completed_urls.iter().cloned().collect(),
        }
    }

    /// Replace the whole table atomically. Rejects a stale or
    /// non-strictly-increasing version. Rebuilds the dispatch queue from
    /// pending tasks if this node is currently the leader.
    pub fn import_state(&self, state: ExportedState) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        if state.version <= inner.version {
            return Err(StateError::StaleVersion {
                incoming: state.version,
                local: inner.version,
            });
        }

        inner.version = state.version;
        inner.tasks = state.tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        inner.completed_urls = state.completed_urls.into_iter().collect();

        if inner.is_leader {
            rebuild_queue(&mut inner);
        }
        Ok(())
    }

    pub fn become_leader(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_leader {
            inner.is_leader = true;
            rebuild_queue(&mut inner);
        }
    }

    pub fn become_follower(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.is_leader = false;
    }

    pub fn is_leader(&self) -> bool {
        self.inner.lock().unwrap().is_leader
    }
}

fn rebuild_queue(inner: &mut Inner) {
    inner.queue.clear();
    for (id, task) in inner.tasks.iter() {
        if task.status == TaskStatus::Pending {
            inner.queue.push_back(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPayload;

    fn crawl_task(url: &str) -> Task {
        Task::new(TaskPayload::Crawl {
            url: url.to_string(),
            max_depth: 2,
            timeout: 30,
            formats: vec!["markdown".into()],
        })
    }

    #[test]
    fn version_increases_on_mutation() {
        let sm = StateManager::new(true, false);
        let t = crawl_task("https://a.example");
        let id = sm.add_task(t);
        assert_eq!(sm.version(), 1);
        sm.assign_task(&id, "worker-1").unwrap();
        assert_eq!(sm.version(), 2);
        sm.update_task(&id, TaskStatus::Completed, None).unwrap();
        assert_eq!(sm.version(), 3);
    }

    #[test]
    fn dedup_short_circuit_does_not_bump_version_or_grow_table() {
        let sm = StateManager::new(true, true);
        let id1 = sm.add_task(crawl_task("https://dup.example"));
        sm.update_task(&id1, TaskStatus::Completed, None).unwrap();
        let version_before = sm.version();
        let table_size_before = sm.all_tasks().len();

        let id2 = sm.add_task(crawl_task("https://dup.example"));
        assert_eq!(id1, id2);
        assert_eq!(sm.version(), version_before);
        assert_eq!(sm.all_tasks().len(), table_size_before);
    }

    #[test]
    fn processing_implies_assigned_worker() {
        let sm = StateManager::new(true, false);
        let id = sm.add_task(crawl_task("https://x.example"));
        let dequeued = sm.get_next_task().unwrap();
        assert_eq!(dequeued.task_id, id);
        sm.assign_task(&id, "worker-1").unwrap();
        let t = sm.get_task(&id).unwrap();
        assert_eq!(t.status, TaskStatus::Processing);
        assert_eq!(t.assigned_worker.as_deref(), Some("worker-1"));
    }

    #[test]
    fn requeue_clears_assignment_and_reenters_queue() {
        let sm = StateManager::new(true, false);
        let id = sm.add_task(crawl_task("https://y.example"));
        sm.get_next_task().unwrap();
        sm.assign_task(&id, "worker-1").unwrap();

        sm.requeue_task(&id).unwrap();
        let t = sm.get_task(&id).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.assigned_worker.is_none());

        let next = sm.get_next_task().unwrap();
        assert_eq!(next.task_id, id);
    }

    #[test]
    fn export_import_round_trip_is_identity_modulo_timestamp() {
        let sm = StateManager::new(true, false);
        sm.add_task(crawl_task("https://z.example"));
        let exported = sm.export_state();

        let sm2 = StateManager::new(true, false);
        sm2.import_state(ExportedState {
            version: exported.version,
            timestamp: exported.timestamp,
            tasks: exported.tasks.clone(),
            completed_urls: exported.completed_urls.clone(),
        })
        .unwrap();

        assert_eq!(sm2.version(), exported.version);
        assert_eq!(sm2.all_tasks().len(), exported.tasks.len());
    }

    #[test]
    fn import_rejects_non_increasing_version() {
        let sm = StateManager::new(false, false);
        sm.add_task(crawl_task("https://a.example"));
        let exported = sm.export_state();

        let result = sm.import_state(ExportedState {
            version: exported.version,
            timestamp: exported.timestamp,
            tasks: vec![],
            completed_urls: vec![],
        });
        assert!(matches!(result, Err(StateError::StaleVersion { .. })));
    }

    #[test]
    fn become_leader_rebuilds_queue_from_pending_tasks() {
        let sm = StateManager::new(false, false);
        sm.add_task(crawl_task("https://a.example"));
        assert!(sm.get_next_task().is_none(), "follower should not dispatch");

        sm.become_leader();
        let t = sm.get_next_task();
        assert!(t.is_some());
    }

    #[test]
    fn stall_detection_respects_threshold() {
        let sm = StateManager::new(true, false);
        let id = sm.add_task(crawl_task("https://a.example"));
        sm.get_next_task().unwrap();
        sm.assign_task(&id, "worker-1").unwrap();

        assert!(sm.stalled_tasks(chrono::Duration::seconds(60)).is_empty());
        assert_eq!(
            sm.stalled_tasks(chrono::Duration::seconds(-1)),
            vec![id],
            "a negative threshold should treat every processing task as stalled"
        );
    }
}
