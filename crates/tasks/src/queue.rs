//! Priority task queue

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::Path;
use tracing::{debug, info};

use omnigate_eventlog::EventLogger;

use crate::{ActionRequest, Result};

/// A queued action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Lower runs first
    pub priority: i64,
    /// Insertion counter, breaks priority ties
    pub seq: u64,
    pub request: ActionRequest,
}

impl Eq for Task {}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// On-disk form of the queue
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStore {
    pub version: u32,
    pub next_seq: u64,
    /// Tasks in run order
    pub tasks: Vec<Task>,
}

/// Min-priority queue of action requests
#[derive(Debug)]
pub struct TaskQueue {
    heap: BinaryHeap<Reverse<Task>>,
    next_seq: u64,
    logger: EventLogger,
}

impl TaskQueue {
    pub fn new(logger: &EventLogger) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            logger: logger.clone(),
        }
    }

    /// Queue `request`; returns its sequence number
    pub fn add_task(&mut self, request: ActionRequest, priority: i64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.logger.log(
            "add_task",
            json!({
                "action": request.kind.as_str(),
                "priority": priority,
                "params": request.params,
            }),
        );
        self.heap.push(Reverse(Task {
            priority,
            seq,
            request,
        }));
        seq
    }

    /// Pop the lowest-priority task
    pub fn next_task(&mut self) -> Option<Task> {
        let Reverse(task) = self.heap.pop()?;
        self.logger.log(
            "next_task",
            json!({
                "action": task.request.kind.as_str(),
                "priority": task.priority,
                "seq": task.seq,
            }),
        );
        Some(task)
    }

    pub fn has_tasks(&self) -> bool {
        !self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued tasks in run order
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.heap.iter().map(|r| r.0.clone()).collect();
        tasks.sort();
        tasks
    }

    pub fn to_store(&self) -> QueueStore {
        QueueStore {
            version: 1,
            next_seq: self.next_seq,
            tasks: self.snapshot(),
        }
    }

    /// Write the queue to `path` as JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = self.to_store();
        let content = serde_json::to_string_pretty(&store)?;
        tokio::fs::write(path, content).await?;
        debug!("saved {} queued tasks", store.tasks.len());
        Ok(())
    }

    /// Replace the queue with the contents of `path`; a missing file is an
    /// empty queue
    pub async fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let store: QueueStore = serde_json::from_str(&content)?;

        let max_seq = store.tasks.iter().map(|t| t.seq + 1).max().unwrap_or(0);
        self.next_seq = store.next_seq.max(max_seq);
        self.heap = store.tasks.into_iter().map(Reverse).collect();
        info!("loaded {} queued tasks", self.heap.len());
        Ok(())
    }
}
