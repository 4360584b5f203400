//! In-process doubles for the external collaborators, used by tests across
//! the workspace.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::data_model::GuidelinePassage;
use crate::error::ServiceError;
use crate::services::{ReasoningRequest, ReasoningService, RetrievalService};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reasoning double answering per task from a script.
///
/// Each task has a queue of outcomes; the last one is repeated once the
/// queue is down to a single entry.
#[derive(Default)]
pub struct ScriptedReasoning {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<Value, ServiceError>>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, task: &'static str, value: Value) -> Self {
        lock(&self.scripts).entry(task).or_default().push_back(Ok(value));
        self
    }

    pub fn fail_once(self, task: &'static str, err: ServiceError) -> Self {
        lock(&self.scripts).entry(task).or_default().push_back(Err(err));
        self
    }

    /// Number of calls made for `task`.
    pub fn calls(&self, task: &str) -> usize {
        lock(&self.requests).iter().filter(|r| r.task == task).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn complete(&self, request: &ReasoningRequest) -> Result<Value, ServiceError> {
        lock(&self.requests).push(request.clone());

        let mut scripts = lock(&self.scripts);
        let queue = scripts
            .get_mut(request.task)
            .ok_or_else(|| ServiceError::Other(format!("no scripted response for {}", request.task)))?;
        let outcome = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        outcome.unwrap_or_else(|| Err(ServiceError::Other(format!("script for {} is empty", request.task))))
    }
}

/// Retrieval double returning a fixed passage list (or a fixed error).
pub struct StaticRetrieval {
    outcome: Result<Vec<GuidelinePassage>, ServiceError>,
    calls: AtomicUsize,
    queries: Mutex<Vec<(String, usize)>>,
}

impl StaticRetrieval {
    pub fn new(passages: Vec<GuidelinePassage>) -> Self {
        Self {
            outcome: Ok(passages),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: ServiceError) -> Self {
        Self {
            outcome: Err(err),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received, with the requested result count.
    pub fn queries(&self) -> Vec<(String, usize)> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl RetrievalService for StaticRetrieval {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<GuidelinePassage>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.queries).push((query.to_string(), k));
        self.outcome
            .clone()
            .map(|passages| passages.into_iter().take(k).collect())
    }
}
