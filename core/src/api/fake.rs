//! In-memory [`ControlApi`] used by unit and integration tests.
//!
//! Every operation answers with a plausible default. Individual operations can
//! be scripted with a queue of replies; the last reply of a queue repeats.
//! All calls are recorded so tests can assert on ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::operations::{self as ops, Operation};
use super::{ApiError, ControlApi, Response};

/// A recorded control API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub params: Vec<(String, String)>,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

enum Reply {
    Json(Value),
    Unreachable,
}

#[derive(Default)]
pub struct FakeApi {
    scripted: Mutex<HashMap<Operation, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    next_user: AtomicUsize,
    report: Mutex<Vec<u8>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues replies for `operation`. The last one keeps answering.
    pub fn script(&self, operation: Operation, replies: impl IntoIterator<Item = Value>) -> &Self {
        let queue = replies.into_iter().map(Reply::Json);
        self.lock_scripted().entry(operation).or_default().extend(queue);
        self
    }

    /// Makes `operation` reply with a daemon-side error code.
    pub fn reject(&self, operation: Operation, code: &str, message: &str) -> &Self {
        self.script(operation, [json!({"code": code, "message": message})])
    }

    /// Makes `operation` fail as if the daemon were not listening.
    pub fn unreachable(&self, operation: Operation) -> &Self {
        self.lock_scripted()
            .entry(operation)
            .or_default()
            .push_back(Reply::Unreachable);
        self
    }

    pub fn set_report(&self, report: &[u8]) {
        *self.report.lock().unwrap_or_else(|e| e.into_inner()) = report.to_vec();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded operations in call order.
    pub fn operations(&self) -> Vec<Operation> {
        self.calls().into_iter().map(|c| c.operation).collect()
    }

    pub fn calls_to(&self, operation: Operation) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .collect()
    }

    fn lock_scripted(&self) -> std::sync::MutexGuard<'_, HashMap<Operation, VecDeque<Reply>>> {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, operation: Operation) -> Reply {
        let mut scripted = self.lock_scripted();
        match scripted.get_mut(&operation) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Unreachable),
            Some(queue) => match queue.front() {
                Some(Reply::Json(v)) => Reply::Json(v.clone()),
                Some(Reply::Unreachable) => Reply::Unreachable,
                None => Reply::Json(self.default_reply(operation)),
            },
            None => Reply::Json(self.default_reply(operation)),
        }
    }

    fn default_reply(&self, operation: Operation) -> Value {
        match operation {
            ops::VERSION => json!({"version": "2.16.0"}),
            ops::NEW_CONTEXT => json!({"contextId": "1"}),
            ops::NEW_USER => {
                let id = self.next_user.fetch_add(1, Ordering::Relaxed);
                json!({"userId": id.to_string()})
            }
            ops::SPIDER_SCAN | ops::ACTIVE_SCAN => json!({"scan": "0"}),
            ops::SPIDER_SCAN_AS_USER | ops::ACTIVE_SCAN_AS_USER => json!({"scanAsUser": "1"}),
            ops::SPIDER_STATUS | ops::ACTIVE_SCAN_STATUS => json!({"status": "100"}),
            ops::PASSIVE_RECORDS_TO_SCAN => json!({"recordsToScan": "0"}),
            ops::SPIDER_ADDED_NODES => json!({"addedNodes": ["http://x/", "http://x/a"]}),
            _ => json!({"Result": "OK"}),
        }
    }

    fn record(&self, operation: Operation, params: &[(&str, &str)]) {
        let call = Call {
            operation,
            params: params
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        };
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl ControlApi for FakeApi {
    async fn call(
        &self,
        operation: Operation,
        params: &[(&str, &str)],
    ) -> Result<Response, ApiError> {
        self.record(operation, params);
        match self.next_reply(operation) {
            Reply::Json(Value::Object(map)) => Ok(map),
            Reply::Json(_) => Err(ApiError::Decode { operation }),
            Reply::Unreachable => Err(ApiError::Transport {
                operation,
                source: Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
            }),
        }
    }

    async fn fetch(&self, operation: Operation) -> Result<Vec<u8>, ApiError> {
        self.record(operation, &[]);
        if let Reply::Unreachable = self.next_reply(operation) {
            return Err(ApiError::Transport {
                operation,
                source: Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
            });
        }
        Ok(self.report.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
