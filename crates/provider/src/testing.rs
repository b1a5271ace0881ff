//! Scripted control plane for tests
//!
//! [`FakeApi`] answers calls from per-path responders and records every
//! call in order. Paths without a responder answer `true` to POSTs and
//! not-found to GETs, so tests only script what they care about.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use driftless_common::{ClientConfig, Error, Result};

use crate::client::{Api, ApiClient, Method, Params};

/// One canned reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Body(String),
    Fail(String),
    Missing,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Body(value.to_string())
    }

    fn into_result(self, path: &str, params: &Params) -> Result<String> {
        match self {
            Reply::Body(body) => Ok(body),
            Reply::Fail(message) => Err(Error::remote(path, message)),
            Reply::Missing => Err(Error::NotFound {
                kind: path.to_string(),
                id: params
                    .as_slice()
                    .first()
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
            }),
        }
    }
}

type Responder = Box<dyn FnMut(&Params) -> Reply + Send>;

/// A call as seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub params: Params,
}

#[derive(Default)]
struct FakeState {
    responders: HashMap<String, Responder>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this fake in an [`Api`] with default config.
    pub fn api(self: &Arc<Self>) -> Api {
        Api::new(self.clone(), &ClientConfig::default())
    }

    pub fn on(&self, path: &str, responder: impl FnMut(&Params) -> Reply + Send + 'static) -> &Self {
        self.state
            .lock()
            .responders
            .insert(path.to_string(), Box::new(responder));
        self
    }

    pub fn ok(&self, path: &str, body: impl Into<String>) -> &Self {
        let body = body.into();
        self.on(path, move |_| Reply::Body(body.clone()))
    }

    pub fn json(&self, path: &str, value: serde_json::Value) -> &Self {
        self.ok(path, value.to_string())
    }

    pub fn fail(&self, path: &str, message: impl Into<String>) -> &Self {
        let message = message.into();
        self.on(path, move |_| Reply::Fail(message.clone()))
    }

    pub fn missing(&self, path: &str) -> &Self {
        self.on(path, |_| Reply::Missing)
    }

    /// Successive replies; the last one repeats.
    pub fn sequence(&self, path: &str, replies: Vec<Reply>) -> &Self {
        let mut queue: VecDeque<Reply> = replies.into();
        self.on(path, move |_| {
            if queue.len() > 1 {
                queue.pop_front().unwrap_or(Reply::Missing)
            } else {
                queue.front().cloned().unwrap_or(Reply::Missing)
            }
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|c| c.path.clone()).collect()
    }

    /// Paths of POST calls, in order
    pub fn mutations(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == Method::Post)
            .map(|c| c.path.clone())
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.path == path).count()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Params> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.path == path)
            .map(|c| c.params.clone())
            .collect()
    }
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn call(&self, method: Method, path: &str, params: &Params) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method,
            path: path.to_string(),
            params: params.clone(),
        });
        let reply = match state.responders.get_mut(path) {
            Some(responder) => responder(params),
            None if method == Method::Post => Reply::Body("true".to_string()),
            None => Reply::Missing,
        };
        reply.into_result(path, params)
    }
}
