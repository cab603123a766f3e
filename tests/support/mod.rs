//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use webagent_core::agent::Sleeper;
use webagent_core::{Transport, TransportError, TransportRequest, TransportResponse};

/// One canned response. `fail_after` cuts the body stream with an I/O error
/// after the listed chunks.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub chunks: Vec<Vec<u8>>,
    pub fail_after: bool,
}

impl Scripted {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            fail_after: false,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn chunk(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.chunks.push(bytes.into());
        self
    }

    pub fn interrupted(mut self) -> Self {
        self.fail_after = true;
        self
    }
}

/// Transport that replays scripted responses in order and records requests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let uri = request.uri.clone();
        self.requests.lock().unwrap().push(request);
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::new(404));

        let mut headers = HeaderMap::new();
        for (name, value) in &scripted.headers {
            headers.append(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let mut items: Vec<Result<Vec<u8>, TransportError>> =
            scripted.chunks.into_iter().map(Ok).collect();
        if scripted.fail_after {
            items.push(Err(TransportError::io(
                &uri,
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-body"),
            )));
        }
        Ok(TransportResponse {
            status: scripted.status,
            headers,
            body: Box::pin(stream::iter(items)),
        })
    }
}

/// Sleeper that records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub fn html(body: &str) -> String {
    format!("<html><head><title>t</title></head><body>{body}</body></html>")
}
