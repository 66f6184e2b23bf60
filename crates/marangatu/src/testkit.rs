//! Test doubles shared by unit tests.

use crate::error::TransportError;
use crate::notify::Notifier;
use crate::transport::{Method, PortalRequest, RequestBody, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Records every message it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, title: &str, message: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        !self.fail
    }
}

/// A request as seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

/// Answers requests from a queue of `(url substring, body)` pairs.
///
/// Each request consumes the first queued reply whose substring occurs in
/// the request URL. Unmatched requests fail like a dropped connection.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<(String, String)>>,
    log: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, url_part: &str, body: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back((url_part.to_string(), body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, req: PortalRequest) -> Result<String, TransportError> {
        let body = match &req.body {
            RequestBody::None => None,
            RequestBody::Json(json) => Some(json.clone()),
            RequestBody::Form(fields) => Some(
                fields
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&"),
            ),
        };
        self.log.lock().unwrap().push(Recorded {
            method: req.method,
            url: req.url.clone(),
            body,
        });

        let mut replies = self.replies.lock().unwrap();
        let position = replies.iter().position(|(part, _)| req.url.contains(part));
        match position.and_then(|i| replies.remove(i)) {
            Some((_, body)) => Ok(body),
            None => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("no scripted reply for {}", req.url),
            ))),
        }
    }
}
