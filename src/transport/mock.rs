//! Scripted [`Transport`] for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{HttpRequest, Method, Transport};
use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Status(u16),
    /// Never answers; models a request that stays in flight.
    Hang,
}

struct Rule {
    method: Method,
    url_contains: String,
    reply: Reply,
}

/// Records every request and answers from the most recently added matching
/// rule, falling back to an empty `<osm/>` document.
pub struct MockTransport {
    rules: Mutex<Vec<Rule>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            rules: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, method: Method, url_contains: &str, reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            method,
            url_contains: url_contains.to_string(),
            reply,
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, url_contains: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.contains(url_contains))
            .count()
    }

    fn reply_for(&self, request: &HttpRequest) -> Reply {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|rule| rule.method == request.method && request.url.contains(&rule.url_contains))
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| Reply::Body("<osm/>".to_string()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<String> {
        let reply = self.reply_for(&request);
        self.requests.lock().unwrap().push(request);
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(Error::network(format!("HTTP {status}"))),
            Reply::Hang => futures::future::pending().await,
        }
    }
}
