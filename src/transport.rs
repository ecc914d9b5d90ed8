use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::errors::{Error, Result};

#[cfg(test)]
pub mod mock;

const ERROR_SNIPPET_LENGTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends a request and returns the response body. Non-success statuses are
/// [`crate::errors::ErrorKind::Network`] errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<String>;
}

/// [`Transport`] over a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<String> {
        debug!(method = request.method.as_str(), url = request.url.as_str(); "Sending request");
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header("Content-Type", "text/xml").body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }

        let snippet: String = body.chars().take(ERROR_SNIPPET_LENGTH).collect();
        Err(Error::network(format!("{} {}: HTTP {status}: {snippet}", request.method.as_str(), request.url)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::errors::ErrorKind;

    fn content_length(head: &str) -> usize {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Answers a single request on a loopback port and hands back the raw request text.
    async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_string();
                    if request.len() >= end + 4 + content_length(&head) {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(request).unwrap()
        });
        (format!("http://{addr}"), server)
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn success_returns_body() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", "<osm/>".to_string()).await;

        let body = transport().send(HttpRequest::get(format!("{base}/api/capabilities"))).await.unwrap();
        assert_eq!(body, "<osm/>");
        assert!(server.await.unwrap().starts_with("GET /api/capabilities HTTP/1.1"));
    }

    #[tokio::test]
    async fn error_status_is_a_network_error_with_snippet() {
        let body = format!("database offline{}", "x".repeat(400));
        let (base, server) = serve_once("HTTP/1.1 500 Internal Server Error", body).await;

        let err = transport().send(HttpRequest::get(format!("{base}/api/0.6/map"))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.message.contains("500"));
        assert!(err.message.contains("database offline"));
        assert!(!err.message.contains(&"x".repeat(ERROR_SNIPPET_LENGTH)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn request_body_is_sent_as_xml_with_headers() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", "42".to_string()).await;
        let request = HttpRequest {
            method: Method::Put,
            url: format!("{base}/api/0.6/changeset/create"),
            headers: vec![("Authorization".to_string(), "OAuth x=\"1\"".to_string())],
            body: Some("<osm><changeset/></osm>".to_string()),
        };

        assert_eq!(transport().send(request).await.unwrap(), "42");
        let raw = server.await.unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(raw.starts_with("PUT /api/0.6/changeset/create HTTP/1.1"));
        assert!(lower.contains("content-type: text/xml"));
        assert!(lower.contains("authorization: oauth x=\"1\""));
        assert!(raw.ends_with("<osm><changeset/></osm>"));
    }
}
