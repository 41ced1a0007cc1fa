//! Localhost endpoint that installs allow rules from a block page.
//!
//! `GET /allow-rule?rule=<R>&returnTo=<U>` installs `@@<R>` into the
//! exception store and sends the user back with a 303. The listener binds
//! an ephemeral port on 127.0.0.1 only; block pages link to it.

use std::sync::Arc;
use std::time::Duration;

use http::{header, Method, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::rewrite::{full_body, Body};

const MAX_RULE_LEN: usize = 2048;
const MAX_RETURN_TO_LEN: usize = 4096;
const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Where installed allow rules go; implemented by the engine.
pub trait RuleSink: Send + Sync + 'static {
    fn add_allow_rule(&self, rule: &str) -> Result<(), crate::filters::network::FilterParseError>;
}

#[derive(Debug, Error)]
pub enum AllowServerError {
    #[error("listen: {0}")]
    Listen(#[from] std::io::Error),
}

pub struct AllowRuleServer {
    port: u16,
    accept_task: JoinHandle<()>,
}

impl AllowRuleServer {
    /// Binds `127.0.0.1:0` and starts serving in the background.
    pub async fn bind(sink: Arc<dyn RuleSink>) -> Result<AllowRuleServer, AllowServerError> {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        info!(port, "allow-rule endpoint listening");

        let accept_task = tokio::spawn(accept_loop(listener, sink));
        Ok(AllowRuleServer { port, accept_task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for AllowRuleServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(listener: TcpListener, sink: Arc<dyn RuleSink>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "allow-rule accept failed");
                continue;
            }
        };
        debug!(%peer, "allow-rule connection");

        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let service = service_fn(move |req: http::Request<Incoming>| {
                let sink = Arc::clone(&sink);
                async move { Ok::<_, std::convert::Infallible>(handle(req, sink.as_ref())) }
            });
            let result = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(IO_TIMEOUT)
                .serve_connection(TokioIo::new(stream), service)
                .await;
            if let Err(err) = result {
                debug!(error = %err, "allow-rule connection error");
            }
        });
    }
}

fn handle(req: http::Request<Incoming>, sink: &dyn RuleSink) -> Response<Body> {
    if req.uri().path() != "/allow-rule" {
        return plain(StatusCode::NOT_FOUND, "not found");
    }

    if req.method() == Method::GET {
        handle_allow(&req, sink)
    } else if req.method() == Method::OPTIONS {
        no_cache(Response::builder().status(StatusCode::NO_CONTENT))
            .body(crate::rewrite::empty_body())
            .unwrap()
    } else {
        let mut res = plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        res.headers_mut()
            .insert(header::ALLOW, header::HeaderValue::from_static("GET, OPTIONS"));
        res
    }
}

fn handle_allow(req: &http::Request<Incoming>, sink: &dyn RuleSink) -> Response<Body> {
    let query = req.uri().query().unwrap_or("");
    let mut rule = None;
    let mut return_to = None;
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "rule" => rule = Some(value.into_owned()),
            "returnTo" => return_to = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(rule) = rule.filter(|r| !r.is_empty()) else {
        return plain(StatusCode::BAD_REQUEST, "missing rule");
    };
    let Some(return_to) = return_to.filter(|r| !r.is_empty()) else {
        return plain(StatusCode::BAD_REQUEST, "missing returnTo");
    };
    if rule.len() > MAX_RULE_LEN {
        return plain(StatusCode::BAD_REQUEST, "rule too long");
    }
    if return_to.len() > MAX_RETURN_TO_LEN {
        return plain(StatusCode::BAD_REQUEST, "return url too long");
    }
    match Url::parse(&return_to) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => return plain(StatusCode::BAD_REQUEST, "invalid returnTo url"),
    }

    if let Err(err) = sink.add_allow_rule(&format!("@@{}", rule)) {
        warn!(error = %err, rule = %rule, "failed to install allow rule");
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "rule rejected");
    }
    info!(rule = %rule, "allow rule installed");

    let builder = no_cache(Response::builder().status(StatusCode::SEE_OTHER));
    match builder
        .header(header::LOCATION, &return_to)
        .body(crate::rewrite::empty_body())
    {
        Ok(res) => res,
        Err(_) => plain(StatusCode::BAD_REQUEST, "invalid returnTo url"),
    }
}

fn no_cache(builder: http::response::Builder) -> http::response::Builder {
    builder
        .header(
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        )
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
}

fn plain(status: StatusCode, message: &str) -> Response<Body> {
    no_cache(Response::builder().status(status))
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(message.to_string()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct RecordingSink {
        rules: Mutex<Vec<String>>,
    }

    impl RuleSink for RecordingSink {
        fn add_allow_rule(
            &self,
            rule: &str,
        ) -> Result<(), crate::filters::network::FilterParseError> {
            self.rules.lock().push(rule.to_string());
            Ok(())
        }
    }

    async fn roundtrip(server: &AllowRuleServer, request: &str) -> String {
        let mut stream =
            tokio::net::TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn get(path_and_query: &str) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
            path_and_query
        )
    }

    #[tokio::test]
    async fn installs_rule_and_redirects_back() {
        let sink = Arc::new(RecordingSink::default());
        let server = AllowRuleServer::bind(sink.clone()).await.unwrap();

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("rule", "||ads.example.com^$third-party")
            .append_pair("returnTo", "https://news.test/")
            .finish();
        let response = roundtrip(&server, &get(&format!("/allow-rule?{}", query))).await;

        assert!(response.starts_with("HTTP/1.1 303"), "{}", response);
        assert!(response.contains("location: https://news.test/")
            || response.contains("Location: https://news.test/"));
        assert!(response.to_ascii_lowercase().contains("cache-control: no-store"));
        assert_eq!(
            sink.rules.lock().as_slice(),
            ["@@||ads.example.com^$third-party"]
        );
    }

    #[tokio::test]
    async fn rejects_missing_and_oversized_parameters() {
        let sink = Arc::new(RecordingSink::default());
        let server = AllowRuleServer::bind(sink.clone()).await.unwrap();

        let response = roundtrip(&server, &get("/allow-rule?returnTo=https://a.test/")).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

        let response = roundtrip(&server, &get("/allow-rule?rule=x")).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

        let long_rule = "x".repeat(MAX_RULE_LEN + 1);
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("rule", &long_rule)
            .append_pair("returnTo", "https://a.test/")
            .finish();
        let response = roundtrip(&server, &get(&format!("/allow-rule?{}", query))).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

        assert!(sink.rules.lock().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_http_return_targets() {
        let sink = Arc::new(RecordingSink::default());
        let server = AllowRuleServer::bind(sink.clone()).await.unwrap();

        for bad in ["javascript:alert(1)", "/relative/path", "ftp://files.test/"] {
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("rule", "||ads.example.com^")
                .append_pair("returnTo", bad)
                .finish();
            let response = roundtrip(&server, &get(&format!("/allow-rule?{}", query))).await;
            assert!(response.starts_with("HTTP/1.1 400"), "{}: {}", bad, response);
        }
        assert!(sink.rules.lock().is_empty());
    }

    #[tokio::test]
    async fn options_and_other_methods() {
        let sink = Arc::new(RecordingSink::default());
        let server = AllowRuleServer::bind(sink).await.unwrap();

        let response = roundtrip(
            &server,
            "OPTIONS /allow-rule HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204"), "{}", response);

        let response = roundtrip(
            &server,
            "POST /allow-rule HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"), "{}", response);
        assert!(response.to_ascii_lowercase().contains("allow: get, options"));
    }
}
