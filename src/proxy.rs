// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Plain HTTP forward proxy feeding every request through the interception
//! pipeline.

use crate::exchange::{RequestData, ResponseData};
use crate::pipeline::{InterceptionPipeline, Upstream};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{service::service_fn, Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

// RFC 7230 Section 6.1: Hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests over plain HTTP with a pooled hyper client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: LegacyClient<HttpConnector, Full<Bytes>>,
}

impl HyperUpstream {
    pub fn new() -> Self {
        Self {
            client: LegacyClient::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HyperUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperUpstream").finish_non_exhaustive()
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, request: &RequestData) -> anyhow::Result<ResponseData> {
        let uri: Uri = request.url.parse()?;
        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        let upstream_req = builder.body(Full::new(request.body.clone()))?;

        let resp = self.client.request(upstream_req).await?;
        let status = resp.status();
        let mut headers = resp.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = resp.into_body().collect().await?.to_bytes();
        Ok(ResponseData {
            status,
            headers,
            body,
        })
    }
}

struct Shared {
    pipeline: Arc<InterceptionPipeline>,
    upstream: Arc<dyn Upstream>,
}

pub async fn run_proxy(listen: SocketAddr, pipeline: Arc<InterceptionPipeline>) -> anyhow::Result<()> {
    run_proxy_with_limit(listen, pipeline, Arc::new(HyperUpstream::new()), None).await
}

/// Testable variant of `run_proxy` with a custom upstream and an optional
/// `accept_limit`. With `Some(n)` the loop returns after accepting the Nth
/// connection; handlers already spawned keep running.
pub async fn run_proxy_with_limit(
    listen: SocketAddr,
    pipeline: Arc<InterceptionPipeline>,
    upstream: Arc<dyn Upstream>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let shared = Arc::new(Shared { pipeline, upstream });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "listening");

    let server_builder = AutoConnBuilder::new(TokioExecutor::new());

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;
        if let Some(ref mut n) = remaining {
            *n -= 1;
        }
        debug!(%remote_addr, "accepted connection");

        let shared = shared.clone();
        let builder = server_builder.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let shared = shared.clone();
                let fut: ServiceFuture = Box::pin(async move { handle_request(req, shared).await });
                fut
            });
            if let Err(e) = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                error!(%e, %remote_addr, "connection error");
            }
        });
    }
    Ok(())
}

fn text_response(status: StatusCode, body: &'static str) -> Response<BoxBody<Bytes, Infallible>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())).boxed());
    *resp.status_mut() = status;
    resp
}

async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.method() == Method::CONNECT {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT not supported (plain HTTP proxy)",
        ));
    }

    let url = absolute_url(&req);
    let method = req.method().clone();
    let mut headers = req.headers().clone();
    strip_hop_by_hop(&mut headers);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!(%url, error = %boxed, "failed to collect request body");
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "request body collect error",
            ));
        }
    };

    let mut request = RequestData::new(method, url);
    request.headers = headers;
    request.body = body;

    let outcome = shared.pipeline.process(request, shared.upstream.as_ref()).await;
    Ok(into_hyper_response(outcome.response))
}

/// Proxy clients send absolute URIs; origin-form requests get one rebuilt
/// from the Host header.
fn absolute_url<B>(req: &Request<B>) -> String {
    if req.uri().scheme().is_some() {
        return req.uri().to_string();
    }
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{host}{path}")
}

fn into_hyper_response(mut data: ResponseData) -> Response<BoxBody<Bytes, Infallible>> {
    strip_hop_by_hop(&mut data.headers);
    // The body may have been replaced by a plugin; hyper sets the length.
    data.headers.remove(hyper::header::CONTENT_LENGTH);

    let mut resp = Response::new(Full::new(data.body).boxed());
    *resp.status_mut() = data.status;
    *resp.headers_mut() = data.headers;
    resp
}

// Parse a Connection header value into a lowercased set of tokens
fn parse_connection_tokens(val: Option<&HeaderValue>) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(conn_str) = val.and_then(|v| v.to_str().ok()) {
        for token in conn_str.split(',') {
            let trimmed = token.trim().to_ascii_lowercase();
            if !trimmed.is_empty() {
                set.insert(trimmed);
            }
        }
    }
    set
}

fn is_hop_by_hop_header(name: &str, connection_hop_headers: &HashSet<String>) -> bool {
    connection_hop_headers.contains(name) || HOP_BY_HOP_HEADERS.contains(&name)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed = parse_connection_tokens(headers.get(hyper::header::CONNECTION));
    let doomed: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str(), &listed))
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::PipelineSettings;
    use crate::request_log::LogEntryKind;
    use crate::test_helpers::StaticUpstream;
    use crate::watch::UrlWatchMatcher;
    use rstest::rstest;
    use std::sync::atomic::Ordering;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn shared_with(pipeline: InterceptionPipeline, upstream: Arc<dyn Upstream>) -> Arc<Shared> {
        Arc::new(Shared {
            pipeline: Arc::new(pipeline),
            upstream,
        })
    }

    fn watching(patterns: &[&str]) -> anyhow::Result<InterceptionPipeline> {
        Ok(InterceptionPipeline::new(
            UrlWatchMatcher::compile(patterns)?,
            Vec::new(),
            PipelineSettings::default(),
        ))
    }

    fn make_request(
        method: &str,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> anyhow::Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder().method(method).uri(uri.as_ref());
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        Ok(builder.body(Full::new(Bytes::new()))?)
    }

    async fn body_string(resp: Response<BoxBody<Bytes, Infallible>>) -> anyhow::Result<String> {
        let bytes = resp.into_body().collect().await?.to_bytes();
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn forwards_watched_request_and_records_it() -> anyhow::Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock)
            .await;

        let pattern = format!("{}/*", mock.uri());
        let pipeline = watching(&[pattern.as_str()])?;
        pipeline.start_recording();
        let shared = shared_with(pipeline, Arc::new(HyperUpstream::new()));

        let req = make_request("GET", format!("{}/users", mock.uri()), &[])?;
        let resp = handle_request(req, shared.clone()).await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await?, "ok");

        let stopped = shared.pipeline.stop_recording().await.expect("stopped");
        let kinds: Vec<&str> = stopped.log.iter().map(|e| e.kind.label()).collect();
        assert_eq!(kinds, vec!["intercepted_request", "intercepted_response"]);
        Ok(())
    }

    #[tokio::test]
    async fn mocked_request_never_reaches_upstream() -> anyhow::Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock)
            .await;

        let cfg = Config::from_toml_str(&format!(
            r#"
urls_to_watch = ["{uri}/*"]

[[plugins]]
name = "MockResponsePlugin"
config = {{ mocks = [{{ url = "{uri}/users/*", status = 201, body = "mocked" }}] }}
"#,
            uri = mock.uri()
        ))?;
        let shared = shared_with(
            InterceptionPipeline::from_config(&cfg)?,
            Arc::new(HyperUpstream::new()),
        );

        let req = make_request("GET", format!("{}/users/7", mock.uri()), &[])?;
        let resp = handle_request(req, shared).await?;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(body_string(resp).await?, "mocked");
        Ok(())
    }

    #[tokio::test]
    async fn upstream_error_returns_502() -> anyhow::Result<()> {
        let pipeline = watching(&["*"])?;
        pipeline.start_recording();
        let shared = shared_with(pipeline, Arc::new(HyperUpstream::new()));

        // Port 9 (discard) is typically closed on test hosts.
        let req = make_request("GET", "http://127.0.0.1:9/", &[])?;
        let resp = handle_request(req, shared.clone()).await?;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let stopped = shared.pipeline.stop_recording().await.expect("stopped");
        assert!(stopped
            .log
            .iter()
            .any(|e| e.kind == LogEntryKind::Failed { status: 502 }));
        Ok(())
    }

    #[tokio::test]
    async fn relative_uri_is_rebuilt_from_host() -> anyhow::Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rel"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let host = mock.uri().trim_start_matches("http://").to_string();
        let shared = shared_with(watching(&[])?, Arc::new(HyperUpstream::new()));
        let req = make_request("GET", "/rel", &[("host", host.as_str())])?;
        let resp = handle_request(req, shared).await?;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn hop_by_hop_headers_are_dropped_both_ways() -> anyhow::Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ok")
                    .insert_header("connection", "keep-alive, foo")
                    .insert_header("foo", "bar")
                    .insert_header("x-kept", "yes"),
            )
            .mount(&mock)
            .await;

        let shared = shared_with(watching(&[])?, Arc::new(HyperUpstream::new()));
        let req = make_request(
            "GET",
            format!("{}/hop", mock.uri()),
            &[
                ("connection", "x-secret"),
                ("x-secret", "1"),
                ("proxy-authorization", "Basic abc"),
                ("x-app", "demo"),
            ],
        )?;
        let resp = handle_request(req, shared).await?;

        assert!(resp.headers().get("connection").is_none());
        assert!(resp.headers().get("foo").is_none());
        assert_eq!(
            resp.headers().get("x-kept").and_then(|v| v.to_str().ok()),
            Some("yes")
        );

        let received = mock.received_requests().await.expect("recording enabled");
        let sent = &received[0];
        assert!(sent.headers.get("x-secret").is_none());
        assert!(sent.headers.get("proxy-authorization").is_none());
        assert!(sent.headers.get("x-app").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn connect_is_refused() -> anyhow::Result<()> {
        let upstream = Arc::new(StaticUpstream::ok("never"));
        let shared = shared_with(watching(&["*"])?, upstream.clone());
        let req = make_request("CONNECT", "example.com:443", &[])?;
        let resp = handle_request(req, shared).await?;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn plugin_body_rewrite_gets_a_fresh_length() -> anyhow::Result<()> {
        let mut upstream = StaticUpstream::ok("short");
        upstream.response = upstream.response.with_header("content-length", "5");
        let shared = shared_with(watching(&[])?, Arc::new(upstream));

        let resp = handle_request(make_request("GET", "http://a.test/", &[])?, shared).await?;
        assert!(resp.headers().get("content-length").is_none());
        assert_eq!(body_string(resp).await?, "short");
        Ok(())
    }

    #[rstest]
    #[case("keep-alive, Foo ,", &["keep-alive", "foo"])]
    #[case(" , ,a,b", &["a", "b"])]
    #[case("", &[])]
    fn connection_tokens(#[case] value: &'static str, #[case] expected: &[&str]) {
        let parsed = parse_connection_tokens(Some(&HeaderValue::from_static(value)));
        assert_eq!(parsed.len(), expected.len());
        for token in expected {
            assert!(parsed.contains(*token));
        }
    }

    #[tokio::test]
    async fn run_proxy_with_limit_accepts_zero_and_returns_immediately() -> anyhow::Result<()> {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = l.local_addr()?;
        drop(l);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run_proxy_with_limit(
                addr,
                Arc::new(watching(&[])?),
                Arc::new(StaticUpstream::ok("")),
                Some(0),
            ),
        )
        .await??;
        Ok(())
    }

    #[tokio::test]
    async fn run_proxy_bind_fails_when_port_taken() -> anyhow::Result<()> {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = l.local_addr()?;
        let res = run_proxy(addr, Arc::new(watching(&[])?)).await;
        assert!(res.is_err());
        drop(l);
        Ok(())
    }
}
