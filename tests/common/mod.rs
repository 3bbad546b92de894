// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;

use dev_proxy::config::Config;
use dev_proxy::exchange::{RequestData, ResponseData};
use dev_proxy::pipeline::{InterceptionPipeline, Upstream};
use dev_proxy::proxy::run_proxy;

/// Unique temp path with the given prefix and extension.
pub fn temp_path(prefix: &str, ext: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{prefix}_{}.{ext}", uuid::Uuid::new_v4()))
}

// Minimal helper: start run_proxy for `pipeline` and wait until it is
// accepting connections.
pub async fn start_proxy_and_wait(
    pipeline: Arc<InterceptionPipeline>,
) -> anyhow::Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    // Choose a free port by binding then dropping
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let handle = tokio::spawn(async move {
        let _ = run_proxy(addr, pipeline).await;
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            return Err(anyhow::anyhow!("timeout waiting for proxy to start"));
        }
        if let Ok(mut s) = tokio::net::TcpStream::connect(addr).await {
            let _ = s.shutdown().await;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    Ok((handle, addr))
}

pub fn pipeline_from_toml(src: &str) -> anyhow::Result<Arc<InterceptionPipeline>> {
    let cfg = Config::from_toml_str(src)?;
    Ok(Arc::new(InterceptionPipeline::from_config(&cfg)?))
}

/// Send one absolute-form HTTP/1.1 request through the proxy and return the
/// status code and body.
pub async fn proxied_get(
    proxy: SocketAddr,
    url: &str,
    headers: &[(&str, &str)],
) -> anyhow::Result<(u16, String)> {
    let uri: hyper::Uri = url.parse()?;
    let host = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .ok_or_else(|| anyhow::anyhow!("url has no authority"))?;

    let mut raw = format!("GET {url} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
    for (k, v) in headers {
        raw.push_str(&format!("{k}: {v}\r\n"));
    }
    raw.push_str("\r\n");

    let mut stream = tokio::net::TcpStream::connect(proxy).await?;
    stream.write_all(raw.as_bytes()).await?;
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf)).await??;

    let text = String::from_utf8_lossy(&buf).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("no status line in {text:?}"))?;
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    Ok((status, body))
}

/// Answers every request with 200 and an empty JSON object.
pub struct JsonUpstream;

#[async_trait]
impl Upstream for JsonUpstream {
    async fn send(&self, _request: &RequestData) -> anyhow::Result<ResponseData> {
        Ok(ResponseData::new(hyper::StatusCode::OK)
            .with_header("content-type", "application/json")
            .with_body("{}"))
    }
}

/// A bearer token whose payload carries `scp`.
pub fn bearer_with_scopes(scp: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"scp":"{scp}"}}"#));
    format!("Bearer e30.{payload}.sig")
}
