// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! One intercepted request/response pair as it moves through the pipeline.

use crate::request_log::{LogEntryKind, RequestLogEntry};
use crate::state::SessionState;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Request half of an exchange. Plugins may rewrite any field.
#[derive(Debug, Clone)]
pub struct RequestData {
    pub method: Method,
    /// Absolute URI, exactly as received.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestData {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response half of an exchange, real or synthetic.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseData {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header, ignoring names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                self.headers.append(n, v);
            }
            _ => {
                tracing::debug!(%name, "dropping invalid synthetic response header");
            }
        }
        self
    }
}

/// Lifecycle of an exchange. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExchangePhase {
    Created,
    RequestPhase,
    MockShortCircuit,
    NetworkPhase,
    ResponsePhase,
    Logged,
    Released,
}

/// An exchange with its session map and the entries it has produced so far.
#[derive(Debug)]
pub struct Exchange {
    id: Uuid,
    started: Instant,
    request: RequestData,
    response: Option<ResponseData>,
    short_circuited: bool,
    session: SessionState,
    trail: Vec<ExchangePhase>,
    entries: Vec<RequestLogEntry>,
}

impl Exchange {
    pub fn new(request: RequestData) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            request,
            response: None,
            short_circuited: false,
            session: SessionState::new(),
            trail: vec![ExchangePhase::Created],
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn request(&self) -> &RequestData {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestData {
        &mut self.request
    }

    pub fn response(&self) -> Option<&ResponseData> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseData> {
        self.response.as_mut()
    }

    /// Answer the exchange with a synthetic response.
    ///
    /// During the request phase this short-circuits: remaining request hooks
    /// and the network call are skipped. Later it simply replaces the response.
    pub fn respond(&mut self, response: ResponseData) {
        if self.phase() <= ExchangePhase::RequestPhase {
            self.short_circuited = true;
        }
        self.response = Some(response);
    }

    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn phase(&self) -> ExchangePhase {
        *self.trail.last().unwrap_or(&ExchangePhase::Created)
    }

    /// Every phase the exchange has entered, in order.
    pub fn trail(&self) -> &[ExchangePhase] {
        &self.trail
    }

    pub(crate) fn enter(&mut self, phase: ExchangePhase) {
        if phase <= self.phase() {
            tracing::debug!(exchange = %self.id, ?phase, current = ?self.phase(), "ignoring backwards phase transition");
            return;
        }
        tracing::trace!(exchange = %self.id, ?phase, "phase");
        self.trail.push(phase);
    }

    pub(crate) fn set_upstream_response(&mut self, response: ResponseData) {
        self.response = Some(response);
    }

    /// Queue a log entry for this exchange; flushed when the exchange is logged.
    pub fn log(&mut self, kind: LogEntryKind, plugin: Option<&str>, message: impl Into<String>) {
        let mut entry = RequestLogEntry::new(
            self.id,
            self.request.method.as_str(),
            self.request.url.clone(),
            kind,
            message,
        );
        if let Some(p) = plugin {
            entry = entry.with_plugin(p);
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RequestLogEntry] {
        &self.entries
    }

    pub(crate) fn take_entries(&mut self) -> Vec<RequestLogEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Consume the exchange, dropping its session map, and hand back the response.
    pub(crate) fn release(mut self) -> (Vec<ExchangePhase>, Option<ResponseData>) {
        self.enter(ExchangePhase::Released);
        (self.trail, self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> Exchange {
        Exchange::new(RequestData::new(
            Method::GET,
            "https://api.contoso.com/users",
        ))
    }

    #[test]
    fn respond_during_request_phase_short_circuits() {
        let mut ex = exchange();
        ex.enter(ExchangePhase::RequestPhase);
        ex.respond(ResponseData::new(StatusCode::TOO_MANY_REQUESTS));
        assert!(ex.is_short_circuited());
        assert_eq!(
            ex.response().map(|r| r.status),
            Some(StatusCode::TOO_MANY_REQUESTS)
        );
    }

    #[test]
    fn respond_during_response_phase_only_replaces() {
        let mut ex = exchange();
        ex.enter(ExchangePhase::RequestPhase);
        ex.enter(ExchangePhase::NetworkPhase);
        ex.set_upstream_response(ResponseData::new(StatusCode::OK));
        ex.enter(ExchangePhase::ResponsePhase);
        ex.respond(ResponseData::new(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!ex.is_short_circuited());
        assert_eq!(
            ex.response().map(|r| r.status),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn phases_only_move_forward() {
        let mut ex = exchange();
        ex.enter(ExchangePhase::ResponsePhase);
        ex.enter(ExchangePhase::RequestPhase);
        assert_eq!(ex.phase(), ExchangePhase::ResponsePhase);
        assert_eq!(
            ex.trail(),
            &[ExchangePhase::Created, ExchangePhase::ResponsePhase]
        );
    }

    #[test]
    fn log_entries_reference_the_exchange() {
        let mut ex = exchange();
        ex.log(LogEntryKind::Warning, Some("TestPlugin"), "careful");
        let entries = ex.take_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].exchange_id, ex.id());
        assert_eq!(entries[0].plugin.as_deref(), Some("TestPlugin"));
        assert_eq!(entries[0].method, "GET");
        assert!(ex.entries().is_empty());
    }

    #[test]
    fn release_ends_the_trail() {
        let mut ex = exchange();
        ex.session_mut().set("k", serde_json::json!(1));
        ex.enter(ExchangePhase::Logged);
        let (trail, response) = ex.release();
        assert_eq!(trail.last(), Some(&ExchangePhase::Released));
        assert!(response.is_none());
    }

    #[test]
    fn synthetic_headers_skip_invalid_input() {
        let r = ResponseData::new(StatusCode::OK)
            .with_header("content-type", "application/json")
            .with_header("bad header", "x");
        assert_eq!(r.headers.len(), 1);
    }
}
