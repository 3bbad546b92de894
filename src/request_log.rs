// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Log entries produced for every intercepted exchange.

use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a log entry records. Report writers match on this exhaustively.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntryKind {
    /// The request as it entered the pipeline.
    InterceptedRequest {
        #[serde(
            serialize_with = "crate::serde_helpers::serialize_headers",
            deserialize_with = "crate::serde_helpers::deserialize_headers"
        )]
        headers: HeaderMap,
    },
    /// The final response after all response hooks ran.
    InterceptedResponse { status: u16 },
    /// Outside the watch set; no plugin saw it.
    Skipped,
    /// Informational note from a plugin that acted on the exchange.
    Processed,
    /// A plugin answered with a canned response.
    Mocked { status: u16 },
    /// A plugin injected a failure or degraded the exchange.
    Chaos { status: Option<u16> },
    /// Something looked wrong, including isolated plugin faults.
    Warning,
    /// Advice for the user about how the API is being called.
    Tip,
    /// The network call failed or was cancelled.
    Failed { status: u16 },
}

impl LogEntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            LogEntryKind::InterceptedRequest { .. } => "intercepted_request",
            LogEntryKind::InterceptedResponse { .. } => "intercepted_response",
            LogEntryKind::Skipped => "skipped",
            LogEntryKind::Processed => "processed",
            LogEntryKind::Mocked { .. } => "mocked",
            LogEntryKind::Chaos { .. } => "chaos",
            LogEntryKind::Warning => "warning",
            LogEntryKind::Tip => "tip",
            LogEntryKind::Failed { .. } => "failed",
        }
    }
}

/// One line of the request log, tied to the exchange that produced it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestLogEntry {
    pub exchange_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    /// Plugin that wrote the entry; `None` for entries written by the pipeline.
    pub plugin: Option<String>,
    pub message: String,
    pub kind: LogEntryKind,
}

impl RequestLogEntry {
    pub fn new(
        exchange_id: Uuid,
        method: impl Into<String>,
        url: impl Into<String>,
        kind: LogEntryKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            exchange_id,
            timestamp: Utc::now(),
            method: method.into(),
            url: url.into(),
            plugin: None,
            message: message.into(),
            kind,
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Request headers, present only on `InterceptedRequest` entries.
    pub fn request_headers(&self) -> Option<&HeaderMap> {
        match &self.kind {
            LogEntryKind::InterceptedRequest { headers } => Some(headers),
            _ => None,
        }
    }
}
