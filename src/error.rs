// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Error types shared across the pipeline and the analyses.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Raised once at load time when a configuration entry cannot be used.
///
/// Every variant names the failing entry so the operator can find it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid watch pattern '{pattern}': {source}")]
    InvalidWatchPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid template '{template}' in API '{api}': {reason}")]
    InvalidTemplate {
        api: String,
        template: String,
        reason: String,
    },

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("invalid configuration for plugin '{plugin}': {source}")]
    InvalidPluginConfig {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a bearer token could not yield scopes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no Authorization header")]
    Missing,

    #[error("Authorization scheme is not Bearer")]
    NotBearer,

    #[error("malformed bearer token: {0}")]
    Malformed(String),
}

/// The hook a plugin was running when it faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Request,
    Response,
    Log,
    Stop,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hook::Request => "on_request",
            Hook::Response => "on_response",
            Hook::Log => "on_log",
            Hook::Stop => "on_stop",
        };
        f.write_str(s)
    }
}

/// What went wrong inside a single hook invocation.
#[derive(Debug, Error)]
pub enum FaultCause {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// A fault isolated to one plugin hook. Never fatal to the exchange.
#[derive(Debug, Error)]
#[error("plugin '{plugin}' failed in {hook}: {cause}")]
pub struct HookFault {
    pub plugin: String,
    pub hook: Hook,
    #[source]
    pub cause: FaultCause,
}
