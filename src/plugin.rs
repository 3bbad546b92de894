// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! The plugin capability interface and the fault isolation around it.

use crate::error::{FaultCause, Hook, HookFault};
use crate::exchange::Exchange;
use crate::report::{Report, ReportSet};
use crate::request_log::{LogEntryKind, RequestLogEntry};
use crate::state::GlobalState;
use crate::watch::UrlWatchMatcher;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A pipeline participant. Every hook is optional.
///
/// Hooks take `&self`: one plugin instance serves all concurrent exchanges,
/// so any mutable plugin state needs its own synchronization.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the network call. Call `ctx.exchange.respond(..)` to
    /// short-circuit.
    async fn on_request(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once a response exists, real or synthetic.
    async fn on_response(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Sees every log entry as it is published.
    async fn on_log(&self, _entry: &RequestLogEntry, _global: &GlobalState) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once when a recording stops, with the frozen log.
    async fn on_stop(&self, _ctx: &mut StopContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What a request or response hook can reach.
pub struct HookContext<'a> {
    pub exchange: &'a mut Exchange,
    pub global: &'a GlobalState,
    pub cancel: &'a CancellationToken,
    plugin: &'a str,
}

impl<'a> HookContext<'a> {
    pub fn new(
        exchange: &'a mut Exchange,
        global: &'a GlobalState,
        cancel: &'a CancellationToken,
        plugin: &'a str,
    ) -> Self {
        Self {
            exchange,
            global,
            cancel,
            plugin,
        }
    }

    /// Log an entry attributed to the running plugin.
    pub fn log(&mut self, kind: LogEntryKind, message: impl Into<String>) {
        self.exchange.log(kind, Some(self.plugin), message);
    }
}

/// What a stop hook can reach.
pub struct StopContext<'a> {
    pub log: &'a [RequestLogEntry],
    pub global: &'a GlobalState,
    pub cancel: &'a CancellationToken,
    reports: &'a mut ReportSet,
}

impl<'a> StopContext<'a> {
    pub fn new(
        log: &'a [RequestLogEntry],
        global: &'a GlobalState,
        cancel: &'a CancellationToken,
        reports: &'a mut ReportSet,
    ) -> Self {
        Self {
            log,
            global,
            cancel,
            reports,
        }
    }

    pub fn add_report(&mut self, name: impl Into<String>, report: Report) -> bool {
        self.reports.add(name, report)
    }
}

/// A configured plugin together with its optional URL filter.
#[derive(Clone)]
pub struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    watch: Option<UrlWatchMatcher>,
}

impl RegisteredPlugin {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            plugin,
            watch: None,
        }
    }

    /// Restrict the plugin to URLs matching its own patterns.
    pub fn with_watch(mut self, watch: UrlWatchMatcher) -> Self {
        self.watch = Some(watch);
        self
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn applies_to(&self, url: &str) -> bool {
        self.watch
            .as_ref()
            .map(|w| w.matches(url, false))
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("name", &self.name())
            .field("watch", &self.watch)
            .finish()
    }
}

/// Runs a single hook with panic capture, a deadline, and cancellation.
#[derive(Debug, Clone)]
pub struct HookRunner {
    hook_timeout: Duration,
    stop_timeout: Duration,
    cancel: CancellationToken,
}

impl HookRunner {
    pub fn new(hook_timeout: Duration, stop_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            hook_timeout,
            stop_timeout,
            cancel,
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Await `fut`, turning every way it can go wrong into a `HookFault`.
    pub async fn run<F>(&self, plugin: &str, hook: Hook, fut: F) -> Result<(), HookFault>
    where
        F: Future<Output = anyhow::Result<()>> + Send,
    {
        let limit = match hook {
            Hook::Stop => self.stop_timeout,
            _ => self.hook_timeout,
        };
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let cause = tokio::select! {
            _ = self.cancel.cancelled() => Some(FaultCause::Cancelled),
            res = tokio::time::timeout(limit, guarded) => match res {
                Err(_) => Some(FaultCause::TimedOut(limit)),
                Ok(Err(panic)) => Some(FaultCause::Panicked(panic_message(panic.as_ref()))),
                Ok(Ok(Err(e))) => Some(FaultCause::Failed(e)),
                Ok(Ok(Ok(()))) => None,
            },
        };

        match cause {
            None => Ok(()),
            Some(cause) => {
                let fault = HookFault {
                    plugin: plugin.to_string(),
                    hook,
                    cause,
                };
                tracing::warn!(plugin = %fault.plugin, hook = %fault.hook, error = %fault.cause, "plugin hook failed");
                Err(fault)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
