// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Recording sessions: the window during which log entries are accumulated
//! for batch analysis when the recording stops.
//!
//! Stopping is the single linearization point. It waits (bounded) for
//! in-flight exchanges to publish their entries, freezes the log, and then
//! runs every plugin's stop hook once, in order, against the frozen log.
//! Entries arriving after the freeze are dropped and counted.

use crate::error::{Hook, HookFault};
use crate::plugin::{HookRunner, RegisteredPlugin, StopContext};
use crate::report::ReportSet;
use crate::request_log::RequestLogEntry;
use crate::state::GlobalState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Idle,
    Recording,
    Stopped,
}

#[derive(Debug)]
struct Inner {
    status: RecordingStatus,
    stopping: bool,
    entries: Vec<RequestLogEntry>,
    frozen: Option<Arc<[RequestLogEntry]>>,
    late_entries: usize,
}

/// Result of stopping a recording.
#[derive(Debug)]
pub struct StoppedRecording {
    pub log: Arc<[RequestLogEntry]>,
    pub reports: ReportSet,
    pub faults: Vec<HookFault>,
    /// False when the drain deadline passed with exchanges still in flight.
    pub drained: bool,
}

#[derive(Debug)]
pub struct RecordingSession {
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: RecordingStatus::Idle,
                stopping: false,
                entries: Vec::new(),
                frozen: None,
                late_entries: 0,
            }),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("RecordingSession lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn status(&self) -> RecordingStatus {
        self.lock().status
    }

    /// Begin recording, discarding whatever a previous session held.
    pub fn start(&self) {
        let mut inner = self.lock();
        if inner.status == RecordingStatus::Recording {
            tracing::warn!(
                discarded = inner.entries.len(),
                "recording restarted, discarding entries"
            );
        }
        inner.status = RecordingStatus::Recording;
        inner.stopping = false;
        inner.entries.clear();
        inner.frozen = None;
        inner.late_entries = 0;
        tracing::info!("recording started");
    }

    /// Append entries in order. Returns how many were kept.
    pub fn append(&self, entries: &[RequestLogEntry]) -> usize {
        let mut inner = self.lock();
        match inner.status {
            RecordingStatus::Recording => {
                inner.entries.extend_from_slice(entries);
                entries.len()
            }
            RecordingStatus::Stopped => {
                inner.late_entries += entries.len();
                tracing::debug!(count = entries.len(), "dropping entries after recording stopped");
                0
            }
            RecordingStatus::Idle => 0,
        }
    }

    /// Number of entries in the live (or frozen) log.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        match &inner.frozen {
            Some(frozen) => frozen.len(),
            None => inner.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The frozen log of the last stopped recording.
    pub fn frozen_log(&self) -> Option<Arc<[RequestLogEntry]>> {
        self.lock().frozen.clone()
    }

    /// Entries that arrived after the last freeze.
    pub fn late_entries(&self) -> usize {
        self.lock().late_entries
    }

    /// Mark an exchange as in flight until the guard drops.
    pub fn track(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { session: self }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    /// Drain, then freeze. `None` when nothing was recording.
    pub async fn freeze(&self, drain_timeout: Duration) -> Option<(Arc<[RequestLogEntry]>, bool)> {
        {
            let mut inner = self.lock();
            if inner.status != RecordingStatus::Recording || inner.stopping {
                tracing::debug!(status = ?inner.status, "stop requested while not recording");
                return None;
            }
            inner.stopping = true;
        }

        let drained = self.drain(drain_timeout).await;
        if !drained {
            tracing::warn!(
                in_flight = self.in_flight(),
                "drain deadline passed, entries from unfinished exchanges will be dropped"
            );
        }

        let mut inner = self.lock();
        let frozen: Arc<[RequestLogEntry]> = std::mem::take(&mut inner.entries).into();
        inner.frozen = Some(frozen.clone());
        inner.status = RecordingStatus::Stopped;
        inner.stopping = false;
        tracing::info!(entries = frozen.len(), "recording stopped");
        Some((frozen, drained))
    }

    /// Freeze the log and run each plugin's stop hook exactly once.
    pub async fn stop(
        &self,
        plugins: &[RegisteredPlugin],
        global: &GlobalState,
        runner: &HookRunner,
        drain_timeout: Duration,
    ) -> Option<StoppedRecording> {
        let (log, drained) = self.freeze(drain_timeout).await?;
        let mut reports = ReportSet::new();
        let mut faults = Vec::new();

        for slot in plugins {
            let res = {
                let mut ctx = StopContext::new(&log, global, runner.cancel(), &mut reports);
                runner
                    .run(slot.name(), Hook::Stop, slot.plugin().on_stop(&mut ctx))
                    .await
            };
            if let Err(fault) = res {
                faults.push(fault);
            }
        }

        Some(StoppedRecording {
            log,
            reports,
            faults,
            drained,
        })
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    session: &'a RecordingSession,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.session.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.session.idle.notify_waiters();
        }
    }
}
