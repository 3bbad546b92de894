// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! At stop, counts what happened to the recorded traffic, grouped by URL or
//! by the kind of message plugins wrote.

use crate::config::PluginConfig;
use crate::error::ConfigError;
use crate::plugin::{Plugin, StopContext};
use crate::report::Report;
use crate::request_log::{LogEntryKind, RequestLogEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Url,
    MessageType,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SummarySettings {
    #[serde(default)]
    group_by: GroupBy,
}

#[derive(Debug, Clone)]
pub struct ExecutionSummaryPlugin {
    group_by: GroupBy,
}

/// Counts per group, then per member.
#[derive(Debug, Default, Serialize)]
struct Summary {
    group_by: GroupBy,
    requests: usize,
    /// Final response statuses, including network failures.
    statuses: BTreeMap<u16, usize>,
    /// Plugin and pipeline messages, without the intercepted request/response pair.
    kinds: BTreeMap<&'static str, usize>,
    groups: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ExecutionSummaryPlugin {
    pub const NAME: &'static str = "ExecutionSummaryPlugin";

    pub fn new(group_by: GroupBy) -> Self {
        Self { group_by }
    }

    pub fn from_config(entry: &PluginConfig) -> Result<Self, ConfigError> {
        let s: SummarySettings = entry.parse()?;
        Ok(Self::new(s.group_by))
    }

    fn summarise(&self, log: &[RequestLogEntry]) -> Summary {
        let mut summary = Summary {
            group_by: self.group_by,
            ..Summary::default()
        };
        let mut exchanges = BTreeSet::new();

        for entry in log {
            exchanges.insert(entry.exchange_id);
            match &entry.kind {
                LogEntryKind::InterceptedRequest { .. } => continue,
                LogEntryKind::InterceptedResponse { status } => {
                    *summary.statuses.entry(*status).or_default() += 1;
                    continue;
                }
                LogEntryKind::Failed { status } => {
                    *summary.statuses.entry(*status).or_default() += 1;
                }
                _ => {}
            }

            let label = entry.kind.label();
            *summary.kinds.entry(label).or_default() += 1;

            let request = format!("{} {}", entry.method, entry.url);
            let (group, member) = match self.group_by {
                GroupBy::Url => (request, label.to_string()),
                GroupBy::MessageType => (label.to_string(), request),
            };
            *summary
                .groups
                .entry(group)
                .or_default()
                .entry(member)
                .or_default() += 1;
        }

        summary.requests = exchanges.len();
        summary
    }
}

fn render_markdown(s: &Summary) -> String {
    let mut md = String::from("# Dev Proxy execution summary\n\n");
    let _ = writeln!(md, "Requests: {}\n", s.requests);

    if !s.statuses.is_empty() {
        md.push_str("## Responses\n\n| Status | Count |\n|---|---|\n");
        for (status, n) in &s.statuses {
            let _ = writeln!(md, "| {status} | {n} |");
        }
        md.push('\n');
    }

    let heading = match s.group_by {
        GroupBy::Url => "## Messages by URL\n\n",
        GroupBy::MessageType => "## Messages by type\n\n",
    };
    md.push_str(heading);
    if s.groups.is_empty() {
        md.push_str("_none_\n");
    }
    for (group, members) in &s.groups {
        let _ = writeln!(md, "### {group}\n");
        for (member, n) in members {
            let _ = writeln!(md, "- ({n}) {member}");
        }
        md.push('\n');
    }
    md
}

fn render_plain(s: &Summary) -> String {
    let mut txt = format!("Requests: {}\n", s.requests);
    for (kind, n) in &s.kinds {
        let _ = writeln!(txt, "{kind}: {n}");
    }
    txt
}

#[async_trait]
impl Plugin for ExecutionSummaryPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_stop(&self, ctx: &mut StopContext<'_>) -> anyhow::Result<()> {
        if ctx.log.is_empty() {
            tracing::info!(plugin = Self::NAME, "nothing recorded, no summary");
            return Ok(());
        }
        let summary = self.summarise(ctx.log);
        tracing::info!(
            plugin = Self::NAME,
            requests = summary.requests,
            groups = summary.groups.len(),
            "execution summary computed"
        );
        ctx.add_report(
            Self::NAME,
            Report::json(serde_json::to_value(&summary)?)
                .with_markdown(render_markdown(&summary))
                .with_plain_text(render_plain(&summary)),
        );
        Ok(())
    }
}
