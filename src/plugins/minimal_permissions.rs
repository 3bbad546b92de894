// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! At stop, works out the smallest set of scopes the recorded traffic needed
//! and compares it with the scopes the application's tokens actually carried.

use crate::config::PluginConfig;
use crate::error::ConfigError;
use crate::path_template::{ApiDescription, PathTemplateMatcher};
use crate::permissions::{minimize, MinimalPermissions, OperationKey, ScopeCatalog};
use crate::plugin::{Plugin, StopContext};
use crate::report::Report;
use crate::request_log::RequestLogEntry;
use crate::token;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Global state key holding the recommended scopes after a stop.
pub const MINIMAL_SCOPES_KEY: &str = "MinimalPermissionsPlugin.minimal_scopes";

#[derive(Debug, Clone, Deserialize)]
struct MinimalPermissionsSettings {
    apis: Vec<ApiDescription>,
}

#[derive(Debug)]
pub struct MinimalPermissionsPlugin {
    matcher: PathTemplateMatcher,
    catalogs: BTreeMap<String, ScopeCatalog>,
}

/// What the analysis found, before rendering.
#[derive(Debug, Default)]
struct Findings {
    /// Minimization result per API name.
    apis: BTreeMap<String, MinimalPermissions>,
    /// Distinct scopes recommended across all APIs, sorted.
    scopes: Vec<String>,
    /// Requests no path template matched, as `METHOD url`.
    undocumented: Vec<String>,
    granted: BTreeSet<String>,
}

impl MinimalPermissionsPlugin {
    pub const NAME: &'static str = "MinimalPermissionsPlugin";

    pub fn new(apis: &[ApiDescription]) -> Result<Self, ConfigError> {
        Ok(Self {
            matcher: PathTemplateMatcher::compile(apis)?,
            catalogs: ScopeCatalog::per_api(apis),
        })
    }

    pub fn from_config(entry: &PluginConfig) -> Result<Self, ConfigError> {
        let s: MinimalPermissionsSettings = entry.parse()?;
        if s.apis.is_empty() {
            return Err(entry.invalid(anyhow::anyhow!("at least one API description is required")));
        }
        Self::new(&s.apis).map_err(|e| entry.invalid(e))
    }

    fn analyse(&self, log: &[RequestLogEntry]) -> Findings {
        let mut operations: BTreeMap<String, Vec<OperationKey>> = BTreeMap::new();
        let mut undocumented = BTreeSet::new();
        let mut granted = BTreeSet::new();

        for entry in log {
            let Some(headers) = entry.request_headers() else {
                continue;
            };
            match self.matcher.find(&entry.url) {
                Some(m) => operations
                    .entry(m.api)
                    .or_default()
                    .push(OperationKey::new(&entry.method, &m.template)),
                None => {
                    undocumented.insert(format!("{} {}", entry.method, entry.url));
                }
            }
            let auth = headers
                .get(hyper::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            granted.extend(token::scopes_or_empty(auth).all());
        }

        let empty = ScopeCatalog::new();
        let apis: BTreeMap<String, MinimalPermissions> = operations
            .into_iter()
            .map(|(api, ops)| {
                let catalog = self.catalogs.get(&api).unwrap_or(&empty);
                let result = minimize(ops, catalog);
                (api, result)
            })
            .collect();
        let scopes = apis
            .values()
            .flat_map(|p| p.scopes.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Findings {
            apis,
            scopes,
            undocumented: undocumented.into_iter().collect(),
            granted,
        }
    }
}

impl Findings {
    fn operation_count(&self) -> usize {
        self.apis
            .values()
            .map(|p| p.selections.len() + p.unmatched_operations.len())
            .sum()
    }

    /// Granted scopes no API needs.
    fn excess(&self) -> Vec<&str> {
        self.granted
            .iter()
            .filter(|s| !self.scopes.contains(s))
            .map(String::as_str)
            .collect()
    }

    /// Recommended scopes the tokens did not carry.
    fn missing(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .filter(|s| !self.granted.contains(*s))
            .map(String::as_str)
            .collect()
    }
}

fn render_json(f: &Findings) -> serde_json::Value {
    serde_json::json!({
        "minimal_scopes": f.scopes,
        "apis": f.apis,
        "undocumented_requests": f.undocumented,
        "granted_scopes": f.granted,
        "excess_scopes": f.excess(),
        "missing_scopes": f.missing(),
    })
}

fn render_markdown(f: &Findings) -> String {
    let mut md = String::from("# Minimal permissions report\n\n## Minimal scopes\n\n");
    list(&mut md, f.scopes.iter());

    md.push_str("\n## Operations\n\n| API | Operation | Scope |\n|---|---|---|\n");
    for (api, permissions) in &f.apis {
        for (op, scope) in &permissions.selections {
            let _ = writeln!(md, "| {api} | {op} | {scope} |");
        }
    }

    if !f.granted.is_empty() {
        md.push_str("\n## Excess scopes in tokens\n\n");
        list(&mut md, f.excess().iter());
        md.push_str("\n## Scopes missing from tokens\n\n");
        list(&mut md, f.missing().iter());
    }

    let unmatched: Vec<String> = f
        .apis
        .iter()
        .flat_map(|(api, p)| p.unmatched_operations.iter().map(move |op| format!("{api}: {op}")))
        .collect();
    if !unmatched.is_empty() {
        md.push_str("\n## Operations without scope information\n\n");
        list(&mut md, unmatched.iter());
    }
    if !f.undocumented.is_empty() {
        md.push_str("\n## Requests not in any API description\n\n");
        list(&mut md, f.undocumented.iter());
    }
    md
}

fn list<T: std::fmt::Display>(md: &mut String, items: impl Iterator<Item = T>) {
    let mut any = false;
    for item in items {
        any = true;
        let _ = writeln!(md, "- {item}");
    }
    if !any {
        md.push_str("_none_\n");
    }
}

#[async_trait]
impl Plugin for MinimalPermissionsPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_stop(&self, ctx: &mut StopContext<'_>) -> anyhow::Result<()> {
        let findings = self.analyse(ctx.log);
        let total = findings.operation_count() + findings.undocumented.len();
        if total == 0 {
            tracing::info!(plugin = Self::NAME, "no intercepted requests to analyse");
            return Ok(());
        }

        ctx.global.set(
            MINIMAL_SCOPES_KEY,
            serde_json::json!(findings.scopes),
        );
        tracing::info!(
            plugin = Self::NAME,
            scopes = ?findings.scopes,
            apis = findings.apis.len(),
            undocumented = findings.undocumented.len(),
            "minimal permissions computed"
        );

        let plain = format!(
            "Minimal scopes: {}\n",
            findings.scopes.join(", ")
        );
        ctx.add_report(
            Self::NAME,
            Report::json(render_json(&findings))
                .with_markdown(render_markdown(&findings))
                .with_plain_text(plain),
        );
        Ok(())
    }
}
